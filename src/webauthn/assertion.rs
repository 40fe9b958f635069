//! Authentication (assertion) verification
//!
//! Validates challenge/origin/rpId/type, enforces counter monotonicity, and
//! verifies the ECDSA signature against the stored credential. Counter
//! rollback is checked *before* the signature so a stale but correctly
//! signed replay is still rejected, and every rollback is written to the
//! security audit log in full detail.
//!
//! There is exactly one signature-verification path, through `p256`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use log::{debug, error};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::EncodedPoint;
use sha2::{Digest, Sha256};

use super::attestation::{verify_client_data, verify_rp_id_hash, Expected};
use super::cbor;
use super::types::{
    AuthenticationOutcome, AuthenticationResponse, Credential, CEREMONY_TYPE_AUTHENTICATION,
};
use crate::errors::AuthError;

/// Verify an assertion against the stored credential.
///
/// On success the returned outcome carries the new counter value; the
/// caller persists it (with [`Credential::touch`]) alongside an updated
/// last-used timestamp.
///
/// # Errors
/// One of the typed verification errors; `InvalidCounter` is additionally
/// written to the `security` log target before it is returned.
pub fn verify_authentication(
    response: &AuthenticationResponse,
    expected: &Expected,
    credential: &Credential,
) -> Result<AuthenticationOutcome, AuthError> {
    // 1-4. Decode and check client data: challenge, origin, ceremony type.
    let client_data_bytes = verify_client_data(
        &response.response.client_data_json,
        CEREMONY_TYPE_AUTHENTICATION,
        expected,
    )?;

    // 5. rpId hash inside authenticator data.
    let auth_data_bytes = URL_SAFE_NO_PAD
        .decode(&response.response.authenticator_data)
        .map_err(|_| {
            AuthError::MalformedAttestation("invalid authenticator data encoding".to_string())
        })?;
    let auth_data = cbor::parse_authenticator_data(&auth_data_bytes)?;
    verify_rp_id_hash(&auth_data.rp_id_hash, &expected.rp_id)?;

    // 6. User presence.
    if !auth_data.user_present() {
        return Err(AuthError::UserNotPresent);
    }

    // 7. Anti-rollback, before any signature work. A counter stuck at zero
    // on both sides passes: authenticators that never increment their
    // counter report zero for life, and rejecting them would lock every
    // such credential out. The tradeoff is weaker clone detection for
    // exactly those devices.
    check_counter(credential, auth_data.sign_count)?;

    // 8. Signed message: authenticatorData || SHA-256(clientDataJSON).
    let client_data_hash = Sha256::digest(&client_data_bytes);
    let mut message = Vec::with_capacity(auth_data_bytes.len() + client_data_hash.len());
    message.extend_from_slice(&auth_data_bytes);
    message.extend_from_slice(&client_data_hash);

    // 9. Reconstruct the stored public key and require a valid P-256 point.
    let verifying_key = reconstruct_key(&credential.public_key)?;

    // 10. DER signature decode and ECDSA verification.
    let signature_bytes = URL_SAFE_NO_PAD
        .decode(&response.response.signature)
        .map_err(|_| AuthError::MalformedAttestation("invalid signature encoding".to_string()))?;
    let signature =
        Signature::from_der(&signature_bytes).map_err(|_| AuthError::SignatureFailed)?;
    verifying_key
        .verify(&message, &signature)
        .map_err(|_| AuthError::SignatureFailed)?;

    // 11. The caller persists the new counter and last-used timestamp.
    Ok(AuthenticationOutcome {
        credential_id: credential.credential_id.clone(),
        new_counter: auth_data.sign_count,
        user_verified: auth_data.user_verified(),
        authenticated_at: Utc::now(),
    })
}

/// Require the received counter to advance strictly whenever either side is
/// nonzero. A violation is a possible cloned-authenticator event and is
/// audited at the highest severity independent of the error return.
fn check_counter(credential: &Credential, received: u32) -> Result<(), AuthError> {
    let stored = credential.counter;
    if stored == 0 && received == 0 {
        debug!(
            "credential {} uses a counter-less authenticator",
            credential.credential_id
        );
        return Ok(());
    }
    if received <= stored {
        error!(
            target: "security",
            "signature counter rollback for credential {}: stored={stored} received={received}; \
             possible cloned authenticator",
            credential.credential_id
        );
        return Err(AuthError::InvalidCounter { stored, received });
    }
    Ok(())
}

/// Rebuild a verifying key from the stored COSE form.
///
/// Coordinate presence and length are checked during COSE parsing; the
/// point itself must additionally lie on the P-256 curve.
fn reconstruct_key(cose_key: &[u8]) -> Result<VerifyingKey, AuthError> {
    let key = cbor::parse_ec2_p256(cose_key)?;
    let point = EncodedPoint::from_affine_coordinates(&key.x.into(), &key.y.into(), false);
    VerifyingKey::from_encoded_point(&point)
        .map_err(|_| AuthError::InvalidKeyFormat("point not on P-256 curve".to_string()))
}
