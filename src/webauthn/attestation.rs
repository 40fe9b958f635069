//! Registration (attestation) verification
//!
//! Parses the attestation response, validates challenge/origin/rpId/type,
//! and extracts a storable [`Credential`]. Each check short-circuits in a
//! fixed order; persistence is the caller's responsibility.
//!
//! Attestation *trust chain* validation (certificate path building against
//! vendor roots) is out of scope; the format classifier only records what
//! kind of statement was conveyed.

use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use log::warn;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::cbor;
use super::types::{
    AttestationKind, Credential, DeviceType, RegistrationResponse, CEREMONY_TYPE_REGISTRATION,
};
use crate::errors::AuthError;
use crate::metadata::{self, DeviceInfo, DeviceMetadataDirectory};

/// Expected values a ceremony is verified against.
#[derive(Debug, Clone)]
pub struct Expected {
    /// URL-safe text form of the bound challenge
    pub challenge: String,
    /// Allowed origins, already resolved (see [`crate::rp`])
    pub origins: HashSet<String>,
    /// Canonical relying-party id
    pub rp_id: String,
}

/// Attestation statement formats this verifier recognizes.
///
/// A closed union so the classifier below is an exhaustive match; formats
/// we have never seen land in `Unknown` and degrade to
/// [`AttestationKind::None`] rather than failing registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationFormat {
    None,
    Packed,
    FidoU2f,
    AndroidKey,
    AndroidSafetynet,
    Tpm,
    Apple,
    Unknown(String),
}

impl AttestationFormat {
    #[must_use]
    pub fn from_fmt(fmt: &str) -> Self {
        match fmt {
            "none" => AttestationFormat::None,
            "packed" => AttestationFormat::Packed,
            "fido-u2f" => AttestationFormat::FidoU2f,
            "android-key" => AttestationFormat::AndroidKey,
            "android-safetynet" => AttestationFormat::AndroidSafetynet,
            "tpm" => AttestationFormat::Tpm,
            "apple" => AttestationFormat::Apple,
            other => AttestationFormat::Unknown(other.to_string()),
        }
    }
}

/// Classify the attestation conveyed by `(format, statement)`.
#[must_use]
pub fn classify_attestation(format: &AttestationFormat, has_chain: bool) -> AttestationKind {
    match format {
        AttestationFormat::None => AttestationKind::None,
        AttestationFormat::Packed | AttestationFormat::FidoU2f => {
            if has_chain {
                AttestationKind::Basic
            } else {
                AttestationKind::SelfAttestation
            }
        }
        AttestationFormat::AndroidKey | AttestationFormat::Tpm | AttestationFormat::Apple => {
            AttestationKind::Basic
        }
        AttestationFormat::AndroidSafetynet => AttestationKind::AttCa,
        AttestationFormat::Unknown(name) => {
            warn!("unknown attestation format {name:?}, recording as none");
            AttestationKind::None
        }
    }
}

/// Verify client data JSON: ceremony type, challenge, and origin, in that
/// order. Shared by registration and authentication.
///
/// # Errors
/// `MalformedAttestation` for undecodable input, then `InvalidChallenge`,
/// `InvalidOrigin`, or `InvalidCredentialType` per failed check.
pub fn verify_client_data(
    client_data_json_b64: &str,
    expected_type: &str,
    expected: &Expected,
) -> Result<Vec<u8>, AuthError> {
    let client_data_bytes = URL_SAFE_NO_PAD
        .decode(client_data_json_b64)
        .map_err(|_| AuthError::MalformedAttestation("invalid client data encoding".to_string()))?;

    let client_data: serde_json::Value = serde_json::from_slice(&client_data_bytes)
        .map_err(|_| AuthError::MalformedAttestation("invalid client data JSON".to_string()))?;

    let challenge = client_data.get("challenge").and_then(|v| v.as_str());
    if challenge != Some(expected.challenge.as_str()) {
        return Err(AuthError::InvalidChallenge);
    }

    let origin = client_data.get("origin").and_then(|v| v.as_str());
    match origin {
        Some(origin) if crate::rp::validate_origin(origin, &expected.origins) => {}
        _ => return Err(AuthError::InvalidOrigin),
    }

    let ceremony_type = client_data.get("type").and_then(|v| v.as_str());
    if ceremony_type != Some(expected_type) {
        return Err(AuthError::InvalidCredentialType);
    }

    Ok(client_data_bytes)
}

/// Check the rpId hash embedded in authenticator data against the expected
/// relying party.
pub(crate) fn verify_rp_id_hash(rp_id_hash: &[u8; 32], rp_id: &str) -> Result<(), AuthError> {
    let expected_hash = Sha256::digest(rp_id.as_bytes());
    if rp_id_hash != expected_hash.as_slice() {
        return Err(AuthError::InvalidRelyingParty);
    }
    Ok(())
}

/// Verify a registration response and extract the storable credential.
///
/// Owner and usage timestamps are left for the caller: `user_id` is `None`
/// and `last_used` is unset on the returned record.
///
/// # Errors
/// One of the typed verification errors, in check order: decoding, then
/// challenge, origin, ceremony type, relying party, user presence,
/// credential presence, and key algorithm.
pub async fn verify_registration(
    response: &RegistrationResponse,
    expected: &Expected,
    directory: &dyn DeviceMetadataDirectory,
) -> Result<Credential, AuthError> {
    // 1. Decode the attestation object.
    let attestation_bytes = URL_SAFE_NO_PAD
        .decode(&response.response.attestation_object)
        .map_err(|_| AuthError::MalformedAttestation("invalid attestation encoding".to_string()))?;
    let attestation = cbor::decode_attestation_object(&attestation_bytes)?;

    // 2-4. Challenge, origin, ceremony type.
    verify_client_data(
        &response.response.client_data_json,
        CEREMONY_TYPE_REGISTRATION,
        expected,
    )?;

    // 5. rpId hash.
    let auth_data = cbor::parse_authenticator_data(&attestation.auth_data)?;
    verify_rp_id_hash(&auth_data.rp_id_hash, &expected.rp_id)?;

    // 6. User presence.
    if !auth_data.user_present() {
        return Err(AuthError::UserNotPresent);
    }

    // 7. Attested credential block.
    let attested = auth_data
        .attested_credential
        .as_ref()
        .ok_or(AuthError::NoCredential)?;

    // 8-9. EC2/P-256 ES256 only; keep the normalized COSE form for storage.
    cbor::parse_ec2_p256(&attested.cose_key)?;

    // 10. Transports: authenticator-reported, else directory, else generic.
    let (device_info, known_device) = device_info(response, attested.aaguid, directory).await;
    let transports = response
        .response
        .transports
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| device_info.transports.clone());

    // 12. Attestation classification.
    let format = AttestationFormat::from_fmt(&attestation.fmt);
    let attestation_kind = classify_attestation(&format, attestation.has_certificate_chain());

    // 13. Display name from metadata, or a dated generic fallback.
    let display_name = if known_device {
        device_info.display_name()
    } else {
        format!("Passkey ({})", Utc::now().format("%Y-%m-%d"))
    };

    Ok(Credential {
        credential_id: response.id.clone(),
        public_key: attested.cose_key.clone(),
        counter: auth_data.sign_count,
        device_type: device_type(response, attested.aaguid),
        // 11. Backup flags from authenticator-data bits 3 and 4.
        backup_eligible: auth_data.backup_eligible(),
        backup_state: auth_data.backup_state(),
        transports,
        aaguid: attested.aaguid,
        attestation_kind,
        rp_id: expected.rp_id.clone(),
        display_name,
        created_at: Utc::now(),
        last_used: None,
        user_id: None,
    })
}

/// Device metadata for the registration, plus whether it came from the
/// directory. An all-zero AAGUID is always the generic platform record,
/// regardless of directory contents; a miss falls back to the generic
/// record matching the attachment hint.
async fn device_info(
    response: &RegistrationResponse,
    aaguid: Uuid,
    directory: &dyn DeviceMetadataDirectory,
) -> (DeviceInfo, bool) {
    if aaguid.is_nil() {
        return (metadata::generic_platform(), false);
    }
    match directory.lookup(&aaguid).await {
        Some(info) => (info, true),
        None => {
            if response.authenticator_attachment.as_deref() == Some("platform") {
                (metadata::generic_platform(), false)
            } else {
                (metadata::generic_cross_platform(), false)
            }
        }
    }
}

fn device_type(response: &RegistrationResponse, aaguid: Uuid) -> DeviceType {
    match response.authenticator_attachment.as_deref() {
        Some("platform") => DeviceType::Platform,
        Some(_) => DeviceType::CrossPlatform,
        None if aaguid.is_nil() => DeviceType::Platform,
        None => DeviceType::CrossPlatform,
    }
}
