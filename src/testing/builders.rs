//! Synthetic authenticator for tests
//!
//! Builds byte-exact attestation and assertion payloads: CBOR attestation
//! objects, authenticator-data blocks, COSE keys, and DER-encoded ECDSA
//! signatures, all backed by a freshly generated P-256 key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::ser::into_writer;
use ciborium::value::Value;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::webauthn::cbor::{
    FLAG_ATTESTED_CREDENTIAL, FLAG_BACKUP_ELIGIBLE, FLAG_BACKUP_STATE, FLAG_USER_PRESENT,
    FLAG_USER_VERIFIED,
};
use crate::webauthn::{
    AuthenticationResponse, AuthenticatorAssertionResponse, AuthenticatorAttestationResponse,
    RegistrationResponse, CEREMONY_TYPE_AUTHENTICATION, CEREMONY_TYPE_REGISTRATION,
};

/// A fake authenticator holding a real signing key.
pub struct TestAuthenticator {
    signing_key: SigningKey,
    credential_id: Vec<u8>,
    aaguid: Uuid,
    initial_counter: u32,
    user_present: bool,
    user_verified: bool,
    backup_eligible: bool,
    backup_state: bool,
}

impl Default for TestAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAuthenticator {
    /// A roaming authenticator with a random key, credential id, and AAGUID.
    #[must_use]
    pub fn new() -> Self {
        let mut credential_id = vec![0u8; 20];
        rand::thread_rng().fill_bytes(&mut credential_id);
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
            credential_id,
            aaguid: Uuid::new_v4(),
            initial_counter: 0,
            user_present: true,
            user_verified: true,
            backup_eligible: false,
            backup_state: false,
        }
    }

    /// Use a specific AAGUID (e.g. `Uuid::nil()` for a platform device).
    #[must_use]
    pub fn with_aaguid(mut self, aaguid: Uuid) -> Self {
        self.aaguid = aaguid;
        self
    }

    /// Report `counter` in the registration's authenticator data.
    #[must_use]
    pub fn with_initial_counter(mut self, counter: u32) -> Self {
        self.initial_counter = counter;
        self
    }

    /// Drop the user-present flag from emitted authenticator data.
    #[must_use]
    pub fn without_user_presence(mut self) -> Self {
        self.user_present = false;
        self
    }

    /// Set the backup-eligible / backup-state flag bits.
    #[must_use]
    pub fn with_backup_flags(mut self, eligible: bool, state: bool) -> Self {
        self.backup_eligible = eligible;
        self.backup_state = state;
        self
    }

    /// Base64URL credential id as the client would report it.
    #[must_use]
    pub fn credential_id(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.credential_id)
    }

    /// The COSE-encoded EC2/P-256 public key for this authenticator.
    ///
    /// # Panics
    /// Panics if CBOR serialization fails, which it cannot for this shape.
    #[must_use]
    pub fn cose_public_key(&self) -> Vec<u8> {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let x = point.x().expect("uncompressed point has x").to_vec();
        let y = point.y().expect("uncompressed point has y").to_vec();

        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())), // kty: EC2
            (Value::Integer(3.into()), Value::Integer((-7).into())), // alg: ES256
            (Value::Integer((-1).into()), Value::Integer(1.into())), // crv: P-256
            (Value::Integer((-2).into()), Value::Bytes(x)),
            (Value::Integer((-3).into()), Value::Bytes(y)),
        ]);
        let mut bytes = Vec::new();
        into_writer(&map, &mut bytes).expect("COSE key serializes");
        bytes
    }

    /// A registration response for the given ceremony context.
    ///
    /// `fmt` selects the attestation format ("none", "packed", ...);
    /// `with_chain` adds a dummy x5c entry to the statement.
    ///
    /// # Panics
    /// Panics if CBOR serialization fails, which it cannot for this shape.
    #[must_use]
    pub fn registration_response(
        &self,
        challenge: &str,
        origin: &str,
        rp_id: &str,
        fmt: &str,
        with_chain: bool,
    ) -> RegistrationResponse {
        let client_data = client_data_json(CEREMONY_TYPE_REGISTRATION, challenge, origin);

        let mut auth_data = self.auth_data_header(rp_id, self.initial_counter, true);
        auth_data.extend_from_slice(self.aaguid.as_bytes());
        auth_data.extend_from_slice(
            &u16::try_from(self.credential_id.len())
                .expect("short credential id")
                .to_be_bytes(),
        );
        auth_data.extend_from_slice(&self.credential_id);
        auth_data.extend_from_slice(&self.cose_public_key());

        let att_stmt = if with_chain {
            vec![(
                Value::Text("x5c".to_string()),
                Value::Array(vec![Value::Bytes(vec![0x30, 0x82])]),
            )]
        } else {
            Vec::new()
        };
        let attestation = Value::Map(vec![
            (Value::Text("fmt".to_string()), Value::Text(fmt.to_string())),
            (Value::Text("attStmt".to_string()), Value::Map(att_stmt)),
            (Value::Text("authData".to_string()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_bytes = Vec::new();
        into_writer(&attestation, &mut attestation_bytes).expect("attestation serializes");

        RegistrationResponse {
            id: self.credential_id(),
            raw_id: self.credential_id(),
            response: AuthenticatorAttestationResponse {
                client_data_json: URL_SAFE_NO_PAD.encode(client_data),
                attestation_object: URL_SAFE_NO_PAD.encode(attestation_bytes),
                transports: None,
            },
            authenticator_attachment: None,
            r#type: "public-key".to_string(),
        }
    }

    /// A signed assertion reporting `counter`.
    #[must_use]
    pub fn assertion_response(
        &self,
        challenge: &str,
        origin: &str,
        rp_id: &str,
        counter: u32,
    ) -> AuthenticationResponse {
        let client_data = client_data_json(CEREMONY_TYPE_AUTHENTICATION, challenge, origin);
        let auth_data = self.auth_data_header(rp_id, counter, false);

        let client_data_hash = Sha256::digest(&client_data);
        let mut message = Vec::with_capacity(auth_data.len() + client_data_hash.len());
        message.extend_from_slice(&auth_data);
        message.extend_from_slice(&client_data_hash);

        let signature: Signature = self.signing_key.sign(&message);
        let signature_der = signature.to_der();

        AuthenticationResponse {
            id: self.credential_id(),
            raw_id: self.credential_id(),
            response: AuthenticatorAssertionResponse {
                client_data_json: URL_SAFE_NO_PAD.encode(client_data),
                authenticator_data: URL_SAFE_NO_PAD.encode(auth_data),
                signature: URL_SAFE_NO_PAD.encode(signature_der.as_bytes()),
                user_handle: None,
            },
            r#type: "public-key".to_string(),
        }
    }

    /// An assertion whose signature bytes have been corrupted after signing.
    #[must_use]
    pub fn tampered_assertion_response(
        &self,
        challenge: &str,
        origin: &str,
        rp_id: &str,
        counter: u32,
    ) -> AuthenticationResponse {
        let mut response = self.assertion_response(challenge, origin, rp_id, counter);
        let mut bytes = URL_SAFE_NO_PAD
            .decode(&response.response.signature)
            .expect("own signature decodes");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        response.response.signature = URL_SAFE_NO_PAD.encode(bytes);
        response
    }

    fn auth_data_header(&self, rp_id: &str, counter: u32, attested: bool) -> Vec<u8> {
        let mut flags = 0u8;
        if self.user_present {
            flags |= FLAG_USER_PRESENT;
        }
        if self.user_verified {
            flags |= FLAG_USER_VERIFIED;
        }
        if self.backup_eligible {
            flags |= FLAG_BACKUP_ELIGIBLE;
        }
        if self.backup_state {
            flags |= FLAG_BACKUP_STATE;
        }
        if attested {
            flags |= FLAG_ATTESTED_CREDENTIAL;
        }

        let mut data = Sha256::digest(rp_id.as_bytes()).to_vec();
        data.push(flags);
        data.extend_from_slice(&counter.to_be_bytes());
        data
    }
}

fn client_data_json(ceremony_type: &str, challenge: &str, origin: &str) -> Vec<u8> {
    serde_json::json!({
        "type": ceremony_type,
        "challenge": challenge,
        "origin": origin,
        "crossOrigin": false,
    })
    .to_string()
    .into_bytes()
}
