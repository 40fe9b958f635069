//! WebAuthn data types
//!
//! Serializable structures exchanged with the client and the storable
//! credential record produced by registration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ceremony type constant embedded in client data during registration.
pub const CEREMONY_TYPE_REGISTRATION: &str = "webauthn.create";
/// Ceremony type constant embedded in client data during authentication.
pub const CEREMONY_TYPE_AUTHENTICATION: &str = "webauthn.get";

/// Registration options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingParty,
    pub user: UserEntity,
    #[serde(rename = "pubKeyCredParams")]
    pub public_key_params: Vec<PublicKeyCredentialParameters>, // Allowed algorithms
    pub timeout: u32,        // Timeout in milliseconds
    pub attestation: String, // "none", "indirect", "direct"
    #[serde(rename = "authenticatorSelection")]
    pub authenticator_selection: AuthenticatorSelectionCriteria,
}

/// Authentication options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub timeout: u32,      // Timeout in milliseconds
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "allowCredentials")]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    #[serde(rename = "userVerification")]
    pub user_verification: String, // "required", "preferred", "discouraged"
}

/// Relying party information
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingParty {
    pub id: String,   // Domain name (e.g., "example.com")
    pub name: String, // Display name
}

/// User entity
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserEntity {
    pub id: String,   // Base64URL-encoded user handle
    pub name: String, // Username (e.g., email)
    #[serde(rename = "displayName")]
    pub display_name: String, // Display name
}

/// Public key credential parameters
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialParameters {
    pub r#type: String, // Always "public-key"
    pub alg: i32,       // Algorithm identifier (-7 for ES256)
}

/// Authenticator selection criteria
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorSelectionCriteria {
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: Option<String>, // "platform", "cross-platform"
    #[serde(rename = "requireResidentKey")]
    pub require_resident_key: bool,
    #[serde(rename = "userVerification")]
    pub user_verification: String, // "required", "preferred", "discouraged"
}

/// Public key credential descriptor
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialDescriptor {
    pub r#type: String, // Always "public-key"
    pub id: String,     // Base64URL-encoded credential ID
}

/// Registration response from client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationResponse {
    pub id: String, // Base64URL-encoded credential ID
    #[serde(rename = "rawId")]
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAttestationResponse,
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: Option<String>, // "platform", "cross-platform" hint
    pub r#type: String, // Always "public-key"
}

/// Authentication response from client
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationResponse {
    pub id: String, // Base64URL-encoded credential ID
    #[serde(rename = "rawId")]
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAssertionResponse,
    pub r#type: String, // Always "public-key"
}

/// Authenticator attestation response during registration
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    #[serde(rename = "attestationObject")]
    pub attestation_object: String, // Base64URL-encoded attestation object
    pub transports: Option<Vec<String>>, // Authenticator-reported transports
}

/// Authenticator assertion response during authentication
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String, // Base64URL-encoded authenticator data
    pub signature: String, // Base64URL-encoded DER signature
    #[serde(rename = "userHandle")]
    pub user_handle: Option<String>, // Base64URL-encoded user handle
}

/// How an authenticator attaches to the client device.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    Platform,
    CrossPlatform,
}

/// Classification of the attestation conveyed at registration.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttestationKind {
    /// No attestation statement, or an unrecognized format
    None,
    /// Statement chains to an attestation certificate
    Basic,
    /// Statement signed with the credential key itself
    #[serde(rename = "self")]
    SelfAttestation,
    /// Statement vouched for by an attestation CA
    #[serde(rename = "attca")]
    AttCa,
}

/// A registered authenticator, one record per credential.
///
/// Created by the registration verifier; the counter and `last_used` are
/// mutated only by a successful authentication result.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Credential {
    /// Base64URL-encoded credential ID
    pub credential_id: String,
    /// Normalized COSE key (EC2/P-256 only), re-parseable as stored
    pub public_key: Vec<u8>,
    /// Authenticator-reported signature counter, monotonic per credential
    pub counter: u32,
    pub device_type: DeviceType,
    /// Authenticator-data flag bit 3
    pub backup_eligible: bool,
    /// Authenticator-data flag bit 4
    pub backup_state: bool,
    pub transports: Vec<String>,
    /// Device-family identifier
    pub aaguid: Uuid,
    pub attestation_kind: AttestationKind,
    /// Relying-party id in force at registration
    pub rp_id: String,
    /// Friendly display name
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    /// Owning user; set by the caller on persistence
    pub user_id: Option<String>,
}

impl Credential {
    /// Apply a successful authentication: advance the counter and stamp
    /// last use. The caller persists the updated record.
    pub fn touch(&mut self, new_counter: u32, at: DateTime<Utc>) {
        self.counter = new_counter;
        self.last_used = Some(at);
    }
}

/// Outcome of a successful authentication, for the caller to persist.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationOutcome {
    pub credential_id: String,
    /// New counter value to store on the credential
    pub new_counter: u32,
    /// Whether the authenticator asserted user verification (flag bit 2)
    pub user_verified: bool,
    pub authenticated_at: DateTime<Utc>,
}
