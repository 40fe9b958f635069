//! Error types for verification operations
//!
//! This module defines the closed error taxonomy shared by the challenge,
//! registration, authentication, and one-time-code services. Verification
//! failures are failure-closed and are surfaced to callers as typed values,
//! never as panics crossing module boundaries.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::error;
use rand::RngCore;

/// Which ceremony a caller-facing message belongs to.
///
/// User-facing messages are deliberately coarse and uniform per ceremony so
/// that a failed check does not reveal which internal step rejected the
/// request. Only the security audit log carries detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceremony {
    /// Passkey registration (attestation)
    Registration,
    /// Passkey authentication (assertion)
    Authentication,
    /// One-time verification code
    Code,
}

/// Errors that can occur during verification operations
#[derive(Debug)]
pub enum AuthError {
    /// Attestation object, authenticator data, or client data could not be decoded
    MalformedAttestation(String),

    /// Embedded challenge does not match the expected challenge, or no
    /// challenge is bound to the session
    InvalidChallenge,

    /// Bound challenge is older than the configured maximum age
    ChallengeExpired,

    /// Challenge value was already consumed once
    ChallengeReplayed,

    /// Embedded origin is not in the allowed-origin set
    InvalidOrigin,

    /// rpId hash in authenticator data does not match the expected relying party
    InvalidRelyingParty,

    /// Embedded ceremony type does not match the expected type constant
    InvalidCredentialType,

    /// "User present" flag not set in authenticator data
    UserNotPresent,

    /// Credential key is not an EC2/P-256 key with algorithm ES256
    UnsupportedAlgorithm,

    /// No attested credential block present in authenticator data
    NoCredential,

    /// Signature counter did not advance; possible cloned authenticator.
    /// Always additionally written to the security audit log.
    InvalidCounter {
        /// Counter value persisted from the last successful authentication
        stored: u32,
        /// Counter value reported by the authenticator in this assertion
        received: u32,
    },

    /// Stored public key could not be reconstructed into a valid P-256 point
    InvalidKeyFormat(String),

    /// ECDSA signature did not verify against the reconstructed key
    SignatureFailed,

    /// Stored verification code was issued for a different purpose
    PurposeMismatch,

    /// Verification code is past its expiry (record deleted)
    CodeExpired,

    /// Too many wrong attempts for this verification code (record deleted)
    MaxAttemptsReached,

    /// Candidate code does not match, or no live code exists for this key
    InvalidCode,

    /// Key-value store operation failed; carries a correlation id for
    /// operator follow-up, never storage internals
    StorageUnavailable {
        /// Opaque token logged alongside the underlying storage error
        correlation_id: String,
    },

    /// Invalid service configuration (e.g. empty rpId)
    ConfigurationError(String),
}

impl AuthError {
    /// Wrap a storage-layer failure, logging the underlying error with a
    /// correlation id so operators can match the log line to the response.
    #[must_use]
    pub fn from_store(err: crate::store::StoreError) -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        let correlation_id = URL_SAFE_NO_PAD.encode(bytes);
        error!("storage failure [{correlation_id}]: {err}");
        AuthError::StorageUnavailable { correlation_id }
    }

    /// The uniform caller-facing message for this error.
    ///
    /// All verification failures within a ceremony share one message;
    /// storage failures are distinguished so callers can retry.
    #[must_use]
    pub fn public_message(&self, ceremony: Ceremony) -> &'static str {
        match self {
            AuthError::StorageUnavailable { .. } => "service temporarily unavailable",
            _ => match ceremony {
                Ceremony::Registration => "registration failed",
                Ceremony::Authentication => "authentication failed",
                Ceremony::Code => "verification failed",
            },
        }
    }

    /// Whether this error indicates a storage problem rather than a
    /// validation failure of caller-supplied input.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, AuthError::StorageUnavailable { .. })
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MalformedAttestation(msg) => write!(f, "Malformed attestation: {msg}"),
            AuthError::InvalidChallenge => write!(f, "Challenge verification failed"),
            AuthError::ChallengeExpired => write!(f, "Challenge expired"),
            AuthError::ChallengeReplayed => write!(f, "Challenge already consumed"),
            AuthError::InvalidOrigin => write!(f, "Origin verification failed"),
            AuthError::InvalidRelyingParty => write!(f, "Relying party verification failed"),
            AuthError::InvalidCredentialType => write!(f, "Invalid ceremony type"),
            AuthError::UserNotPresent => write!(f, "User presence not asserted"),
            AuthError::UnsupportedAlgorithm => write!(f, "Unsupported key type or algorithm"),
            AuthError::NoCredential => write!(f, "No attested credential data"),
            AuthError::InvalidCounter { stored, received } => write!(
                f,
                "Signature counter did not advance (stored {stored}, received {received})"
            ),
            AuthError::InvalidKeyFormat(msg) => write!(f, "Invalid key format: {msg}"),
            AuthError::SignatureFailed => write!(f, "Signature verification failed"),
            AuthError::PurposeMismatch => write!(f, "Verification code purpose mismatch"),
            AuthError::CodeExpired => write!(f, "Verification code expired"),
            AuthError::MaxAttemptsReached => write!(f, "Too many verification attempts"),
            AuthError::InvalidCode => write!(f, "Invalid verification code"),
            AuthError::StorageUnavailable { correlation_id } => {
                write!(f, "Storage unavailable [{correlation_id}]")
            }
            AuthError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<crate::store::StoreError> for AuthError {
    fn from(err: crate::store::StoreError) -> Self {
        AuthError::from_store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_messages_are_uniform_per_ceremony() {
        let errors = [
            AuthError::InvalidChallenge,
            AuthError::InvalidOrigin,
            AuthError::SignatureFailed,
            AuthError::InvalidCounter {
                stored: 5,
                received: 3,
            },
        ];
        for err in &errors {
            assert_eq!(
                err.public_message(Ceremony::Authentication),
                "authentication failed"
            );
            assert_eq!(
                err.public_message(Ceremony::Registration),
                "registration failed"
            );
        }
    }

    #[test]
    fn storage_errors_are_distinguished() {
        let err = AuthError::StorageUnavailable {
            correlation_id: "abc123".to_string(),
        };
        assert!(err.is_storage());
        assert_eq!(
            err.public_message(Ceremony::Authentication),
            "service temporarily unavailable"
        );
        assert!(!AuthError::SignatureFailed.is_storage());
    }
}
