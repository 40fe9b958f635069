//! WebAuthn verification
//!
//! Registration (attestation) and authentication (assertion) verification
//! against the W3C WebAuthn wire formats, using standard cryptography
//! libraries. Independent of any session or transport layer.

mod assertion;
mod attestation;
pub mod cbor;
mod service;
mod types;

pub use assertion::verify_authentication;
pub use attestation::{
    classify_attestation, verify_client_data, verify_registration, AttestationFormat, Expected,
};
pub use service::WebAuthnService;
pub use types::*;
