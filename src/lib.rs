//! Keywarden: passkey (WebAuthn) and one-time-passcode verification core
//!
//! The crate covers the protocol-sensitive middle of a passkey deployment:
//! challenge lifecycle with replay and expiry protection, attestation and
//! assertion verification with anti-rollback counter logic, one-time
//! verification codes, and the optimistic-concurrency pattern over an
//! eventually consistent key-value store. Routing, sessions, rendering,
//! and delivery are the embedding application's concern; they reach this
//! core through the [`store::KvStore`], [`challenge::SessionBinding`], and
//! [`metadata::DeviceMetadataDirectory`] contracts.
//!
//! A ceremony, end to end:
//!
//! 1. [`challenge::ChallengeManager::issue`] and `bind` a challenge,
//!    sending options built by [`webauthn::WebAuthnService`] to the client.
//! 2. On the signed response, `retrieve` and `validate_freshness`, then
//!    `consume_once` the challenge.
//! 3. Hand the response to `verify_registration` (persist the returned
//!    [`webauthn::Credential`]) or `verify_authentication` (persist the
//!    new counter via [`webauthn::Credential::touch`]).

pub mod challenge;
pub mod errors;
pub mod metadata;
pub mod rp;
pub mod settings;
pub mod store;
pub mod totp;
pub mod webauthn;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Version of the keywarden crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use challenge::{Challenge, ChallengeManager, SessionBinding};
pub use errors::{AuthError, Ceremony};
pub use settings::KeywardenSettings;
pub use store::{CounterStore, KvStore, MemoryKvStore, StoreError};
pub use totp::{Purpose, TotpService};
pub use webauthn::{AuthenticationOutcome, Credential, WebAuthnService};
