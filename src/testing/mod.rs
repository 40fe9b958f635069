//! Testing utilities
//!
//! A synthetic authenticator that produces real, verifiable registration
//! and authentication responses with a live P-256 key, so tests exercise
//! the full verification path instead of mocking it out.
//!
//! Available to integration tests via the `testing` cargo feature:
//!
//! ```toml
//! [[test]]
//! name = "verification_flow"
//! required-features = ["testing"]
//! ```

mod builders;

pub use builders::TestAuthenticator;
