//! Challenge lifecycle management
//!
//! A challenge moves through Issued -> Bound -> {Consumed | Expired};
//! consumption and expiry are terminal. Issuance is pure (32 random bytes,
//! URL-safe encoded). Binding parks the challenge against a caller-chosen
//! correlation token via the session collaborator, and single-use
//! consumption writes a uniqueness marker into the counter store. The
//! marker is best-effort anti-replay, bounded by the storage layer's
//! eventual consistency; short challenge lifetimes keep the window small.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;
use crate::settings::ChallengeSettings;
use crate::store::{CounterStore, StoreError};

/// A freshly issued challenge, URL-safe text over 32 random bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    /// The URL-safe text form sent to the client and embedded in client data.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an already-encoded text form. Test fixtures only; production
    /// challenges come from [`ChallengeManager::issue`].
    #[cfg(any(test, feature = "testing"))]
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Challenge(text.to_string())
    }
}

/// Opaque handle returned by [`ChallengeManager::bind`]; the caller threads
/// it through the rest of the ceremony without inspecting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle(String);

/// A challenge as bound to a correlation token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundChallenge {
    /// URL-safe text form of the challenge
    pub challenge: String,
    /// When the challenge was bound
    pub issued_at: DateTime<Utc>,
}

/// Session binding collaborator.
///
/// The core never learns the cookie or session wire format; it hands the
/// binding layer an opaque value keyed by the correlation token and reads
/// it back later.
#[async_trait]
pub trait SessionBinding: Send + Sync {
    /// Persist `value` against `token`, replacing any previous value.
    async fn bind(&self, token: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Read the value bound to `token`, if any.
    async fn read(&self, token: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// An in-process session binding backed by a mutex-guarded map.
///
/// For development and tests; construct one per test and pass it in.
#[derive(Debug, Default)]
pub struct MemorySessionBinding {
    entries: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemorySessionBinding {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBinding for MemorySessionBinding {
    async fn bind(&self, token: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("session binding poisoned".to_string()))?;
        entries.insert(token.to_string(), value.to_vec());
        Ok(())
    }

    async fn read(&self, token: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("session binding poisoned".to_string()))?;
        Ok(entries.get(token).cloned())
    }
}

/// Issues, binds, freshness-checks, and single-use-consumes challenges.
pub struct ChallengeManager {
    sessions: Arc<dyn SessionBinding>,
    counters: CounterStore,
    settings: ChallengeSettings,
}

impl ChallengeManager {
    pub fn new(
        sessions: Arc<dyn SessionBinding>,
        counters: CounterStore,
        settings: ChallengeSettings,
    ) -> Self {
        if settings.marker_ttl_seconds < settings.max_age_seconds {
            warn!(
                "challenge marker TTL {}s is shorter than max age {}s; replayed \
                 challenges may be accepted after the marker lapses",
                settings.marker_ttl_seconds, settings.max_age_seconds
            );
        }
        Self {
            sessions,
            counters,
            settings,
        }
    }

    /// Draw a fresh 32-byte challenge. No side effects.
    #[must_use]
    pub fn issue(&self) -> Challenge {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Challenge(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Bind `challenge` to `correlation_token` and return a handle for the
    /// remainder of the ceremony.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the session collaborator fails.
    pub async fn bind(
        &self,
        correlation_token: &str,
        challenge: &Challenge,
    ) -> Result<SessionHandle, AuthError> {
        let bound = BoundChallenge {
            challenge: challenge.0.clone(),
            issued_at: Utc::now(),
        };
        let value = serde_json::to_vec(&bound)
            .map_err(|e| AuthError::ConfigurationError(format!("unencodable binding: {e}")))?;
        self.sessions.bind(correlation_token, &value).await?;
        debug!("challenge bound to correlation token");
        Ok(SessionHandle(correlation_token.to_string()))
    }

    /// Read back the challenge bound to `handle`.
    ///
    /// # Errors
    /// Returns `InvalidChallenge` when nothing is bound (session absent or
    /// cleared), `StorageUnavailable` on collaborator failure.
    pub async fn retrieve(&self, handle: &SessionHandle) -> Result<BoundChallenge, AuthError> {
        let Some(value) = self.sessions.read(&handle.0).await? else {
            return Err(AuthError::InvalidChallenge);
        };
        serde_json::from_slice(&value).map_err(|_| AuthError::InvalidChallenge)
    }

    /// Reject challenges older than the configured maximum age.
    ///
    /// # Errors
    /// Returns `ChallengeExpired` when `issued_at` is too old.
    pub fn validate_freshness(&self, issued_at: DateTime<Utc>) -> Result<(), AuthError> {
        let max_age = Duration::seconds(
            i64::try_from(self.settings.max_age_seconds).unwrap_or(i64::MAX),
        );
        if Utc::now() - issued_at > max_age {
            return Err(AuthError::ChallengeExpired);
        }
        Ok(())
    }

    /// Consume a challenge value, enforcing single use.
    ///
    /// The marker lives in the counter store with a TTL covering the
    /// challenge's maximum age; a second consumption inside that window is
    /// rejected as a replay.
    ///
    /// # Errors
    /// Returns `ChallengeReplayed` when the marker already exists,
    /// `StorageUnavailable` on store failure.
    pub async fn consume_once(&self, challenge: &str) -> Result<(), AuthError> {
        let key = format!("challenge-marker:{challenge}");
        let record = self
            .counters
            .increment(&key, self.settings.marker_ttl_seconds)
            .await?;
        if record.count > 1 {
            warn!("challenge value consumed more than once");
            return Err(AuthError::ChallengeReplayed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKvStore;
    use std::time::Duration as StdDuration;

    fn manager() -> ChallengeManager {
        let counters = CounterStore::new(
            Arc::new(MemoryKvStore::new()),
            3,
            StdDuration::from_millis(1),
        );
        ChallengeManager::new(
            Arc::new(MemorySessionBinding::new()),
            counters,
            ChallengeSettings::default(),
        )
    }

    #[test]
    fn issued_challenges_are_distinct_urlsafe_32_bytes() {
        let manager = manager();
        let a = manager.issue();
        let b = manager.issue();
        assert_ne!(a, b);
        let decoded = URL_SAFE_NO_PAD.decode(a.as_str()).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[tokio::test]
    async fn bind_then_retrieve_roundtrips() {
        let manager = manager();
        let challenge = manager.issue();
        let handle = manager.bind("session-1", &challenge).await.unwrap();

        let bound = manager.retrieve(&handle).await.unwrap();
        assert_eq!(bound.challenge, challenge.as_str());
        manager.validate_freshness(bound.issued_at).unwrap();
    }

    #[tokio::test]
    async fn retrieve_without_binding_is_invalid_challenge() {
        let manager = manager();
        let err = manager
            .retrieve(&SessionHandle("absent".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidChallenge));
    }

    #[test]
    fn stale_challenge_is_expired() {
        let manager = manager();
        // 301s old against a 300s limit.
        let issued_at = Utc::now() - Duration::seconds(301);
        let err = manager.validate_freshness(issued_at).unwrap_err();
        assert!(matches!(err, AuthError::ChallengeExpired));

        // Just inside the limit passes.
        let issued_at = Utc::now() - Duration::seconds(299);
        manager.validate_freshness(issued_at).unwrap();
    }

    #[tokio::test]
    async fn second_consumption_is_a_replay() {
        let manager = manager();
        let challenge = manager.issue();

        manager.consume_once(challenge.as_str()).await.unwrap();
        let err = manager.consume_once(challenge.as_str()).await.unwrap_err();
        assert!(matches!(err, AuthError::ChallengeReplayed));
    }

    #[tokio::test]
    async fn different_challenges_consume_independently() {
        let manager = manager();
        let a = manager.issue();
        let b = manager.issue();
        manager.consume_once(a.as_str()).await.unwrap();
        manager.consume_once(b.as_str()).await.unwrap();
    }
}
