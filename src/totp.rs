//! One-time verification codes
//!
//! Time-based codes for email and step-up verification flows. Each issuance
//! draws a fresh random secret, stores one live record per
//! `(purpose, identifier)` key, and returns the current code; verification
//! is single use, attempt limited, and tolerant of one period of clock
//! skew in either direction.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use log::debug;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::errors::AuthError;
use crate::settings::TotpSettings;
use crate::store::{KvStore, PutOptions};

type HmacSha256 = Hmac<Sha256>;

const SECRET_LEN: usize = 20;

/// What a verification code authorizes. Closed set; the stored purpose
/// must match at verification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    Signup,
    PasskeyAdd,
    PasskeyDelete,
    EmailChange,
    AccountDelete,
    Recovery,
}

impl Purpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Signup => "signup",
            Purpose::PasskeyAdd => "passkey-add",
            Purpose::PasskeyDelete => "passkey-delete",
            Purpose::EmailChange => "email-change",
            Purpose::AccountDelete => "account-delete",
            Purpose::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored state for one live code.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CodeRecord {
    secret: Vec<u8>,
    expire_at: DateTime<Utc>,
    attempts: u32,
    purpose: Purpose,
    metadata: serde_json::Value,
}

/// Issues and verifies one-time codes over the key-value store.
pub struct TotpService {
    kv: Arc<dyn KvStore>,
    settings: TotpSettings,
}

impl TotpService {
    pub fn new(kv: Arc<dyn KvStore>, settings: TotpSettings) -> Self {
        Self { kv, settings }
    }

    /// Issue a fresh code for `(purpose, identifier)`, replacing any live
    /// record under the same key. Delivery of the code is the caller's
    /// concern.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the record cannot be stored.
    pub async fn issue(
        &self,
        identifier: &str,
        purpose: Purpose,
        metadata: serde_json::Value,
    ) -> Result<String, AuthError> {
        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);

        let record = CodeRecord {
            secret: secret.clone(),
            expire_at: Utc::now() + Duration::seconds(self.period_i64()),
            attempts: 0,
            purpose,
            metadata,
        };
        self.put_record(identifier, purpose, &record, self.settings.period_seconds)
            .await?;

        let code = hotp(&secret, current_counter(self.settings.period_seconds), self.settings.digits);
        debug!("issued {purpose} code for identifier");
        Ok(code)
    }

    /// Verify a candidate code, consuming the record on success.
    ///
    /// # Errors
    /// `PurposeMismatch` when the stored purpose differs;
    /// `MaxAttemptsReached` (record deleted) at the attempt limit;
    /// `CodeExpired` (record deleted) past expiry; `InvalidCode` on
    /// mismatch or when no live record exists; `StorageUnavailable` on
    /// store failure.
    pub async fn verify(
        &self,
        identifier: &str,
        candidate: &str,
        purpose: Purpose,
    ) -> Result<serde_json::Value, AuthError> {
        let key = record_key(purpose, identifier);
        let Some(bytes) = self.kv.get(&key).await? else {
            return Err(AuthError::InvalidCode);
        };
        let mut record: CodeRecord =
            serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidCode)?;

        if record.purpose != purpose {
            return Err(AuthError::PurposeMismatch);
        }

        if record.attempts >= self.settings.max_attempts {
            self.kv.delete(&key).await?;
            return Err(AuthError::MaxAttemptsReached);
        }

        let now = Utc::now();
        if now > record.expire_at {
            self.kv.delete(&key).await?;
            return Err(AuthError::CodeExpired);
        }

        if !self.code_matches(&record.secret, candidate) {
            record.attempts += 1;
            if record.attempts >= self.settings.max_attempts {
                // Last allowed attempt just failed; nothing left to keep.
                self.kv.delete(&key).await?;
                return Err(AuthError::MaxAttemptsReached);
            }
            let remaining = (record.expire_at - now).num_seconds().max(1);
            self.put_record(
                identifier,
                purpose,
                &record,
                u64::try_from(remaining).unwrap_or(1),
            )
            .await?;
            return Err(AuthError::InvalidCode);
        }

        // Single use: a matching code consumes the record.
        self.kv.delete(&key).await?;
        Ok(record.metadata)
    }

    /// Compare against the current period and one on either side.
    fn code_matches(&self, secret: &[u8], candidate: &str) -> bool {
        let counter = current_counter(self.settings.period_seconds);
        [counter, counter.saturating_sub(1), counter + 1]
            .into_iter()
            .any(|c| constant_time_eq(hotp(secret, c, self.settings.digits).as_bytes(), candidate.as_bytes()))
    }

    async fn put_record(
        &self,
        identifier: &str,
        purpose: Purpose,
        record: &CodeRecord,
        ttl_seconds: u64,
    ) -> Result<(), AuthError> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| AuthError::ConfigurationError(format!("unencodable code record: {e}")))?;
        self.kv
            .put(&record_key(purpose, identifier), &bytes, PutOptions::ttl(ttl_seconds))
            .await?;
        Ok(())
    }

    fn period_i64(&self) -> i64 {
        i64::try_from(self.settings.period_seconds).unwrap_or(i64::MAX)
    }
}

fn record_key(purpose: Purpose, identifier: &str) -> String {
    format!("code:{purpose}:{identifier}")
}

/// Counter for the current time window: `floor(unixMillis / 1000 / period)`.
fn current_counter(period_seconds: u64) -> u64 {
    let unix_seconds = u64::try_from(Utc::now().timestamp_millis() / 1000).unwrap_or(0);
    unix_seconds / period_seconds.max(1)
}

/// RFC 4226 dynamic truncation over HMAC-SHA256.
///
/// Low nibble of the last byte is the offset; four bytes from there with
/// the top bit masked, modulo `10^digits`, zero padded.
fn hotp(secret: &[u8], counter: u64, digits: u32) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&counter.to_be_bytes());
    let result = mac.finalize().into_bytes();

    let offset = usize::from(result[result.len() - 1] & 0x0F);
    let code = (u32::from(result[offset] & 0x7F) << 24)
        | (u32::from(result[offset + 1]) << 16)
        | (u32::from(result[offset + 2]) << 8)
        | u32::from(result[offset + 3]);

    let modulus = 10u32.pow(digits);
    format!("{:0>width$}", code % modulus, width = digits as usize)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
