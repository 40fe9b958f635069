//! Settings for the verification core
//!
//! Serde-backed settings with sensible defaults for every field, loadable
//! from a TOML file. Each service takes only the section it needs, so tests
//! can construct sections directly.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::errors::AuthError;

/// Top-level settings, one section per service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeywardenSettings {
    #[serde(default)]
    pub webauthn: WebAuthnSettings,
    #[serde(default)]
    pub challenge: ChallengeSettings,
    #[serde(default)]
    pub totp: TotpSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

impl KeywardenSettings {
    /// Load settings: TOML file if `path` is given, then environment
    /// variable overrides on top.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the file cannot be read or parsed.
    pub fn load(path: Option<&str>) -> Result<Self, AuthError> {
        let mut settings = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Load settings from a TOML file.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the file cannot be read or parsed.
    pub fn from_toml_file(path: &str) -> Result<Self, AuthError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| AuthError::ConfigurationError(format!("cannot read {path}: {e}")))?;
        basic_toml::from_str(&contents)
            .map_err(|e| AuthError::ConfigurationError(format!("cannot parse {path}: {e}")))
    }

    /// Apply `KEYWARDEN_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(rp_id) = std::env::var("KEYWARDEN_RP_ID") {
            self.webauthn.rp_id = rp_id;
        }
        if let Ok(rp_name) = std::env::var("KEYWARDEN_RP_NAME") {
            self.webauthn.rp_name = rp_name;
        }
        if let Ok(origin) = std::env::var("KEYWARDEN_ORIGIN") {
            self.webauthn.origin = origin;
        }
        if let Ok(dev_mode) = std::env::var("KEYWARDEN_DEV_MODE") {
            self.webauthn.dev_mode = dev_mode == "true" || dev_mode == "1";
        }
    }
}

/// Relying-party settings for WebAuthn ceremonies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnSettings {
    /// Relying Party ID (usually the domain)
    pub rp_id: String,
    /// Relying Party name (displayed to user)
    pub rp_name: String,
    /// Configured origin (e.g. <https://example.com>)
    pub origin: String,
    /// Development mode: tolerate the request origin alongside the
    /// configured one (varying local ports). Never enable in production.
    pub dev_mode: bool,
    /// Timeout in seconds passed to the client in ceremony options
    pub timeout_seconds: u64,
    /// User verification preference ("required", "preferred", "discouraged")
    pub user_verification: String,
    /// Optional authenticator attachment ("platform", "cross-platform")
    pub authenticator_attachment: Option<String>,
}

impl Default for WebAuthnSettings {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "Keywarden".to_string(),
            origin: "http://localhost:8080".to_string(),
            dev_mode: false,
            timeout_seconds: 60,
            user_verification: "preferred".to_string(),
            authenticator_attachment: None,
        }
    }
}

/// Challenge lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSettings {
    /// Maximum age of a bound challenge before it is rejected as expired
    pub max_age_seconds: u64,
    /// TTL of the single-use consumption marker; must cover `max_age_seconds`
    pub marker_ttl_seconds: u64,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            max_age_seconds: 300,
            marker_ttl_seconds: 600,
        }
    }
}

/// One-time-code settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotpSettings {
    /// Number of digits in a generated code
    pub digits: u32,
    /// Code validity period in seconds; also the stored record's TTL
    pub period_seconds: u64,
    /// Wrong attempts allowed before the record is deleted
    pub max_attempts: u32,
}

impl Default for TotpSettings {
    fn default() -> Self {
        Self {
            digits: 6,
            period_seconds: 300,
            max_attempts: 5,
        }
    }
}

/// Optimistic-concurrency retry settings for the counter store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Retries after a detected version conflict before surfacing an error
    pub max_retries: u32,
    /// Base backoff in milliseconds; grows linearly with the attempt number
    pub backoff_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_complete() {
        let settings = KeywardenSettings::default();
        assert_eq!(settings.challenge.max_age_seconds, 300);
        assert_eq!(settings.totp.digits, 6);
        assert_eq!(settings.totp.max_attempts, 5);
        assert_eq!(settings.store.max_retries, 3);
        assert!(!settings.webauthn.dev_mode);
        // The marker must outlive the challenge it guards.
        assert!(settings.challenge.marker_ttl_seconds >= settings.challenge.max_age_seconds);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[webauthn]
rp_id = "example.com"
rp_name = "Example"
origin = "https://example.com"
dev_mode = false
timeout_seconds = 120
user_verification = "required"
"#
        )
        .unwrap();

        let settings = KeywardenSettings::from_toml_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.webauthn.rp_id, "example.com");
        assert_eq!(settings.webauthn.timeout_seconds, 120);
        assert_eq!(settings.challenge.max_age_seconds, 300);
    }

    #[test]
    fn load_without_a_file_uses_defaults() {
        let settings = KeywardenSettings::load(None).unwrap();
        assert_eq!(settings.webauthn.rp_name, "Keywarden");
    }

    #[test]
    fn unreadable_file_is_a_configuration_error() {
        let err = KeywardenSettings::from_toml_file("/nonexistent/keywarden.toml").unwrap_err();
        assert!(matches!(err, AuthError::ConfigurationError(_)));
    }
}
