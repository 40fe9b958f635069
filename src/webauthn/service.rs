//! WebAuthn service facade
//!
//! Wires the settings, the origin/relying-party resolver, and the device
//! metadata directory around the two verifiers, and produces the ceremony
//! options payloads the routing layer sends to the client.
//!
//! The intended flow: the caller draws and binds a challenge through the
//! [`crate::challenge::ChallengeManager`], sends options to the client,
//! then hands the signed response (plus, for authentication, the stored
//! credential) to `verify_registration` / `verify_authentication` and
//! persists the typed result.

use std::sync::Arc;

use super::assertion;
use super::attestation::{self, Expected};
use super::types::{
    AuthenticationOptions, AuthenticationOutcome, AuthenticationResponse,
    AuthenticatorSelectionCriteria, Credential, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RegistrationOptions, RegistrationResponse, RelyingParty,
    UserEntity,
};
use crate::challenge::Challenge;
use crate::errors::AuthError;
use crate::metadata::DeviceMetadataDirectory;
use crate::rp;
use crate::settings::WebAuthnSettings;

/// Core WebAuthn verification service.
pub struct WebAuthnService {
    settings: WebAuthnSettings,
    directory: Arc<dyn DeviceMetadataDirectory>,
}

impl WebAuthnService {
    /// Create a new service from settings.
    ///
    /// # Errors
    /// Returns `ConfigurationError` if the relying party ID is empty or the
    /// configured origin is neither HTTPS nor localhost.
    pub fn new(
        settings: WebAuthnSettings,
        directory: Arc<dyn DeviceMetadataDirectory>,
    ) -> Result<Self, AuthError> {
        if settings.rp_id.is_empty() {
            return Err(AuthError::ConfigurationError(
                "Relying party ID cannot be empty".into(),
            ));
        }
        if !settings.origin.starts_with("https://")
            && !settings.origin.starts_with("http://localhost")
        {
            return Err(AuthError::ConfigurationError(
                "Origin must be https:// except for localhost".into(),
            ));
        }
        Ok(Self {
            settings,
            directory,
        })
    }

    /// Resolve the expected values for a ceremony from the request context.
    ///
    /// `request_host` feeds rpId resolution (loopback collapses to
    /// `localhost`); `request_origin` only widens the allowed set in dev
    /// mode.
    #[must_use]
    pub fn expected(
        &self,
        challenge: &str,
        request_host: Option<&str>,
        request_origin: Option<&str>,
    ) -> Expected {
        let rp_id = request_host.map_or_else(
            || self.settings.rp_id.clone(),
            rp::resolve_rp_id,
        );
        let origins = rp::resolve_allowed_origins(
            &self.settings.origin,
            request_origin,
            self.settings.dev_mode,
        );
        Expected {
            challenge: challenge.to_string(),
            origins,
            rp_id,
        }
    }

    /// Registration options for a new credential.
    #[must_use]
    pub fn registration_options(
        &self,
        challenge: &Challenge,
        user_handle: &str,
        user_name: &str,
        display_name: &str,
    ) -> RegistrationOptions {
        RegistrationOptions {
            challenge: challenge.as_str().to_string(),
            rp: RelyingParty {
                id: self.settings.rp_id.clone(),
                name: self.settings.rp_name.clone(),
            },
            user: UserEntity {
                id: user_handle.to_string(),
                name: user_name.to_string(),
                display_name: display_name.to_string(),
            },
            public_key_params: vec![PublicKeyCredentialParameters {
                r#type: "public-key".to_string(),
                alg: -7, // ES256; the verifier accepts nothing else
            }],
            timeout: timeout_millis(self.settings.timeout_seconds),
            attestation: "none".to_string(),
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: self.settings.authenticator_attachment.clone(),
                require_resident_key: false,
                user_verification: self.settings.user_verification.clone(),
            },
        }
    }

    /// Authentication options against a set of known credentials.
    #[must_use]
    pub fn authentication_options(
        &self,
        challenge: &Challenge,
        credentials: &[Credential],
    ) -> AuthenticationOptions {
        AuthenticationOptions {
            challenge: challenge.as_str().to_string(),
            timeout: timeout_millis(self.settings.timeout_seconds),
            rp_id: self.settings.rp_id.clone(),
            allow_credentials: credentials
                .iter()
                .map(|c| PublicKeyCredentialDescriptor {
                    r#type: "public-key".to_string(),
                    id: c.credential_id.clone(),
                })
                .collect(),
            user_verification: self.settings.user_verification.clone(),
        }
    }

    /// Verify a registration response and extract the storable credential.
    ///
    /// # Errors
    /// Returns the typed verification error of the first failed check.
    pub async fn verify_registration(
        &self,
        response: &RegistrationResponse,
        expected: &Expected,
    ) -> Result<Credential, AuthError> {
        attestation::verify_registration(response, expected, self.directory.as_ref()).await
    }

    /// Verify an authentication response against the stored credential.
    ///
    /// # Errors
    /// Returns the typed verification error of the first failed check.
    pub fn verify_authentication(
        &self,
        response: &AuthenticationResponse,
        expected: &Expected,
        credential: &Credential,
    ) -> Result<AuthenticationOutcome, AuthError> {
        assertion::verify_authentication(response, expected, credential)
    }
}

fn timeout_millis(seconds: u64) -> u32 {
    seconds
        .checked_mul(1000)
        .and_then(|millis| u32::try_from(millis).ok())
        .unwrap_or(60_000)
}
