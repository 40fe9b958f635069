//! Origin and Relying Party resolution
//!
//! Computes the canonical rpId and the allowed-origin set for a ceremony.
//! Origin membership is an exact-match test; there is no wildcard or
//! suffix matching anywhere in this module.

use std::collections::HashSet;

use log::debug;
use url::Url;

/// Canonical rpId for a request host.
///
/// Loopback hosts collapse to the literal `"localhost"` so credentials
/// registered against any loopback spelling keep working; every other host
/// is returned unchanged.
#[must_use]
pub fn resolve_rp_id(request_host: &str) -> String {
    let lowered = request_host.to_ascii_lowercase();
    // Bracketed IPv6 hosts keep their colons; only split a port off the rest.
    let host = if let Some(rest) = lowered.strip_prefix('[') {
        rest.split_once(']').map_or(rest, |(h, _)| h)
    } else if lowered.matches(':').count() > 1 {
        lowered.as_str()
    } else {
        lowered.split_once(':').map_or(lowered.as_str(), |(h, _)| h)
    };
    match host {
        "localhost" | "127.0.0.1" | "::1" => "localhost".to_string(),
        _ => host.to_string(),
    }
}

/// The set of origins a ceremony will accept.
///
/// Production mode is strict: only the configured origin. Development mode
/// additionally admits the request origin, tolerating varying local ports.
#[must_use]
pub fn resolve_allowed_origins(
    configured_origin: &str,
    request_origin: Option<&str>,
    dev_mode: bool,
) -> HashSet<String> {
    let mut allowed = HashSet::new();
    allowed.insert(normalize_origin(configured_origin));

    if dev_mode {
        if let Some(origin) = request_origin {
            let origin = normalize_origin(origin);
            if allowed.insert(origin.clone()) {
                debug!("dev mode: admitting request origin {origin}");
            }
        }
    }

    allowed
}

/// Exact-match membership test against the allowed set.
#[must_use]
pub fn validate_origin(candidate: &str, allowed: &HashSet<String>) -> bool {
    allowed.contains(&normalize_origin(candidate))
}

/// Canonicalize an origin string (scheme + host + explicit-only port).
///
/// Unparseable values pass through unchanged so they can only ever match
/// themselves exactly.
fn normalize_origin(origin: &str) -> String {
    Url::parse(origin).map_or_else(
        |_| origin.to_string(),
        |url| url.origin().ascii_serialization(),
    )
}
