//! Domain authorization.
//!
//! Pure decision function; a deny carries no side effect here. Callers
//! hand denials to the reputation/tamper paths, since an unauthorized
//! domain is suspicious but not automatically a tamper event.

use crate::registry::License;
use chrono::{DateTime, Utc};

/// Hosts that always pass, for local development.
fn is_local_development(host: &str) -> bool {
    if host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1" {
        return true;
    }
    // localhost:3000 and friends.
    if let Some((name, port)) = host.rsplit_once(':') {
        if port.chars().all(|c| c.is_ascii_digit()) && is_local_development(name) {
            return true;
        }
    }
    host.ends_with(".local") || host.ends_with(".test")
}

/// Decide whether `request_domain` may run under `license`.
///
/// Precedence, first match wins:
/// 1. local-development allowlist
/// 2. unexpired dev-mode window
/// 3. staging domain match
/// 4. exact production domain match
pub fn authorize(request_domain: &str, license: &License, now: DateTime<Utc>) -> bool {
    let host = request_domain.trim();
    if host.is_empty() {
        return false;
    }

    if is_local_development(host) {
        return true;
    }

    if let Some(expiry) = license.dev_mode_expiry {
        if expiry > now {
            return true;
        }
    }

    if license.staging_domain.as_deref() == Some(host) {
        return true;
    }

    license.domain == host
}
