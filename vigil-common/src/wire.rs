//! HTTP wire types for the public engine surface.

use serde::{Deserialize, Serialize};

/// Client-observed integrity signals attached to a heartbeat.
///
/// These are advisory. The engine is the only party that commits a
/// tamper transition after cross-checking them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegritySignals {
    /// Computed style flags the guard saw on protected content
    /// (e.g. `visibility`, `opacity`, `display`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_styles: Option<ComputedStyles>,
    /// Whether the client-side guard script finished mounting before
    /// protected content was rendered.
    #[serde(default)]
    pub script_did_mount: bool,
    /// Content hash pair the guard observed, `(expected, observed)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_fingerprint: Option<(String, String)>,
    /// Blocked-but-attempted developer-tool key combination or
    /// context-menu/view-source attempt.
    #[serde(default)]
    pub devtools_attempted: bool,
}

/// Forced-visibility CSS properties reported by the guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputedStyles {
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub opacity: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
}

/// Heartbeat check-in from a protected client instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub license_key: String,
    /// Freshness token from the previous heartbeat. Absent only on the
    /// very first check-in after issuance.
    #[serde(default)]
    pub token: Option<String>,
    /// Origin the client believes it is running on.
    pub host: String,
    #[serde(default)]
    pub signals: Option<IntegritySignals>,
}

/// Heartbeat verdict returned to the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeartbeatStatus {
    Ok,
    Invalid,
    TokenExpired,
    Tampered,
    Suspended,
    Expired,
    Locked,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: HeartbeatStatus,
    /// Fresh token, present only on `OK`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// How long (seconds) a client may fail open when the engine is
    /// unreachable. Policy knob, surfaced so clients never hardcode it.
    pub grace_period_seconds: u64,
}

/// Domain/integrity probe verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeStatus {
    Secure,
    Tampered,
    BlockedDomain,
    InvalidRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: ProbeStatus,
}

/// Self-reported breach notification from an edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreachReport {
    /// Always `BREACH_DEPLOYED` today; kept open for future kinds.
    pub event: String,
    pub host: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_status_uses_screaming_snake_case() {
        let json = serde_json::to_string(&HeartbeatStatus::TokenExpired).unwrap();
        assert_eq!(json, "\"TOKEN_EXPIRED\"");
    }

    #[test]
    fn heartbeat_request_token_is_optional() {
        let req: HeartbeatRequest = serde_json::from_str(
            r#"{"license_key":"VGL-1","host":"a.com"}"#,
        )
        .unwrap();
        assert!(req.token.is_none());
        assert!(req.signals.is_none());
    }
}
