//! Tamper detection and the append-only forensic ledger.
//!
//! Client-observed signals are advisory; only the engine commits a
//! TAMPERED transition, after cross-checking the signal against the
//! license's status and domain authorization. Each committed
//! transition produces exactly one forensic event.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::RwLock;
use tracing::warn;
use uuid::Uuid;
use vigil_common::wire::IntegritySignals;

use crate::registry::{License, LicenseStatus};

/// Detected integrity signal types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TamperSignal {
    DomMutation,
    DevtoolsKey,
    CssOverride,
    HeartbeatGap,
}

impl std::fmt::Display for TamperSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TamperSignal::DomMutation => "DOM_MUTATION",
            TamperSignal::DevtoolsKey => "DEVTOOLS_KEY",
            TamperSignal::CssOverride => "CSS_OVERRIDE",
            TamperSignal::HeartbeatGap => "HEARTBEAT_GAP",
        };
        f.write_str(s)
    }
}

/// Severity assigned per signal type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

/// Fixed severity table. Total: every signal maps to exactly one
/// severity, enforced by the exhaustive match.
pub fn severity_for(signal: TamperSignal) -> Severity {
    match signal {
        TamperSignal::DomMutation => Severity::High,
        TamperSignal::DevtoolsKey => Severity::Medium,
        TamperSignal::CssOverride => Severity::Critical,
        TamperSignal::HeartbeatGap => Severity::Critical,
    }
}

/// Forensic record of a confirmed integrity violation. Append-only,
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TamperEvent {
    pub id: Uuid,
    pub license_id: Uuid,
    pub license_key: String,
    pub source_ip: Option<IpAddr>,
    pub signal: TamperSignal,
    pub severity: Severity,
    /// `(expected, observed)` content fingerprints when available.
    pub fingerprint: Option<(String, String)>,
    pub detected_at: DateTime<Utc>,
}

impl TamperEvent {
    pub fn new(
        license: &License,
        signal: TamperSignal,
        source_ip: Option<IpAddr>,
        fingerprint: Option<(String, String)>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            license_id: license.id,
            license_key: license.key.clone(),
            source_ip,
            signal,
            severity: severity_for(signal),
            fingerprint,
            detected_at,
        }
    }
}

/// A tamper verdict the engine should commit.
#[derive(Debug, Clone, PartialEq)]
pub struct TamperVerdict {
    pub signal: TamperSignal,
    pub fingerprint: Option<(String, String)>,
}

/// Cross-check advisory client signals server-side.
///
/// Returns a verdict only when the license is ACTIVE and the reporting
/// deployment passed domain authorization; a re-parented staging
/// deployment that merely fails domain checks is handled by the
/// reputation path instead of being punished as tamper.
pub fn assess_signals(
    license: &License,
    signals: &IntegritySignals,
    domain_authorized: bool,
) -> Option<TamperVerdict> {
    if license.status != LicenseStatus::Active || !domain_authorized {
        return None;
    }

    // Protected content forced visible while the guard never mounted.
    if !signals.script_did_mount {
        if let Some(styles) = &signals.computed_styles {
            let forced_visible = styles.visibility.as_deref() == Some("visible")
                || styles.display.as_deref().is_some_and(|d| d != "none")
                || styles
                    .opacity
                    .as_deref()
                    .and_then(|o| o.parse::<f64>().ok())
                    .is_some_and(|o| o > 0.0);
            if forced_visible {
                return Some(TamperVerdict {
                    signal: TamperSignal::CssOverride,
                    fingerprint: signals.content_fingerprint.clone(),
                });
            }
        }
    }

    // Structural change: observed content hash differs from expected.
    if let Some((expected, observed)) = &signals.content_fingerprint {
        if expected != observed {
            return Some(TamperVerdict {
                signal: TamperSignal::DomMutation,
                fingerprint: Some((expected.clone(), observed.clone())),
            });
        }
    }

    if signals.devtools_attempted {
        return Some(TamperVerdict {
            signal: TamperSignal::DevtoolsKey,
            fingerprint: None,
        });
    }

    None
}

/// Append-only in-memory forensic ledger.
#[derive(Debug, Default)]
pub struct ForensicLog {
    // Append-only, so a poisoned lock still guards consistent data and
    // the guard is recovered instead of panicking.
    events: RwLock<Vec<TamperEvent>>,
}

impl ForensicLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event. There is no removal or mutation path.
    pub fn record(&self, event: TamperEvent) {
        warn!(
            license_key = %event.license_key,
            signal = %event.signal,
            severity = ?event.severity,
            source_ip = ?event.source_ip,
            "Tamper event recorded"
        );
        counter!("vigil_tamper_events_total", 1);
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    pub fn all(&self) -> Vec<TamperEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn for_license(&self, license_id: Uuid) -> Vec<TamperEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.license_id == license_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the ledger contents from a restored export set.
    pub fn apply_import(&self, events: Vec<TamperEvent>) {
        let mut guard = self.events.write().unwrap_or_else(|e| e.into_inner());
        *guard = events;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use vigil_common::wire::ComputedStyles;

    fn active_license() -> License {
        let now = Utc::now();
        License {
            id: Uuid::new_v4(),
            key: "VGL-1".to_string(),
            domain: "a.com".to_string(),
            staging_domain: None,
            dev_mode_expiry: None,
            status: LicenseStatus::Active,
            last_heartbeat: None,
            created_at: now,
            expires_at: None,
            clean_snapshot: None,
            status_reason: None,
            status_changed_at: now,
            status_changed_by: None,
        }
    }

    #[test]
    fn test_severity_table_matches_policy() {
        assert_eq!(severity_for(TamperSignal::DomMutation), Severity::High);
        assert_eq!(severity_for(TamperSignal::DevtoolsKey), Severity::Medium);
        assert_eq!(severity_for(TamperSignal::CssOverride), Severity::Critical);
        assert_eq!(severity_for(TamperSignal::HeartbeatGap), Severity::Critical);
    }

    #[test]
    fn test_forced_visibility_without_mounted_guard_is_css_override() {
        let license = active_license();
        let signals = IntegritySignals {
            computed_styles: Some(ComputedStyles {
                visibility: Some("visible".to_string()),
                opacity: Some("1".to_string()),
                display: None,
            }),
            script_did_mount: false,
            content_fingerprint: None,
            devtools_attempted: false,
        };
        let verdict = assess_signals(&license, &signals, true).unwrap();
        assert_eq!(verdict.signal, TamperSignal::CssOverride);
    }

    #[test]
    fn test_mounted_guard_downgrades_visibility_signal() {
        let license = active_license();
        let signals = IntegritySignals {
            computed_styles: Some(ComputedStyles {
                visibility: Some("visible".to_string()),
                opacity: Some("1".to_string()),
                display: None,
            }),
            script_did_mount: true,
            content_fingerprint: None,
            devtools_attempted: false,
        };
        assert!(assess_signals(&license, &signals, true).is_none());
    }

    #[test]
    fn test_fingerprint_mismatch_is_dom_mutation() {
        let license = active_license();
        let signals = IntegritySignals {
            computed_styles: None,
            script_did_mount: true,
            content_fingerprint: Some(("abc123".to_string(), "def456".to_string())),
            devtools_attempted: false,
        };
        let verdict = assess_signals(&license, &signals, true).unwrap();
        assert_eq!(verdict.signal, TamperSignal::DomMutation);
        assert_eq!(
            verdict.fingerprint,
            Some(("abc123".to_string(), "def456".to_string()))
        );
    }

    #[test]
    fn test_unauthorized_domain_is_not_tamper() {
        let license = active_license();
        let signals = IntegritySignals {
            computed_styles: None,
            script_did_mount: true,
            content_fingerprint: Some(("a".to_string(), "b".to_string())),
            devtools_attempted: true,
        };
        assert!(assess_signals(&license, &signals, false).is_none());
    }

    #[test]
    fn test_devtools_attempt_is_lowest_priority() {
        let license = active_license();
        let signals = IntegritySignals {
            computed_styles: None,
            script_did_mount: true,
            content_fingerprint: Some(("same".to_string(), "same".to_string())),
            devtools_attempted: true,
        };
        let verdict = assess_signals(&license, &signals, true).unwrap();
        assert_eq!(verdict.signal, TamperSignal::DevtoolsKey);
    }

    #[test]
    fn test_forensic_log_is_append_only() {
        let log = ForensicLog::new();
        let license = active_license();
        log.record(TamperEvent::new(
            &license,
            TamperSignal::HeartbeatGap,
            None,
            None,
            Utc::now(),
        ));
        log.record(TamperEvent::new(
            &license,
            TamperSignal::DevtoolsKey,
            Some("9.9.9.9".parse().unwrap()),
            None,
            Utc::now(),
        ));
        assert_eq!(log.len(), 2);
        assert_eq!(log.for_license(license.id).len(), 2);
        assert_eq!(log.for_license(Uuid::new_v4()).len(), 0);
    }

    #[test]
    fn test_forensic_log_survives_poisoned_lock() {
        let log = ForensicLog::new();
        let license = active_license();
        log.record(TamperEvent::new(
            &license,
            TamperSignal::HeartbeatGap,
            None,
            None,
            Utc::now(),
        ));

        // Panic while holding the write guard to poison the lock.
        let poisoner = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = log.events.write().unwrap();
            panic!("handler died mid-record");
        }));
        assert!(poisoner.is_err());

        // Recording and reading still work on the recovered guard.
        log.record(TamperEvent::new(
            &license,
            TamperSignal::DevtoolsKey,
            None,
            None,
            Utc::now(),
        ));
        assert_eq!(log.len(), 2);
        assert_eq!(log.all().len(), 2);
    }
}
