//! Vigil Common - Shared contract between the engine and subscriber edges
//!
//! Every party that publishes or consumes Vigil broadcast traffic (the
//! engine itself, protected client edges, admin consoles, the global
//! blacklist mirror) compiles against the types in this crate, so the
//! event vocabulary is checked at compile time instead of being an
//! untyped object per subscriber.

pub mod events;
pub mod wire;

pub use events::{AdminEvent, GlobalThreatEvent, LicenseEvent};
pub use wire::{
    BreachReport, HeartbeatRequest, HeartbeatResponse, HeartbeatStatus, IntegritySignals,
    ProbeResponse, ProbeStatus,
};

/// NATS subject carrying admin-wide security events.
pub const ADMIN_SUBJECT: &str = "vigil.admin.alerts";

/// NATS subject mirrored to every protected edge.
pub const GLOBAL_THREAT_SUBJECT: &str = "vigil.threats.global";

/// Private per-license subject.
pub fn license_subject(license_key: &str) -> String {
    format!("vigil.license.{license_key}")
}
