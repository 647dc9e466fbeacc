//! Broadcast event vocabulary.
//!
//! One closed enum per channel. The `event` tag on the wire matches the
//! channel event names consumed by the edges (`system-release`,
//! `ip-banned`, `global-ban`, ...), so a subscriber that only cares
//! about one variant can still deserialize the whole channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Events on a license's private channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LicenseEvent {
    /// Any committed status transition on this license.
    StatusChanged {
        license_key: String,
        from: String,
        to: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Enforcement permanently disengaged for this license.
    SystemRelease {
        license_key: String,
        actor: String,
        timestamp: DateTime<Utc>,
    },
    /// A clean snapshot was pushed as part of a heal/recovery.
    SystemRestore {
        license_key: String,
        snapshot_id: Uuid,
        actor: String,
        timestamp: DateTime<Utc>,
    },
}

/// Events on the admin-wide channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AdminEvent {
    /// An IP crossed the auto-block threshold. Emitted exactly once
    /// per threshold crossing.
    IpBanned {
        ip: IpAddr,
        attempts: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A security-relevant license transition (tamper, lock, suspend).
    SecurityAlert {
        license_key: String,
        status: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },
    /// A confirmed hostile act attributed to a source.
    HackerDetected {
        ip: IpAddr,
        license_key: Option<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Events mirrored to every protected edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GlobalThreatEvent {
    /// Permanent cross-deployment ban.
    GlobalBan {
        ip: IpAddr,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// New registry entry that edges should cache.
    NewThreat {
        ip: IpAddr,
        reason: String,
        proxy_or_vpn: bool,
        country: Option<String>,
        timestamp: DateTime<Utc>,
    },
}
