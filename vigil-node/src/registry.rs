//! Authoritative license registry and status state machine.
//!
//! Each license lives in a concurrent map keyed by its opaque key;
//! every mutation happens under the map's per-key lock, which
//! linearizes transitions within one license. Across licenses there is
//! no ordering, and none is needed.

use crate::error::{Result, VigilError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// License trust states. No other value is ever observable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseStatus {
    Active,
    Expired,
    Suspended,
    Tampered,
    Locked,
    Released,
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LicenseStatus::Active => "ACTIVE",
            LicenseStatus::Expired => "EXPIRED",
            LicenseStatus::Suspended => "SUSPENDED",
            LicenseStatus::Tampered => "TAMPERED",
            LicenseStatus::Locked => "LOCKED",
            LicenseStatus::Released => "RELEASED",
        };
        f.write_str(s)
    }
}

/// A license and its enforcement state.
///
/// `key` and `domain` are immutable after issuance; only
/// `staging_domain` and `dev_mode_expiry` may be edited, everything
/// else moves through `LicenseRegistry` operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct License {
    pub id: Uuid,
    /// Opaque key, unique, immutable once issued.
    pub key: String,
    /// Authorized production domain, immutable after issuance.
    pub domain: String,
    pub staging_domain: Option<String>,
    /// Time-boxed exemption from strict domain matching.
    pub dev_mode_expiry: Option<DateTime<Utc>>,
    pub status: LicenseStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Reference to the clean encrypted snapshot used for heal.
    pub clean_snapshot: Option<String>,
    /// Metadata of the last transition.
    pub status_reason: Option<String>,
    pub status_changed_at: DateTime<Utc>,
    pub status_changed_by: Option<String>,
}

impl License {
    /// Whether the license has been silent beyond `window`, guarding
    /// against false positives on licenses younger than the window.
    pub fn is_silent(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        if self.status != LicenseStatus::Active {
            return false;
        }
        if now - self.created_at <= window {
            return false;
        }
        let last_seen = self.last_heartbeat.unwrap_or(self.created_at);
        now - last_seen > window
    }
}

/// Record of a committed status transition.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub license: License,
    pub from: LicenseStatus,
    pub to: LicenseStatus,
    pub reason: String,
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

/// Outcome of the heartbeat write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// `last_heartbeat` updated, license is ACTIVE.
    Updated,
    /// Status is not ACTIVE; nothing was written. A racing LOCKED or
    /// RELEASED transition therefore can never be resurrected.
    Skipped(LicenseStatus),
}

/// Legal transitions of the state machine.
fn transition_allowed(from: LicenseStatus, to: LicenseStatus) -> bool {
    use LicenseStatus::*;
    match (from, to) {
        // RELEASED is terminal.
        (Released, _) => false,
        // Explicit, irreversible disengagement.
        (_, Released) => true,
        // Panic switch from anywhere.
        (_, Locked) => true,
        (Active, Expired) => true,
        (Active, Tampered) => true,
        (Active | Expired | Tampered, Suspended) => true,
        // Heal after a successful restore broadcast.
        (Tampered | Locked, Active) => true,
        _ => false,
    }
}

/// Concurrent license store with per-key atomic transitions.
#[derive(Debug, Default)]
pub struct LicenseRegistry {
    licenses: DashMap<String, License>,
}

impl LicenseRegistry {
    pub fn new() -> Self {
        Self {
            licenses: DashMap::new(),
        }
    }

    /// Issue a new license in ACTIVE state.
    pub fn issue(
        &self,
        key: &str,
        domain: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<License> {
        if domain.trim().is_empty() {
            return Err(VigilError::Validation("domain cannot be empty".to_string()));
        }
        let license = License {
            id: Uuid::new_v4(),
            key: key.to_string(),
            domain: domain.to_string(),
            staging_domain: None,
            dev_mode_expiry: None,
            status: LicenseStatus::Active,
            last_heartbeat: None,
            created_at: now,
            expires_at,
            clean_snapshot: None,
            status_reason: Some("issued".to_string()),
            status_changed_at: now,
            status_changed_by: None,
        };

        match self.licenses.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(VigilError::Validation(format!(
                "license key already exists: {key}"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(license.clone());
                info!(license_key = %key, domain = %domain, "License issued");
                Ok(license)
            }
        }
    }

    /// Read a license, applying lazy expiry first. Returns the record
    /// together with the expiry transition if this read detected one.
    pub fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<(License, Option<TransitionRecord>)> {
        let mut entry = self
            .licenses
            .get_mut(key)
            .ok_or_else(|| VigilError::NotFound(format!("unknown license key: {key}")))?;

        let expired = matches!(
            (entry.status, entry.expires_at),
            (LicenseStatus::Active, Some(at)) if now > at
        );

        if !expired {
            return Ok((entry.clone(), None));
        }

        let from = entry.status;
        entry.status = LicenseStatus::Expired;
        entry.status_reason = Some("expiry reached".to_string());
        entry.status_changed_at = now;
        entry.status_changed_by = None;
        debug!(license_key = %key, "License lazily expired on read");

        let record = TransitionRecord {
            license: entry.clone(),
            from,
            to: LicenseStatus::Expired,
            reason: "expiry reached".to_string(),
            actor: None,
            at: now,
        };
        Ok((entry.clone(), Some(record)))
    }

    /// Find the license responsible for a host (exact or staging match).
    pub fn find_by_host(&self, host: &str) -> Option<License> {
        self.licenses
            .iter()
            .find(|entry| {
                entry.domain == host || entry.staging_domain.as_deref() == Some(host)
            })
            .map(|entry| entry.clone())
    }

    /// Every license serving a host, production or staging. Breach
    /// handling suspends all of them, not just the first match.
    pub fn matching_host(&self, host: &str) -> Vec<License> {
        self.licenses
            .iter()
            .filter(|entry| {
                entry.domain == host || entry.staging_domain.as_deref() == Some(host)
            })
            .map(|entry| entry.clone())
            .collect()
    }

    /// Commit a status transition atomically with its trigger
    /// metadata. Disallowed edges of the state machine are rejected
    /// without mutating anything.
    pub fn transition(
        &self,
        key: &str,
        to: LicenseStatus,
        reason: &str,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord> {
        let mut entry = self
            .licenses
            .get_mut(key)
            .ok_or_else(|| VigilError::NotFound(format!("unknown license key: {key}")))?;

        let from = entry.status;
        if from == to {
            return Err(VigilError::Validation(format!(
                "license {key} is already {to}"
            )));
        }
        if !transition_allowed(from, to) {
            return Err(VigilError::Validation(format!(
                "illegal transition {from} -> {to} for license {key}"
            )));
        }

        entry.status = to;
        entry.status_reason = Some(reason.to_string());
        entry.status_changed_at = now;
        entry.status_changed_by = actor.map(str::to_string);

        info!(
            license_key = %key,
            from = %from,
            to = %to,
            reason = %reason,
            actor = actor.unwrap_or("system"),
            "License transition committed"
        );

        Ok(TransitionRecord {
            license: entry.clone(),
            from,
            to,
            reason: reason.to_string(),
            actor: actor.map(str::to_string),
            at: now,
        })
    }

    /// Heartbeat write path: update `last_heartbeat` only if the
    /// status, re-read under the same per-key lock, is still ACTIVE.
    pub fn touch(&self, key: &str, now: DateTime<Utc>) -> Result<TouchOutcome> {
        let mut entry = self
            .licenses
            .get_mut(key)
            .ok_or_else(|| VigilError::NotFound(format!("unknown license key: {key}")))?;

        if entry.status != LicenseStatus::Active {
            return Ok(TouchOutcome::Skipped(entry.status));
        }
        // Last-write-wins is fine for racing heartbeats.
        entry.last_heartbeat = Some(now);
        Ok(TouchOutcome::Updated)
    }

    /// Update the staging domain (the production domain is immutable).
    pub fn set_staging_domain(&self, key: &str, staging: Option<String>) -> Result<License> {
        let mut entry = self
            .licenses
            .get_mut(key)
            .ok_or_else(|| VigilError::NotFound(format!("unknown license key: {key}")))?;
        entry.staging_domain = staging;
        Ok(entry.clone())
    }

    /// Grant or clear the time-boxed dev-mode window.
    pub fn set_dev_mode_expiry(
        &self,
        key: &str,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<License> {
        let mut entry = self
            .licenses
            .get_mut(key)
            .ok_or_else(|| VigilError::NotFound(format!("unknown license key: {key}")))?;
        entry.dev_mode_expiry = expiry;
        Ok(entry.clone())
    }

    /// Attach the clean-snapshot reference used by heal.
    pub fn set_clean_snapshot(&self, key: &str, blob: Option<String>) -> Result<()> {
        let mut entry = self
            .licenses
            .get_mut(key)
            .ok_or_else(|| VigilError::NotFound(format!("unknown license key: {key}")))?;
        entry.clean_snapshot = blob;
        Ok(())
    }

    /// Licenses that have crossed the silence window.
    pub fn silent_licenses(&self, now: DateTime<Utc>, window: chrono::Duration) -> Vec<License> {
        self.licenses
            .iter()
            .filter(|entry| entry.is_silent(now, window))
            .map(|entry| entry.clone())
            .collect()
    }

    /// Point-in-time export for the snapshot engine.
    pub fn export(&self) -> Vec<License> {
        let mut all: Vec<License> = self.licenses.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Apply a restored export set. Licenses currently LOCKED are left
    /// untouched: an automated restore must never undo a panic lock.
    /// Returns how many records were applied.
    pub fn apply_import(&self, licenses: Vec<License>) -> usize {
        let mut applied = 0;
        for license in licenses {
            match self.licenses.entry(license.key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                    if slot.get().status == LicenseStatus::Locked {
                        warn!(
                            license_key = %license.key,
                            "Restore skipped: license is LOCKED, manual intervention required"
                        );
                        continue;
                    }
                    slot.insert(license);
                    applied += 1;
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(license);
                    applied += 1;
                }
            }
        }
        applied
    }

    pub fn len(&self) -> usize {
        self.licenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.licenses.is_empty()
    }
}
