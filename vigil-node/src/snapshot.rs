//! Encrypted snapshot engine for disaster recovery.
//!
//! A snapshot is a canonical JSON export of the license registry,
//! reputation ledger, global threat registry and forensic log, sealed
//! with ChaCha20-Poly1305 under a key derived once from the configured
//! secret. Restore either returns exactly the protected export set or
//! fails closed; *when* to overwrite live state is the caller's call.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::crypto::{self, DerivedKey, KdfParams, SealedBlob};
use crate::error::{Result, VigilError};
use crate::registry::License;
use crate::reputation::{GlobalThreatEntry, ReputationRecord};
use crate::tamper::TamperEvent;

/// File extension marker for snapshot artifacts.
pub const SNAPSHOT_EXTENSION: &str = "vgsnap";

/// Point-in-time export of engine state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportSet {
    pub snapshot_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub licenses: Vec<License>,
    pub reputation: Vec<ReputationRecord>,
    pub global_threats: Vec<GlobalThreatEntry>,
    pub tamper_events: Vec<TamperEvent>,
}

impl ExportSet {
    pub fn new(
        licenses: Vec<License>,
        reputation: Vec<ReputationRecord>,
        global_threats: Vec<GlobalThreatEntry>,
        tamper_events: Vec<TamperEvent>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            snapshot_id: Uuid::new_v4(),
            created_at,
            licenses,
            reputation,
            global_threats,
            tamper_events,
        }
    }
}

/// Seals and opens snapshot blobs. Holds only the derived key; it
/// never decides when live state gets overwritten.
pub struct SnapshotEngine {
    key: DerivedKey,
}

impl SnapshotEngine {
    /// Derive the snapshot key from a configured secret and fixed
    /// salt. Slow by construction (Argon2id); call once at startup.
    pub fn from_secret(secret: &str, salt: &[u8; 16], params: &KdfParams) -> Result<Self> {
        let key = crypto::derive_key(secret, salt, params)?;
        Ok(Self { key })
    }

    /// Serialize and seal an export set with a fresh random nonce.
    pub fn create(&self, export: &ExportSet) -> Result<SealedBlob> {
        let plaintext = serde_json::to_vec(export)?;
        let blob = crypto::seal(&self.key, &plaintext)?;
        info!(
            snapshot_id = %export.snapshot_id,
            licenses = export.licenses.len(),
            reputation = export.reputation.len(),
            global_threats = export.global_threats.len(),
            tamper_events = export.tamper_events.len(),
            bytes = blob.ciphertext.len(),
            "Snapshot created"
        );
        counter!("vigil_snapshots_created_total", 1);
        Ok(blob)
    }

    /// Open and deserialize a snapshot blob. Any authentication
    /// failure surfaces as a `Crypto` error and nothing is returned;
    /// there is no partially decoded result.
    pub fn restore(&self, blob: &SealedBlob) -> Result<ExportSet> {
        let plaintext = crypto::open(&self.key, blob)?;
        let export: ExportSet = serde_json::from_slice(&plaintext)
            .map_err(|e| VigilError::Serialization(format!("snapshot payload: {e}")))?;
        info!(
            snapshot_id = %export.snapshot_id,
            created_at = %export.created_at,
            "Snapshot decrypted and verified"
        );
        counter!("vigil_snapshots_restored_total", 1);
        Ok(export)
    }
}

impl std::fmt::Debug for SnapshotEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SnapshotEngine { key: [REDACTED] }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LicenseRegistry;
    use crate::reputation::{GlobalThreatRegistry, ReputationLedger};
    use crate::tamper::ForensicLog;

    fn engine() -> SnapshotEngine {
        SnapshotEngine::from_secret("unit-test-secret", b"0123456789abcdef", &KdfParams::fast())
            .unwrap()
    }

    fn sample_export() -> ExportSet {
        let now = Utc::now();
        let registry = LicenseRegistry::new();
        registry.issue("VGL-1", "a.com", None, now).unwrap();
        registry.issue("VGL-2", "b.com", None, now).unwrap();

        let ledger = ReputationLedger::new(&[]);
        ledger.register_attempt("9.9.9.9".parse().unwrap(), "probe", 5, now);

        ExportSet::new(
            registry.export(),
            ledger.export(),
            GlobalThreatRegistry::new().export(),
            ForensicLog::new().all(),
            now,
        )
    }

    #[test]
    fn test_round_trip_is_deep_equal() {
        let engine = engine();
        let export = sample_export();
        let blob = engine.create(&export).unwrap();
        let restored = engine.restore(&blob).unwrap();
        assert_eq!(restored, export);
    }

    #[test]
    fn test_flipped_ciphertext_bit_fails_closed() {
        let engine = engine();
        let mut blob = engine.create(&sample_export()).unwrap();
        let mid = blob.ciphertext.len() / 2;
        blob.ciphertext[mid] ^= 0x40;
        assert!(matches!(
            engine.restore(&blob),
            Err(VigilError::Crypto(_))
        ));
    }

    #[test]
    fn test_flipped_tag_bit_fails_closed() {
        let engine = engine();
        let mut blob = engine.create(&sample_export()).unwrap();
        // The Poly1305 tag is the trailing 16 bytes of the ciphertext.
        let last = blob.ciphertext.len() - 1;
        blob.ciphertext[last] ^= 0x01;
        assert!(matches!(
            engine.restore(&blob),
            Err(VigilError::Crypto(_))
        ));
    }

    #[test]
    fn test_wrong_secret_fails_closed() {
        let blob = engine().create(&sample_export()).unwrap();
        let other =
            SnapshotEngine::from_secret("different", b"0123456789abcdef", &KdfParams::fast())
                .unwrap();
        assert!(other.restore(&blob).is_err());
    }

    #[test]
    fn test_transport_encoding_round_trip() {
        let engine = engine();
        let export = sample_export();
        let encoded = engine.create(&export).unwrap().to_base64();
        let restored = engine
            .restore(&SealedBlob::from_base64(&encoded).unwrap())
            .unwrap();
        assert_eq!(restored.snapshot_id, export.snapshot_id);
    }
}
