//! The engine: heartbeat protocol, tamper commit pipeline, breach
//! handling, administrator actions and the silence sweeper.
//!
//! Every status transition flows through here so the three
//! obligations hold in one place: persist the transition with its
//! trigger metadata, append a forensic record when the trigger is
//! security relevant, and emit the broadcast events for the license's
//! private channel and, for security-relevant transitions, the admin
//! channel.

use chrono::{DateTime, Utc};
use metrics::counter;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_common::events::{AdminEvent, GlobalThreatEvent, LicenseEvent};
use vigil_common::wire::{
    BreachReport, HeartbeatRequest, HeartbeatResponse, HeartbeatStatus, ProbeStatus,
};

use crate::authorizer::authorize;
use crate::config::VigilConfig;
use crate::crypto::{KdfParams, SealedBlob, TokenSigner};
use crate::error::{Result, VigilError};
use crate::events::BroadcastGateway;
use crate::registry::{License, LicenseRegistry, LicenseStatus, TouchOutcome, TransitionRecord};
use crate::reputation::{
    GlobalThreatEntry, GlobalThreatRegistry, IpStatus, ReputationLedger, RequestGate,
};
use crate::snapshot::{ExportSet, SnapshotEngine};
use crate::tamper::{assess_signals, ForensicLog, TamperEvent, TamperSignal, TamperVerdict};

/// Summary returned by a bulk snapshot restore.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RestoreSummary {
    pub snapshot_id: Uuid,
    pub snapshot_created_at: DateTime<Utc>,
    pub licenses_applied: usize,
    pub licenses_total: usize,
    pub reputation_records: usize,
    pub global_threats: usize,
    pub tamper_events: usize,
}

/// Central engine state shared by every request worker.
pub struct Engine {
    config: VigilConfig,
    registry: LicenseRegistry,
    ledger: ReputationLedger,
    threats: GlobalThreatRegistry,
    forensics: ForensicLog,
    signer: TokenSigner,
    snapshots: SnapshotEngine,
    gateway: BroadcastGateway,
    gate: RequestGate,
    trusted_proxies: Vec<ipnet::IpNet>,
}

impl Engine {
    pub fn new(config: VigilConfig, gateway: BroadcastGateway) -> Result<Self> {
        let salt = config
            .snapshot_salt()
            .map_err(VigilError::Config)?;
        let kdf = KdfParams {
            memory_kib: config.snapshot.kdf_memory_kib,
            iterations: config.snapshot.kdf_iterations,
            parallelism: config.snapshot.kdf_parallelism,
        };
        let snapshots =
            SnapshotEngine::from_secret(config.snapshot.secret.expose_secret(), &salt, &kdf)?;
        let signer = TokenSigner::new(config.heartbeat.token_secret.expose_secret());
        let ledger = ReputationLedger::new(&config.reputation.exempt_cidrs);
        let gate = RequestGate::new(config.reputation.requests_per_second);
        let trusted_proxies = config
            .trusted_proxy_nets()
            .map_err(|e| VigilError::Config(format!("trusted proxy CIDR: {e}")))?;

        Ok(Self {
            config,
            registry: LicenseRegistry::new(),
            ledger,
            threats: GlobalThreatRegistry::new(),
            forensics: ForensicLog::new(),
            signer,
            snapshots,
            gateway,
            gate,
            trusted_proxies,
        })
    }

    /// Whether a socket peer may speak for its clients via
    /// `X-Forwarded-For`.
    pub fn is_trusted_proxy(&self, peer: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(&peer))
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn registry(&self) -> &LicenseRegistry {
        &self.registry
    }

    pub fn forensics(&self) -> &ForensicLog {
        &self.forensics
    }

    /// Cheap pre-parse gate: per-IP rate limit plus block flag.
    pub fn admit(&self, ip: IpAddr) -> bool {
        if self.ledger.check_ip(ip).blocked {
            counter!("vigil_requests_rejected_blocked_total", 1);
            return false;
        }
        if !self.gate.allow(ip) {
            counter!("vigil_requests_rejected_ratelimited_total", 1);
            return false;
        }
        true
    }

    pub fn check_ip(&self, ip: IpAddr) -> IpStatus {
        self.ledger.check_ip(ip)
    }

    /// Announce a committed transition on the license's private
    /// channel. Best effort; the transition is already persisted.
    async fn announce_transition(&self, record: &TransitionRecord) {
        let event = LicenseEvent::StatusChanged {
            license_key: record.license.key.clone(),
            from: record.from.to_string(),
            to: record.to.to_string(),
            reason: record.reason.clone(),
            timestamp: record.at,
        };
        if let Err(e) = self.gateway.license(&record.license.key, &event).await {
            warn!(error = %e, "Transition broadcast failed (state already committed)");
        }
    }

    /// Register a suspicious event and fire the ban broadcast exactly
    /// once per threshold crossing. All attempt registration goes
    /// through here so that invariant holds engine-wide.
    pub async fn note_suspicious(&self, ip: IpAddr, reason: &str, now: DateTime<Utc>) {
        let outcome = self.ledger.register_attempt(
            ip,
            reason,
            self.config.reputation.auto_block_threshold,
            now,
        );
        if outcome.newly_blocked {
            let event = AdminEvent::IpBanned {
                ip,
                attempts: outcome.record.attempts,
                reason: reason.to_string(),
                timestamp: now,
            };
            if let Err(e) = self.gateway.admin(&event).await {
                warn!(ip = %ip, error = %e, "Ban broadcast failed (state already committed)");
            }
        }
    }

    // ------------------------------------------------------------------
    // Heartbeat protocol
    // ------------------------------------------------------------------

    /// Process one heartbeat check-in: lookup, domain authorization,
    /// token validation, integrity signals, touch, fresh token.
    pub async fn heartbeat(
        &self,
        source_ip: IpAddr,
        request: &HeartbeatRequest,
        now: DateTime<Utc>,
    ) -> HeartbeatResponse {
        let grace = self.config.heartbeat.grace_period_seconds;

        let (license, expiry) = match self.registry.get(&request.license_key, now) {
            Ok(pair) => pair,
            Err(VigilError::NotFound(_)) => {
                debug!(license_key = %request.license_key, ip = %source_ip, "Heartbeat for unknown license key");
                // No reputation record for the license; the caller IP
                // is what gets tracked.
                self.note_suspicious(source_ip, "heartbeat with unknown license key", now)
                    .await;
                counter!("vigil_heartbeats_invalid_total", 1);
                return self.respond(HeartbeatStatus::Invalid, None, grace);
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat lookup failed");
                return self.respond(HeartbeatStatus::Invalid, None, grace);
            }
        };
        if let Some(record) = &expiry {
            debug!(license_key = %license.key, "License expired lazily during heartbeat");
            self.announce_transition(record).await;
        }

        let authorized = authorize(&request.host, &license, now);
        if !authorized {
            // Suspicious, but not automatically tamper: hand it to the
            // reputation path and fail closed.
            self.note_suspicious(source_ip, "heartbeat from unauthorized domain", now)
                .await;
            counter!("vigil_heartbeats_unauthorized_total", 1);
            return self.respond(HeartbeatStatus::Invalid, None, grace);
        }

        // Silence is detected on read, not just by the sweeper: a
        // check-in arriving after the window is itself the read that
        // commits the gap.
        if license.is_silent(now, self.config.silence_window()) {
            let verdict = TamperVerdict {
                signal: TamperSignal::HeartbeatGap,
                fingerprint: None,
            };
            self.commit_tamper(&license.key, verdict, Some(source_ip), now)
                .await;
            counter!("vigil_heartbeats_tampered_total", 1);
            return self.respond(HeartbeatStatus::Tampered, None, grace);
        }

        match self.validate_token(&license, request.token.as_deref(), now) {
            Ok(()) => {}
            Err(VigilError::TokenExpired) => {
                counter!("vigil_heartbeats_token_expired_total", 1);
                return self.respond(HeartbeatStatus::TokenExpired, None, grace);
            }
            Err(e) => {
                debug!(license_key = %license.key, error = %e, "Heartbeat token rejected");
                counter!("vigil_heartbeats_invalid_total", 1);
                return self.respond(HeartbeatStatus::Invalid, None, grace);
            }
        }

        if let Some(signals) = &request.signals {
            if let Some(verdict) = assess_signals(&license, signals, authorized) {
                self.commit_tamper(&license.key, verdict, Some(source_ip), now)
                    .await;
                counter!("vigil_heartbeats_tampered_total", 1);
                return self.respond(HeartbeatStatus::Tampered, None, grace);
            }
        }

        match self.registry.touch(&license.key, now) {
            Ok(TouchOutcome::Updated) => {
                let token = self.signer.issue(license.id, now);
                counter!("vigil_heartbeats_ok_total", 1);
                self.respond(HeartbeatStatus::Ok, Some(token), grace)
            }
            Ok(TouchOutcome::Skipped(status)) => {
                counter!("vigil_heartbeats_refused_total", 1);
                self.respond(status_to_wire(status), None, grace)
            }
            Err(e) => {
                warn!(error = %e, "Heartbeat touch failed");
                self.respond(HeartbeatStatus::Invalid, None, grace)
            }
        }
    }

    fn respond(
        &self,
        status: HeartbeatStatus,
        token: Option<String>,
        grace: u64,
    ) -> HeartbeatResponse {
        HeartbeatResponse {
            status,
            token,
            grace_period_seconds: grace,
        }
    }

    /// Token rules: a missing token is accepted only on the first
    /// check-in after issuance; otherwise the token must decode, bind
    /// to this license, and sit inside the freshness window.
    fn validate_token(
        &self,
        license: &License,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(token) = token else {
            if license.last_heartbeat.is_none() {
                return Ok(());
            }
            return Err(VigilError::Validation(
                "missing freshness token".to_string(),
            ));
        };

        let claims = self.signer.decode(token)?;
        if claims.license_id != license.id {
            return Err(VigilError::Validation(
                "token bound to a different license".to_string(),
            ));
        }

        let age = claims.age(now);
        if age < chrono::Duration::zero() {
            return Err(VigilError::Validation(
                "token issued in the future".to_string(),
            ));
        }
        if age > self.config.freshness_window() {
            return Err(VigilError::TokenExpired);
        }
        Ok(())
    }

    /// Commit a TAMPERED transition: exactly one forensic event per
    /// committed transition plus the admin security alert. A racing
    /// commit that already moved the license away from ACTIVE makes
    /// this a no-op.
    pub async fn commit_tamper(
        &self,
        license_key: &str,
        verdict: TamperVerdict,
        source_ip: Option<IpAddr>,
        now: DateTime<Utc>,
    ) -> Option<TransitionRecord> {
        let reason = format!("tamper signal {}", verdict.signal);
        let record = match self.registry.transition(
            license_key,
            LicenseStatus::Tampered,
            &reason,
            None,
            now,
        ) {
            Ok(record) => record,
            Err(e) => {
                debug!(license_key = %license_key, error = %e, "Tamper commit skipped");
                return None;
            }
        };

        self.forensics.record(TamperEvent::new(
            &record.license,
            verdict.signal,
            source_ip,
            verdict.fingerprint,
            now,
        ));

        self.announce_transition(&record).await;
        let alert = AdminEvent::SecurityAlert {
            license_key: license_key.to_string(),
            status: "TAMPERED".to_string(),
            detail: reason,
            timestamp: now,
        };
        if let Err(e) = self.gateway.admin(&alert).await {
            warn!(error = %e, "Security alert broadcast failed (state already committed)");
        }
        Some(record)
    }

    // ------------------------------------------------------------------
    // Probe and breach surface
    // ------------------------------------------------------------------

    /// Domain/integrity probe. Unknown hosts fail closed.
    pub async fn probe(&self, host: Option<&str>, now: DateTime<Utc>) -> ProbeStatus {
        let Some(host) = host.map(str::trim).filter(|h| !h.is_empty()) else {
            return ProbeStatus::InvalidRequest;
        };

        let Some(license) = self.registry.find_by_host(host) else {
            return ProbeStatus::BlockedDomain;
        };

        // Re-read through the registry so lazy expiry applies.
        let license = match self.registry.get(&license.key, now) {
            Ok((license, expiry)) => {
                if let Some(record) = &expiry {
                    self.announce_transition(record).await;
                }
                license
            }
            Err(_) => return ProbeStatus::BlockedDomain,
        };

        // A probe is a status read too; silence commits here.
        if license.is_silent(now, self.config.silence_window()) {
            let verdict = TamperVerdict {
                signal: TamperSignal::HeartbeatGap,
                fingerprint: None,
            };
            self.commit_tamper(&license.key, verdict, None, now).await;
            return ProbeStatus::Tampered;
        }

        match license.status {
            LicenseStatus::Active => ProbeStatus::Secure,
            _ => ProbeStatus::Tampered,
        }
    }

    /// Handle a `BREACH_DEPLOYED` report: suspend matching licenses,
    /// register the caller as hostile, mirror the threat globally.
    pub async fn report_breach(
        &self,
        source_ip: IpAddr,
        report: &BreachReport,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if report.event != "BREACH_DEPLOYED" {
            return Err(VigilError::Validation(format!(
                "unknown breach event: {}",
                report.event
            )));
        }
        if report.host.trim().is_empty() {
            return Err(VigilError::Validation("breach host is empty".to_string()));
        }

        let mut suspended = 0;
        for license in self.registry.matching_host(&report.host) {
            match self.registry.transition(
                &license.key,
                LicenseStatus::Suspended,
                &format!("breach reported: {}", report.reason),
                None,
                now,
            ) {
                Ok(record) => {
                    suspended += 1;
                    self.announce_transition(&record).await;
                    let alert = AdminEvent::SecurityAlert {
                        license_key: record.license.key.clone(),
                        status: "SUSPENDED".to_string(),
                        detail: format!("breach on {}: {}", report.host, report.reason),
                        timestamp: now,
                    };
                    if let Err(e) = self.gateway.admin(&alert).await {
                        warn!(error = %e, "Breach alert broadcast failed");
                    }
                }
                Err(e) => {
                    debug!(license_key = %license.key, error = %e, "Breach suspension skipped");
                }
            }
        }

        self.note_suspicious(source_ip, "breach deployment report", now)
            .await;

        let entry = self.threats.add(GlobalThreatEntry {
            ip: source_ip,
            reason: format!("breach deployed on {}: {}", report.host, report.reason),
            proxy_or_vpn: false,
            country: None,
            global_scope: true,
            added_at: now,
            added_by: None,
        });
        let event = GlobalThreatEvent::NewThreat {
            ip: entry.ip,
            reason: entry.reason.clone(),
            proxy_or_vpn: entry.proxy_or_vpn,
            country: entry.country.clone(),
            timestamp: now,
        };
        if let Err(e) = self.gateway.global(&event).await {
            warn!(error = %e, "Global threat broadcast failed");
        }
        let hacker = AdminEvent::HackerDetected {
            ip: source_ip,
            license_key: None,
            reason: report.reason.clone(),
            timestamp: now,
        };
        if let Err(e) = self.gateway.admin(&hacker).await {
            warn!(error = %e, "Hacker-detected broadcast failed");
        }

        counter!("vigil_breach_reports_total", 1);
        Ok(suspended)
    }

    // ------------------------------------------------------------------
    // Silence sweeper
    // ------------------------------------------------------------------

    /// One sweep pass: every ACTIVE license silent beyond the window
    /// (and older than it) takes a HEARTBEAT_GAP tamper transition.
    pub async fn sweep_silent(&self, now: DateTime<Utc>) -> usize {
        let window = self.config.silence_window();
        let mut committed = 0;
        for license in self.registry.silent_licenses(now, window) {
            let verdict = TamperVerdict {
                signal: TamperSignal::HeartbeatGap,
                fingerprint: None,
            };
            if self
                .commit_tamper(&license.key, verdict, None, now)
                .await
                .is_some()
            {
                committed += 1;
            }
        }
        if committed > 0 {
            info!(committed, "Silence sweep committed tamper transitions");
        }
        committed
    }

    /// Idle window after which a per-IP rate limiter is forgotten. An
    /// idle limiter holds a full bucket, so dropping it is lossless.
    const GATE_IDLE: std::time::Duration = std::time::Duration::from_secs(600);

    /// Background sweeper task. Also hosts housekeeping that rides the
    /// same period: pruning idle request-gate limiters so the per-IP
    /// map cannot grow without bound.
    pub fn start_sweeper(self: Arc<Self>) {
        let engine = Arc::clone(&self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                engine.sweep_silent(Utc::now()).await;
                let pruned = engine.gate.prune_idle(Self::GATE_IDLE);
                if pruned > 0 {
                    debug!(pruned, "Pruned idle request-gate limiters");
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Administrator actions (caller identity threaded explicitly)
    // ------------------------------------------------------------------

    pub fn issue_license(
        &self,
        key: &str,
        domain: &str,
        expires_at: Option<DateTime<Utc>>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<License> {
        let license = self.registry.issue(key, domain, expires_at, now)?;
        info!(license_key = %key, actor = %actor, "License issued by administrator");
        Ok(license)
    }

    pub async fn suspend_license(
        &self,
        key: &str,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord> {
        let record =
            self.registry
                .transition(key, LicenseStatus::Suspended, reason, Some(actor), now)?;
        self.announce_transition(&record).await;
        let alert = AdminEvent::SecurityAlert {
            license_key: key.to_string(),
            status: "SUSPENDED".to_string(),
            detail: reason.to_string(),
            timestamp: now,
        };
        if let Err(e) = self.gateway.admin(&alert).await {
            warn!(error = %e, "Suspend alert broadcast failed");
        }
        Ok(record)
    }

    /// Panic switch. Also disables automatic restore until an
    /// administrator heals or releases the license.
    pub async fn lock_license(
        &self,
        key: &str,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord> {
        let record =
            self.registry
                .transition(key, LicenseStatus::Locked, reason, Some(actor), now)?;
        self.announce_transition(&record).await;
        let alert = AdminEvent::SecurityAlert {
            license_key: key.to_string(),
            status: "LOCKED".to_string(),
            detail: reason.to_string(),
            timestamp: now,
        };
        if let Err(e) = self.gateway.admin(&alert).await {
            warn!(error = %e, "Lock alert broadcast failed");
        }
        Ok(record)
    }

    /// Irreversibly disengage enforcement.
    pub async fn release_license(
        &self,
        key: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord> {
        let record = self.registry.transition(
            key,
            LicenseStatus::Released,
            "administrator release",
            Some(actor),
            now,
        )?;
        let event = LicenseEvent::SystemRelease {
            license_key: key.to_string(),
            actor: actor.to_string(),
            timestamp: now,
        };
        if let Err(e) = self.gateway.license(key, &event).await {
            warn!(error = %e, "Release broadcast failed (state already committed)");
        }
        Ok(record)
    }

    /// Heal a TAMPERED or LOCKED license back to ACTIVE. The commit is
    /// gated on an awaited, confirmed `system-restore` broadcast of a
    /// fresh clean snapshot; a failed broadcast aborts the heal.
    pub async fn heal_license(
        &self,
        key: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord> {
        let (license, _) = self.registry.get(key, now)?;
        if !matches!(
            license.status,
            LicenseStatus::Tampered | LicenseStatus::Locked
        ) {
            return Err(VigilError::Validation(format!(
                "license {key} is {} and cannot be healed",
                license.status
            )));
        }

        let export = self.export_state(now);
        let blob = self.snapshots.create(&export)?;
        self.registry
            .set_clean_snapshot(key, Some(blob.to_base64()))?;

        let event = LicenseEvent::SystemRestore {
            license_key: key.to_string(),
            snapshot_id: export.snapshot_id,
            actor: actor.to_string(),
            timestamp: now,
        };
        // Gate: the heal does not commit unless the restore broadcast
        // went out.
        self.gateway.license(key, &event).await?;

        let record = self.registry.transition(
            key,
            LicenseStatus::Active,
            "administrator heal after clean-snapshot restore",
            Some(actor),
            now,
        )?;
        self.announce_transition(&record).await;
        Ok(record)
    }

    /// Status read for the admin surface; lazy expiry applies and is
    /// announced like any other transition.
    pub async fn license_status(&self, key: &str, now: DateTime<Utc>) -> Result<License> {
        let (license, expiry) = self.registry.get(key, now)?;
        if let Some(record) = &expiry {
            self.announce_transition(record).await;
        }
        Ok(license)
    }

    pub fn set_staging_domain(
        &self,
        key: &str,
        staging: Option<String>,
        actor: &str,
    ) -> Result<License> {
        debug!(license_key = %key, actor = %actor, staging = ?staging, "Staging domain updated");
        self.registry.set_staging_domain(key, staging)
    }

    pub fn set_dev_mode_expiry(
        &self,
        key: &str,
        expiry: Option<DateTime<Utc>>,
        actor: &str,
    ) -> Result<License> {
        debug!(license_key = %key, actor = %actor, expiry = ?expiry, "Dev-mode window updated");
        self.registry.set_dev_mode_expiry(key, expiry)
    }

    pub async fn ban_ip_global(
        &self,
        ip: IpAddr,
        reason: &str,
        proxy_or_vpn: bool,
        country: Option<String>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<GlobalThreatEntry> {
        let entry = self.threats.add(GlobalThreatEntry {
            ip,
            reason: reason.to_string(),
            proxy_or_vpn,
            country,
            global_scope: true,
            added_at: now,
            added_by: Some(actor.to_string()),
        });
        let event = GlobalThreatEvent::GlobalBan {
            ip,
            reason: reason.to_string(),
            timestamp: now,
        };
        if let Err(e) = self.gateway.global(&event).await {
            warn!(error = %e, "Global ban broadcast failed (entry already committed)");
        }
        Ok(entry)
    }

    pub fn unban_ip_global(&self, ip: IpAddr) -> Result<GlobalThreatEntry> {
        self.threats.remove(ip)
    }

    pub fn threats_export(&self) -> Vec<GlobalThreatEntry> {
        self.threats.export()
    }

    pub fn reset_reputation(&self, ip: IpAddr, actor: &str, now: DateTime<Utc>) -> Result<()> {
        self.ledger.reset(ip, now)?;
        info!(ip = %ip, actor = %actor, "Reputation released by administrator");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    fn export_state(&self, now: DateTime<Utc>) -> ExportSet {
        ExportSet::new(
            self.registry.export(),
            self.ledger.export(),
            self.threats.export(),
            self.forensics.all(),
            now,
        )
    }

    /// Produce an encrypted snapshot of the full export set.
    pub fn create_snapshot(&self, now: DateTime<Utc>) -> Result<(SealedBlob, Uuid)> {
        let export = self.export_state(now);
        let blob = self.snapshots.create(&export)?;
        Ok((blob, export.snapshot_id))
    }

    /// Decrypt, verify and apply a snapshot. Licenses currently LOCKED
    /// are refused by the apply path; everything else is replaced with
    /// the restored state. A corrupt or forged blob is surfaced to the
    /// caller and raised on the admin channel.
    pub async fn restore_snapshot(&self, blob: &SealedBlob) -> Result<RestoreSummary> {
        let export = match self.snapshots.restore(blob) {
            Ok(export) => export,
            Err(e) => {
                let alert = AdminEvent::SecurityAlert {
                    license_key: String::new(),
                    status: "SNAPSHOT_REJECTED".to_string(),
                    detail: e.to_string(),
                    timestamp: Utc::now(),
                };
                if let Err(pub_err) = self.gateway.admin(&alert).await {
                    warn!(error = %pub_err, "Snapshot-rejected alert broadcast failed");
                }
                return Err(e);
            }
        };
        let total = export.licenses.len();
        let applied = self.registry.apply_import(export.licenses);
        self.ledger.apply_import(export.reputation.clone());
        self.threats.apply_import(export.global_threats.clone());
        self.forensics.apply_import(export.tamper_events.clone());

        info!(
            snapshot_id = %export.snapshot_id,
            licenses_applied = applied,
            licenses_total = total,
            "Snapshot restore applied"
        );
        Ok(RestoreSummary {
            snapshot_id: export.snapshot_id,
            snapshot_created_at: export.created_at,
            licenses_applied: applied,
            licenses_total: total,
            reputation_records: export.reputation.len(),
            global_threats: export.global_threats.len(),
            tamper_events: export.tamper_events.len(),
        })
    }
}

fn status_to_wire(status: LicenseStatus) -> HeartbeatStatus {
    match status {
        LicenseStatus::Active => HeartbeatStatus::Ok,
        LicenseStatus::Expired => HeartbeatStatus::Expired,
        LicenseStatus::Suspended => HeartbeatStatus::Suspended,
        LicenseStatus::Tampered => HeartbeatStatus::Tampered,
        LicenseStatus::Locked => HeartbeatStatus::Locked,
        LicenseStatus::Released => HeartbeatStatus::Released,
    }
}
