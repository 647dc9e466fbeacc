//! Per-IP reputation ledger with atomic auto-block, the request gate
//! in front of the heartbeat parser, and the cross-deployment global
//! threat registry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use ipnet::IpNet;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::num::NonZeroU32;
use tracing::{debug, info, warn};

use crate::error::{Result, VigilError};

type IpRateLimiter = RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>;

/// Local reputation bookkeeping for one source IP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReputationRecord {
    pub ip: IpAddr,
    pub attempts: u64,
    pub blocked: bool,
    pub last_reason: String,
    pub last_seen: DateTime<Utc>,
}

/// Result of `register_attempt`.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub record: ReputationRecord,
    /// True exactly once per threshold crossing, even under concurrent
    /// callers; the ban broadcast keys off this flag.
    pub newly_blocked: bool,
}

/// Pure read result of `check_ip`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IpStatus {
    pub blocked: bool,
    pub attempts: u64,
}

/// Concurrent per-IP attempt counter with atomic block flag.
#[derive(Debug, Default)]
pub struct ReputationLedger {
    records: DashMap<IpAddr, ReputationRecord>,
    /// Operator networks that are never auto-blocked.
    exempt: Vec<IpNet>,
}

impl ReputationLedger {
    pub fn new(exempt_cidrs: &[String]) -> Self {
        let exempt: Vec<IpNet> = exempt_cidrs
            .iter()
            .filter_map(|cidr| match cidr.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(e) => {
                    warn!(cidr = %cidr, error = %e, "Failed to parse exempt CIDR");
                    None
                }
            })
            .collect();
        Self {
            records: DashMap::new(),
            exempt,
        }
    }

    fn is_exempt(&self, ip: IpAddr) -> bool {
        self.exempt.iter().any(|net| net.contains(&ip))
    }

    /// Record one suspicious event for `ip`.
    ///
    /// The read-or-create, increment, compare and flip all happen under
    /// the map's per-key lock, so two concurrent calls that both cross
    /// `threshold` produce exactly one `newly_blocked = true`.
    pub fn register_attempt(
        &self,
        ip: IpAddr,
        reason: &str,
        threshold: u64,
        now: DateTime<Utc>,
    ) -> AttemptOutcome {
        let exempt = self.is_exempt(ip);
        let mut entry = self
            .records
            .entry(ip)
            .or_insert_with(|| ReputationRecord {
                ip,
                attempts: 0,
                blocked: false,
                last_reason: String::new(),
                last_seen: now,
            });

        entry.attempts += 1;
        entry.last_reason = reason.to_string();
        entry.last_seen = now;

        let mut newly_blocked = false;
        if entry.attempts >= threshold && !entry.blocked {
            if exempt {
                debug!(ip = %ip, attempts = entry.attempts, "Exempt IP crossed threshold, not blocking");
            } else {
                entry.blocked = true;
                newly_blocked = true;
                info!(
                    ip = %ip,
                    attempts = entry.attempts,
                    reason = %reason,
                    "IP auto-blocked"
                );
                counter!("vigil_ip_auto_blocks_total", 1);
            }
        }

        counter!("vigil_reputation_attempts_total", 1);
        AttemptOutcome {
            record: entry.clone(),
            newly_blocked,
        }
    }

    /// Pure read, never mutates. Used as a cheap gate before parsing a
    /// heartbeat body.
    pub fn check_ip(&self, ip: IpAddr) -> IpStatus {
        match self.records.get(&ip) {
            Some(record) => IpStatus {
                blocked: record.blocked,
                attempts: record.attempts,
            },
            None => IpStatus {
                blocked: false,
                attempts: 0,
            },
        }
    }

    /// Administrator release: counter reset, flag cleared.
    pub fn reset(&self, ip: IpAddr, now: DateTime<Utc>) -> Result<ReputationRecord> {
        let mut entry = self
            .records
            .get_mut(&ip)
            .ok_or_else(|| VigilError::NotFound(format!("no reputation record for {ip}")))?;
        entry.attempts = 0;
        entry.blocked = false;
        entry.last_reason = "administrator reset".to_string();
        entry.last_seen = now;
        info!(ip = %ip, "Reputation record reset");
        Ok(entry.clone())
    }

    pub fn export(&self) -> Vec<ReputationRecord> {
        let mut all: Vec<ReputationRecord> =
            self.records.iter().map(|e| e.clone()).collect();
        all.sort_by_key(|r| r.ip);
        all
    }

    pub fn apply_import(&self, records: Vec<ReputationRecord>) {
        self.records.clear();
        for record in records {
            self.records.insert(record.ip, record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
struct GateEntry {
    limiter: IpRateLimiter,
    last_seen: std::time::Instant,
}

/// Per-IP request gate applied before any request work.
#[derive(Debug)]
pub struct RequestGate {
    limiters: DashMap<IpAddr, GateEntry>,
    requests_per_second: NonZeroU32,
}

impl RequestGate {
    pub fn new(requests_per_second: u32) -> Self {
        let requests_per_second = NonZeroU32::new(requests_per_second).unwrap_or_else(|| {
            warn!("Invalid requests_per_second value 0, using default of 10");
            NonZeroU32::new(10).expect("10 is non-zero")
        });
        Self {
            limiters: DashMap::new(),
            requests_per_second,
        }
    }

    pub fn allow(&self, ip: IpAddr) -> bool {
        let mut entry = self.limiters.entry(ip).or_insert_with(|| GateEntry {
            limiter: RateLimiter::direct(Quota::per_second(self.requests_per_second)),
            last_seen: std::time::Instant::now(),
        });
        entry.last_seen = std::time::Instant::now();
        entry.limiter.check().is_ok()
    }

    /// Drop limiters idle longer than `idle`. An idle limiter holds a
    /// full token bucket, so forgetting it changes nothing for the IP.
    pub fn prune_idle(&self, idle: std::time::Duration) -> usize {
        let before = self.limiters.len();
        self.limiters.retain(|_, entry| entry.last_seen.elapsed() < idle);
        before - self.limiters.len()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }
}

/// Cross-tenant, permanent hostile-actor entry. Never auto-expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalThreatEntry {
    pub ip: IpAddr,
    pub reason: String,
    pub proxy_or_vpn: bool,
    pub country: Option<String>,
    pub global_scope: bool,
    pub added_at: DateTime<Utc>,
    pub added_by: Option<String>,
}

/// Permanent cross-deployment registry, synchronized to every edge via
/// the broadcast gateway.
#[derive(Debug, Default)]
pub struct GlobalThreatRegistry {
    entries: DashMap<IpAddr, GlobalThreatEntry>,
}

impl GlobalThreatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `ip`. Returns the stored
    /// record.
    pub fn add(&self, entry: GlobalThreatEntry) -> GlobalThreatEntry {
        info!(ip = %entry.ip, reason = %entry.reason, "Global threat entry added");
        counter!("vigil_global_threats_total", 1);
        self.entries.insert(entry.ip, entry.clone());
        entry
    }

    /// Explicit administrator removal; the only way an entry leaves.
    pub fn remove(&self, ip: IpAddr) -> Result<GlobalThreatEntry> {
        self.entries
            .remove(&ip)
            .map(|(_, entry)| entry)
            .ok_or_else(|| VigilError::NotFound(format!("no global threat entry for {ip}")))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.entries.contains_key(&ip)
    }

    pub fn export(&self) -> Vec<GlobalThreatEntry> {
        let mut all: Vec<GlobalThreatEntry> =
            self.entries.iter().map(|e| e.clone()).collect();
        all.sort_by_key(|e| e.ip);
        all
    }

    pub fn apply_import(&self, entries: Vec<GlobalThreatEntry>) {
        self.entries.clear();
        for entry in entries {
            self.entries.insert(entry.ip, entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_attempts_are_monotonic_until_reset() {
        let ledger = ReputationLedger::new(&[]);
        let now = Utc::now();
        for expected in 1..=4u64 {
            let outcome = ledger.register_attempt(ip("9.9.9.9"), "probe", 10, now);
            assert_eq!(outcome.record.attempts, expected);
            assert!(!outcome.newly_blocked);
        }
        let record = ledger.reset(ip("9.9.9.9"), now).unwrap();
        assert_eq!(record.attempts, 0);
        assert!(!record.blocked);
    }

    #[test]
    fn test_block_flips_exactly_once_at_threshold() {
        let ledger = ReputationLedger::new(&[]);
        let now = Utc::now();
        let mut ban_events = 0;
        for _ in 0..8 {
            if ledger
                .register_attempt(ip("9.9.9.9"), "spoofed domain", 5, now)
                .newly_blocked
            {
                ban_events += 1;
            }
        }
        assert_eq!(ban_events, 1);
        let status = ledger.check_ip(ip("9.9.9.9"));
        assert!(status.blocked);
        assert_eq!(status.attempts, 8);
    }

    #[test]
    fn test_check_ip_never_mutates() {
        let ledger = ReputationLedger::new(&[]);
        let status = ledger.check_ip(ip("1.2.3.4"));
        assert!(!status.blocked);
        assert_eq!(status.attempts, 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_exempt_cidr_is_never_blocked() {
        let ledger = ReputationLedger::new(&["10.0.0.0/8".to_string()]);
        let now = Utc::now();
        for _ in 0..10 {
            let outcome = ledger.register_attempt(ip("10.1.2.3"), "noise", 3, now);
            assert!(!outcome.newly_blocked);
            assert!(!outcome.record.blocked);
        }
        // Attempts are still counted for visibility.
        assert_eq!(ledger.check_ip(ip("10.1.2.3")).attempts, 10);
    }

    #[test]
    fn test_reset_unknown_ip_is_not_found() {
        let ledger = ReputationLedger::new(&[]);
        assert!(matches!(
            ledger.reset(ip("8.8.8.8"), Utc::now()),
            Err(VigilError::NotFound(_))
        ));
    }

    #[test]
    fn test_block_can_retrigger_after_reset() {
        let ledger = ReputationLedger::new(&[]);
        let now = Utc::now();
        for _ in 0..5 {
            ledger.register_attempt(ip("9.9.9.9"), "probe", 5, now);
        }
        assert!(ledger.check_ip(ip("9.9.9.9")).blocked);
        ledger.reset(ip("9.9.9.9"), now).unwrap();

        let mut ban_events = 0;
        for _ in 0..5 {
            if ledger
                .register_attempt(ip("9.9.9.9"), "probe", 5, now)
                .newly_blocked
            {
                ban_events += 1;
            }
        }
        assert_eq!(ban_events, 1);
    }

    #[test]
    fn test_global_registry_add_remove() {
        let registry = GlobalThreatRegistry::new();
        let entry = GlobalThreatEntry {
            ip: ip("203.0.113.7"),
            reason: "devtools tamper".to_string(),
            proxy_or_vpn: false,
            country: None,
            global_scope: true,
            added_at: Utc::now(),
            added_by: Some("admin".to_string()),
        };
        registry.add(entry.clone());
        assert!(registry.contains(ip("203.0.113.7")));

        let removed = registry.remove(ip("203.0.113.7")).unwrap();
        assert_eq!(removed, entry);
        assert!(!registry.contains(ip("203.0.113.7")));
        assert!(registry.remove(ip("203.0.113.7")).is_err());
    }

    #[test]
    fn test_request_gate_throttles_burst() {
        let gate = RequestGate::new(2);
        let source = ip("5.5.5.5");
        assert!(gate.allow(source));
        assert!(gate.allow(source));
        // Third request inside the same second is throttled.
        assert!(!gate.allow(source));
        // Unrelated IPs are unaffected.
        assert!(gate.allow(ip("6.6.6.6")));
    }

    #[test]
    fn test_request_gate_prunes_idle_limiters() {
        let gate = RequestGate::new(10);
        gate.allow(ip("5.5.5.5"));
        gate.allow(ip("6.6.6.6"));
        assert_eq!(gate.len(), 2);

        // Nothing is idle beyond an hour yet.
        assert_eq!(gate.prune_idle(std::time::Duration::from_secs(3600)), 0);
        assert_eq!(gate.len(), 2);

        // A zero idle window makes every entry stale.
        assert_eq!(gate.prune_idle(std::time::Duration::ZERO), 2);
        assert_eq!(gate.len(), 0);

        // Pruned IPs start over with a full bucket.
        assert!(gate.allow(ip("5.5.5.5")));
    }
}
