//! End-to-end scenarios exercising the engine the way a deployment
//! lives through it: healthy check-ins, silence, tampering, hostile
//! sources, lockdown and recovery.

use chrono::{Duration, Utc};
use std::net::IpAddr;
use std::sync::Arc;

use vigil_common::wire::{
    ComputedStyles, HeartbeatRequest, HeartbeatStatus, IntegritySignals, ProbeStatus,
};
use vigil_common::ADMIN_SUBJECT;
use vigil_node::config::VigilConfig;
use vigil_node::engine::Engine;
use vigil_node::events::{BroadcastGateway, MemorySink};
use vigil_node::registry::LicenseStatus;
use vigil_node::tamper::TamperSignal;

fn test_engine() -> (Arc<Engine>, MemorySink) {
    let mut config = VigilConfig::default();
    config.snapshot.kdf_memory_kib = 1024;
    config.snapshot.kdf_iterations = 1;
    config.reputation.requests_per_second = 10_000;
    let (gateway, sink) = BroadcastGateway::in_memory();
    (Arc::new(Engine::new(config, gateway).unwrap()), sink)
}

fn request(key: &str, host: &str, token: Option<String>) -> HeartbeatRequest {
    HeartbeatRequest {
        license_key: key.to_string(),
        token,
        host: host.to_string(),
        signals: None,
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// A site heartbeats for a week, goes silent for 25 hours, and comes
/// back: the silence window makes the license TAMPERED with exactly
/// one HEARTBEAT_GAP forensic record, and the late heartbeat reports
/// that verbatim instead of resurrecting the license.
#[tokio::test]
async fn test_silence_window_lifecycle() {
    let (engine, sink) = test_engine();
    let start = Utc::now() - Duration::days(8);
    engine.issue_license("VGL-SITE", "a.com", None, "ops", start).unwrap();

    // Two days of five-minute check-ins, each presenting the token
    // issued by the previous one.
    let mut token = None;
    let mut t = start;
    for _ in 0..(2 * 24 * 12) {
        let response = engine
            .heartbeat(ip("198.51.100.2"), &request("VGL-SITE", "a.com", token), t)
            .await;
        assert_eq!(response.status, HeartbeatStatus::Ok);
        token = response.token;
        t += Duration::minutes(5);
    }

    // 25 hours of silence, then the sweeper runs.
    let after_gap = t + Duration::hours(25);
    assert_eq!(engine.sweep_silent(after_gap).await, 1);

    let events = engine.forensics().all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].signal, TamperSignal::HeartbeatGap);
    assert_eq!(sink.count(ADMIN_SUBJECT, "security-alert"), 1);

    // The site comes back: its stale token is outside the freshness
    // window anyway, but even a fresh-looking check-in cannot revive
    // a TAMPERED license.
    let late = engine
        .heartbeat(ip("198.51.100.2"), &request("VGL-SITE", "a.com", token), after_gap)
        .await;
    assert_eq!(late.status, HeartbeatStatus::TokenExpired);

    let no_token = engine
        .heartbeat(ip("198.51.100.2"), &request("VGL-SITE", "a.com", None), after_gap)
        .await;
    assert_eq!(no_token.status, HeartbeatStatus::Invalid);

    assert_eq!(engine.probe(Some("a.com"), after_gap).await, ProbeStatus::Tampered);
}

/// Silence is detected lazily on the next read even when the sweeper
/// never runs: the late heartbeat itself commits the HEARTBEAT_GAP
/// transition.
#[tokio::test]
async fn test_silence_detected_lazily_on_heartbeat() {
    let (engine, _) = test_engine();
    let issued = Utc::now() - Duration::hours(48);
    engine.issue_license("VGL-SITE", "a.com", None, "ops", issued).unwrap();
    engine.registry().touch("VGL-SITE", issued).unwrap();

    let now = issued + Duration::hours(25);
    let response = engine
        .heartbeat(ip("198.51.100.2"), &request("VGL-SITE", "a.com", None), now)
        .await;
    assert_eq!(response.status, HeartbeatStatus::Tampered);

    let events = engine.forensics().all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].signal, TamperSignal::HeartbeatGap);
    assert_eq!(events[0].source_ip, Some(ip("198.51.100.2")));

    // The sweeper finds nothing left to do.
    assert_eq!(engine.sweep_silent(now).await, 0);
}

/// A hostile IP probes with bogus license keys until the threshold
/// auto-blocks it; one ban broadcast fires and a later reset lets the
/// IP back in.
#[tokio::test]
async fn test_hostile_ip_block_and_reset() {
    let (engine, sink) = test_engine();
    let hostile = ip("203.0.113.99");
    let now = Utc::now();

    for i in 0..5 {
        let response = engine
            .heartbeat(hostile, &request(&format!("GUESS-{i}"), "a.com", None), now)
            .await;
        assert_eq!(response.status, HeartbeatStatus::Invalid);
    }

    let status = engine.check_ip(hostile);
    assert!(status.blocked);
    assert_eq!(status.attempts, 5);
    assert_eq!(sink.count(ADMIN_SUBJECT, "ip-banned"), 1);
    assert!(!engine.admit(hostile));

    engine.reset_reputation(hostile, "ops", now).unwrap();
    assert!(!engine.check_ip(hostile).blocked);
    assert!(engine.admit(hostile));
}

/// Tampered deployment: forced-visible content with the guard script
/// unmounted, followed by an administrator heal with a confirmed
/// restore broadcast.
#[tokio::test]
async fn test_css_override_then_heal() {
    let (engine, sink) = test_engine();
    let now = Utc::now();
    engine.issue_license("VGL-SITE", "a.com", None, "ops", now).unwrap();

    let mut tampered = request("VGL-SITE", "a.com", None);
    tampered.signals = Some(IntegritySignals {
        computed_styles: Some(ComputedStyles {
            visibility: Some("visible".to_string()),
            opacity: Some("1".to_string()),
            display: Some("block".to_string()),
        }),
        script_did_mount: false,
        content_fingerprint: None,
        devtools_attempted: false,
    });
    let response = engine.heartbeat(ip("198.51.100.3"), &tampered, now).await;
    assert_eq!(response.status, HeartbeatStatus::Tampered);

    let events = engine.forensics().all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].signal, TamperSignal::CssOverride);
    assert_eq!(events[0].source_ip, Some(ip("198.51.100.3")));

    // Heal: restore broadcast confirmed, then back to ACTIVE.
    let healed = engine.heal_license("VGL-SITE", "ops", now).await.unwrap();
    assert_eq!(healed.to, LicenseStatus::Active);
    assert_eq!(sink.count("vigil.license.VGL-SITE", "system-restore"), 1);

    let response = engine
        .heartbeat(ip("198.51.100.3"), &request("VGL-SITE", "a.com", None), now)
        .await;
    assert_eq!(response.status, HeartbeatStatus::Ok);
}

/// Expiry is lazy: nothing happens at the expiry instant, but the
/// first read past it observes EXPIRED, and a renewal (suspend is not
/// possible from EXPIRED to ACTIVE, so the operator re-issues) brings
/// the deployment back.
#[tokio::test]
async fn test_lazy_expiry_on_heartbeat() {
    let (engine, _) = test_engine();
    let now = Utc::now();
    let expires = now + Duration::hours(1);
    engine
        .issue_license("VGL-TRIAL", "trial.example", Some(expires), "ops", now)
        .unwrap();

    // Healthy check-ins right up to expiry.
    let mut token = None;
    let mut t = now;
    while t <= expires - Duration::minutes(5) {
        let response = engine
            .heartbeat(
                ip("198.51.100.5"),
                &request("VGL-TRIAL", "trial.example", token),
                t,
            )
            .await;
        assert_eq!(response.status, HeartbeatStatus::Ok);
        token = response.token;
        t += Duration::minutes(5);
    }

    // The next check-in, with a still-fresh token, is the read that
    // observes the expiry.
    let after = expires + Duration::seconds(1);
    let response = engine
        .heartbeat(
            ip("198.51.100.5"),
            &request("VGL-TRIAL", "trial.example", token),
            after,
        )
        .await;
    assert_eq!(response.status, HeartbeatStatus::Expired);

    let (license, _) = engine.registry().get("VGL-TRIAL", after).unwrap();
    assert_eq!(license.status, LicenseStatus::Expired);
}

/// Staging and dev-mode relaxations let legitimate non-production
/// deployments check in without counting as abuse.
#[tokio::test]
async fn test_staging_and_dev_mode_deployments() {
    let (engine, _) = test_engine();
    let now = Utc::now();
    engine.issue_license("VGL-SITE", "a.com", None, "ops", now).unwrap();
    engine
        .set_staging_domain("VGL-SITE", Some("staging.a.com".to_string()), "ops")
        .unwrap();
    engine
        .set_dev_mode_expiry("VGL-SITE", Some(now + Duration::days(1)), "ops")
        .unwrap();

    let mut token = None;
    for host in ["a.com", "staging.a.com", "localhost:3000", "anything.example"] {
        let response = engine
            .heartbeat(ip("198.51.100.6"), &request("VGL-SITE", host, token), now)
            .await;
        assert_eq!(
            response.status,
            HeartbeatStatus::Ok,
            "host {host} should be authorized"
        );
        token = response.token;
    }

    // Dev mode lapses: the stranger domain is no longer authorized.
    let after = now + Duration::days(2);
    let response = engine
        .heartbeat(ip("198.51.100.6"), &request("VGL-SITE", "anything.example", None), after)
        .await;
    assert_eq!(response.status, HeartbeatStatus::Invalid);
    assert_eq!(engine.check_ip(ip("198.51.100.6")).attempts, 1);
}
