//! Concurrency properties: per-key atomicity of the ledger and the
//! registry under parallel load.

use chrono::{Duration, Utc};
use std::net::IpAddr;
use std::sync::Arc;

use vigil_common::ADMIN_SUBJECT;
use vigil_node::config::VigilConfig;
use vigil_node::engine::Engine;
use vigil_node::events::{BroadcastGateway, MemorySink};
use vigil_node::registry::LicenseStatus;
use vigil_node::reputation::ReputationLedger;

fn test_engine() -> (Arc<Engine>, MemorySink) {
    let mut config = VigilConfig::default();
    config.snapshot.kdf_memory_kib = 1024;
    config.snapshot.kdf_iterations = 1;
    config.reputation.requests_per_second = 100_000;
    let (gateway, sink) = BroadcastGateway::in_memory();
    (Arc::new(Engine::new(config, gateway).unwrap()), sink)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_attempts_ban_exactly_once() {
    let (engine, sink) = test_engine();
    let hostile: IpAddr = "203.0.113.66".parse().unwrap();

    let mut handles = Vec::new();
    for _ in 0..64 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .note_suspicious(hostile, "spoofed domain", Utc::now())
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let status = engine.check_ip(hostile);
    assert!(status.blocked);
    assert_eq!(status.attempts, 64);
    // The threshold crossing fired one ban event, no matter how many
    // attempts raced past it.
    assert_eq!(sink.count(ADMIN_SUBJECT, "ip-banned"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_ledger_attempt_counts_never_lost() {
    let ledger = Arc::new(ReputationLedger::new(&[]));
    let ip: IpAddr = "203.0.113.9".parse().unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            let mut flips = 0;
            for _ in 0..25 {
                if ledger.register_attempt(ip, "probe", 100, Utc::now()).newly_blocked {
                    flips += 1;
                }
            }
            flips
        }));
    }

    let mut total_flips = 0;
    for handle in handles {
        total_flips += handle.await.unwrap();
    }

    assert_eq!(ledger.check_ip(ip).attempts, 400);
    assert_eq!(total_flips, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_heartbeat_never_resurrects_a_racing_lock() {
    // Run the race repeatedly; on every outcome the final state must
    // be LOCKED with no heartbeat recorded after the lock.
    for _ in 0..20 {
        let (engine, _) = test_engine();
        let now = Utc::now();
        engine.issue_license("VGL-1", "a.com", None, "test", now).unwrap();

        let locker = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .lock_license("VGL-1", "panic", "admin", Utc::now())
                    .await
                    .unwrap();
            })
        };
        let beater = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let request = vigil_common::wire::HeartbeatRequest {
                    license_key: "VGL-1".to_string(),
                    token: None,
                    host: "a.com".to_string(),
                    signals: None,
                };
                engine
                    .heartbeat("198.51.100.4".parse().unwrap(), &request, Utc::now())
                    .await
            })
        };

        locker.await.unwrap();
        beater.await.unwrap();

        let (license, _) = engine.registry().get("VGL-1", Utc::now()).unwrap();
        assert_eq!(license.status, LicenseStatus::Locked);
        if let Some(seen) = license.last_heartbeat {
            assert!(seen <= license.status_changed_at + Duration::seconds(1));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_sweeps_commit_one_tamper() {
    let (engine, _) = test_engine();
    let issued = Utc::now() - chrono::Duration::hours(48);
    engine.issue_license("VGL-1", "a.com", None, "test", issued).unwrap();
    engine.registry().touch("VGL-1", issued).unwrap();

    let now = issued + chrono::Duration::hours(25);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move { engine.sweep_silent(now).await }));
    }
    let mut committed = 0;
    for handle in handles {
        committed += handle.await.unwrap();
    }

    assert_eq!(committed, 1);
    assert_eq!(engine.forensics().len(), 1);
}
