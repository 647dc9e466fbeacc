use crate::secret::Secret;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration for the vigil engine node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Platform-wide configuration
    pub platform: PlatformConfig,
    /// Network configuration
    pub network: NetworkConfig,
    /// Heartbeat protocol settings
    pub heartbeat: HeartbeatConfig,
    /// Reputation ledger and auto-block settings
    pub reputation: ReputationConfig,
    /// Snapshot engine settings
    pub snapshot: SnapshotConfig,
    /// NATS broadcast configuration
    pub nats: NatsConfig,
    /// Metrics and monitoring
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Administrator API configuration
    pub admin: AdminConfig,
}

/// Platform-wide configuration and feature toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Deployment environment (development, staging, production)
    pub environment: String,
    /// Unique deployment identifier
    pub deployment_id: String,
    /// Enabled platform features
    pub features: Vec<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Public listen address for the engine API
    pub listen_addr: String,
    /// Server-side timeout for heartbeat and tamper-report handling.
    /// Deliberately seconds, independent of the freshness window.
    pub request_timeout_seconds: u64,
    /// CIDR ranges of reverse proxies whose `X-Forwarded-For` header is
    /// trusted. Requests from any other peer are attributed to the
    /// socket address, whatever headers they carry.
    pub trusted_proxies: Vec<String>,
}

/// Heartbeat protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Secret key for freshness token MACs
    pub token_secret: Secret<String>,
    /// Accepted age of a freshness token, in seconds
    pub freshness_window_seconds: u64,
    /// Silence beyond this window on a license older than the same
    /// window is treated as tamper. Applied uniformly to all licenses;
    /// if per-license heartbeat intervals ever appear this should be
    /// derived from them instead.
    pub silence_window_hours: u64,
    /// Interval of the background silence sweeper
    pub sweep_interval_seconds: u64,
    /// How long clients may fail open when the engine is unreachable
    pub grace_period_seconds: u64,
}

/// Reputation ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Attempts at which an IP is auto-blocked
    pub auto_block_threshold: u64,
    /// CIDR ranges that are never auto-blocked (operator networks)
    pub exempt_cidrs: Vec<String>,
    /// Per-IP request gate in front of the heartbeat parser
    pub requests_per_second: u32,
}

/// Snapshot engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Secret the snapshot key is derived from
    pub secret: Secret<String>,
    /// Fixed key-derivation salt, hex encoded, exactly 16 bytes
    pub salt_hex: String,
    /// Argon2id memory cost in KiB
    pub kdf_memory_kib: u32,
    /// Argon2id iterations
    pub kdf_iterations: u32,
    /// Argon2id parallelism
    pub kdf_parallelism: u32,
}

/// NATS broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// Enable NATS fan-out (disabled falls back to the in-memory sink)
    pub enabled: bool,
    /// NATS server URL
    pub server: Option<String>,
    /// Publish retry attempts before an event is dropped
    pub publish_retries: u32,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,
    /// Exporter listen address
    pub listen_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, text)
    pub format: Option<String>,
}

/// Administrator API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Enable the admin routes
    pub enabled: bool,
    /// Accepted credentials. The actor label is attached to every
    /// administrator action the credential performs.
    pub credentials: Vec<AdminCredential>,
    /// Grace period for shutdown (seconds)
    pub shutdown_grace_period_seconds: u64,
}

/// One admin bearer credential and the identity it resolves to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCredential {
    pub token: Secret<String>,
    pub actor: String,
}

impl VigilConfig {
    /// Check if a feature is enabled
    pub fn has_feature(&self, feature: &str) -> bool {
        self.platform.features.contains(&feature.to_string())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.network.listen_addr.parse()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.request_timeout_seconds)
    }

    pub fn trusted_proxy_nets(&self) -> Result<Vec<ipnet::IpNet>, ipnet::AddrParseError> {
        self.network
            .trusted_proxies
            .iter()
            .map(|cidr| cidr.parse())
            .collect()
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat.freshness_window_seconds as i64)
    }

    pub fn silence_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.heartbeat.silence_window_hours as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.sweep_interval_seconds)
    }

    pub fn nats_enabled(&self) -> bool {
        self.has_feature("broadcast") && self.nats.enabled
    }

    pub fn metrics_enabled(&self) -> bool {
        self.has_feature("metrics") && self.metrics.enabled
    }

    /// Fixed snapshot salt decoded from config.
    pub fn snapshot_salt(&self) -> Result<[u8; 16], String> {
        let hex = &self.snapshot.salt_hex;
        if hex.len() != 32 {
            return Err(format!(
                "snapshot.salt_hex must be 32 hex chars (16 bytes), got {}",
                hex.len()
            ));
        }
        let mut salt = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
            salt[i] = u8::from_str_radix(s, 16).map_err(|e| format!("bad hex in salt: {e}"))?;
        }
        Ok(salt)
    }
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig {
                environment: "development".to_string(),
                deployment_id: "vigil-dev-local".to_string(),
                features: vec![
                    "heartbeat".to_string(),
                    "tamper_detection".to_string(),
                    "reputation".to_string(),
                    "snapshots".to_string(),
                    "broadcast".to_string(),
                    "metrics".to_string(),
                ],
            },
            network: NetworkConfig {
                listen_addr: "127.0.0.1:8470".to_string(),
                request_timeout_seconds: 5,
                trusted_proxies: vec!["127.0.0.0/8".to_string()],
            },
            heartbeat: HeartbeatConfig {
                token_secret: Secret::new(
                    "dev-token-secret-not-for-production-use-only".to_string(),
                ),
                freshness_window_seconds: 600,
                silence_window_hours: 24,
                sweep_interval_seconds: 300,
                grace_period_seconds: 900,
            },
            reputation: ReputationConfig {
                auto_block_threshold: 5,
                exempt_cidrs: vec![
                    "127.0.0.0/8".to_string(),
                    "10.0.0.0/8".to_string(),
                    "172.16.0.0/12".to_string(),
                    "192.168.0.0/16".to_string(),
                ],
                requests_per_second: 20,
            },
            snapshot: SnapshotConfig {
                secret: Secret::new(
                    "dev-snapshot-secret-not-for-production-use-only".to_string(),
                ),
                salt_hex: "766967696c2d736e617073686f742121".to_string(),
                kdf_memory_kib: 19 * 1024,
                kdf_iterations: 2,
                kdf_parallelism: 1,
            },
            nats: NatsConfig {
                enabled: false,
                server: None,
                publish_retries: 3,
            },
            metrics: MetricsConfig {
                enabled: true,
                listen_addr: "127.0.0.1:9470".to_string(),
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: Some("text".to_string()),
            },
            admin: AdminConfig {
                enabled: true,
                credentials: vec![AdminCredential {
                    token: Secret::new("dev-admin-token".to_string()),
                    actor: "dev-admin".to_string(),
                }],
                shutdown_grace_period_seconds: 10,
            },
        }
    }
}

impl VigilConfig {
    /// Load configuration from file with `VIGIL_*` environment overrides
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VIGIL").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr().is_err() {
            return Err(format!(
                "Invalid listen address: {}",
                self.network.listen_addr
            ));
        }

        if self.heartbeat.freshness_window_seconds == 0 {
            return Err("Freshness window cannot be 0".to_string());
        }

        if self.heartbeat.silence_window_hours == 0 {
            return Err("Silence window cannot be 0".to_string());
        }

        if self.network.request_timeout_seconds == 0 {
            return Err("Request timeout cannot be 0".to_string());
        }

        if self.reputation.auto_block_threshold == 0 {
            return Err("Auto-block threshold cannot be 0".to_string());
        }

        if self.heartbeat.token_secret.expose_secret().is_empty() {
            return Err("Token secret cannot be empty".to_string());
        }

        if self.snapshot.secret.expose_secret().is_empty() {
            return Err("Snapshot secret cannot be empty".to_string());
        }

        self.snapshot_salt()?;

        if self.nats_enabled() && self.nats.server.is_none() {
            return Err("NATS is enabled but no server is configured".to_string());
        }

        if self.admin.enabled && self.admin.credentials.is_empty() {
            return Err("Admin API is enabled but no credentials are configured".to_string());
        }

        for cidr in &self.reputation.exempt_cidrs {
            if cidr.parse::<ipnet::IpNet>().is_err() {
                return Err(format!("Invalid exempt CIDR: {cidr}"));
            }
        }

        for cidr in &self.network.trusted_proxies {
            if cidr.parse::<ipnet::IpNet>().is_err() {
                return Err(format!("Invalid trusted proxy CIDR: {cidr}"));
            }
        }

        Ok(())
    }
}
