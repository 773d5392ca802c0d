//! Gateway configuration types.
//!
//! Every section carries `#[serde(default)]` so a partial (or empty) TOML
//! file yields a fully populated config.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:6080";

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Socket address the HTTP(S) server binds.
    pub listen_addr: String,
    /// Hostname placed in the generated certificate.
    pub hostname: String,
    /// Proxy `/static/*` to this origin instead of serving bundled assets.
    pub debug_webapp_proxy: Option<String>,
    /// Static target URLs registered at boot (`tcp://host:5900`, `unix:///path`).
    pub targets: Vec<String>,
    pub tls: TlsConfig,
    pub discovery: DiscoveryConfig,
    pub tunnel: TunnelConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            hostname: default_hostname(),
            debug_webapp_proxy: None,
            targets: Vec::new(),
            tls: TlsConfig::default(),
            discovery: DiscoveryConfig::default(),
            tunnel: TunnelConfig::default(),
            api: ApiConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Certificate path, defaulting to `vncgate.<hostname>.crt`.
    pub fn cert_path(&self) -> PathBuf {
        self.tls
            .cert_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("vncgate.{}.crt", self.hostname)))
    }

    /// Key path, defaulting to `vncgate.<hostname>.key`.
    pub fn key_path(&self) -> PathBuf {
        self.tls
            .key_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("vncgate.{}.key", self.hostname)))
    }
}

/// TLS settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve plain HTTP. Insecure.
    pub disable: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

/// Filesystem discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Glob matching local sockets to expose, e.g. `/tmp/sockets/*.sock`.
    pub watch_glob: Option<String>,
    /// Re-scan when no notification arrived for this long. 0 disables.
    pub poll_interval_ms: u64,
    /// Per-subscriber event queue depth.
    pub subscriber_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            watch_glob: None,
            poll_interval_ms: 5_000,
            subscriber_capacity: 1,
        }
    }
}

impl DiscoveryConfig {
    /// Poll fallback interval, `None` when disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }
}

/// Tunnel relay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub dial_timeout_ms: u64,
    /// Read buffer for the target-to-client direction.
    pub chunk_size: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 10_000,
            chunk_size: 1024,
        }
    }
}

impl TunnelConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// How often an idle event stream checks that its observer is still there.
    pub liveness_interval_ms: u64,
    /// GCRA budget per client IP.
    pub rate_limit_per_minute: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            liveness_interval_ms: 1_000,
            rate_limit_per_minute: 600,
        }
    }
}

impl ApiConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms.max(1))
    }
}

/// Login settings. Authentication is off unless `passwd_file` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Colon-delimited `user:salt:hash` credential file.
    pub passwd_file: Option<PathBuf>,
    pub session_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            passwd_file: None,
            session_ttl_secs: 3600,
        }
    }
}

/// Best-effort local hostname.
pub fn default_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.discovery.subscriber_capacity, 1);
        assert_eq!(
            config.discovery.poll_interval(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.tunnel.chunk_size, 1024);
        assert!(config.auth.passwd_file.is_none());
        assert!(!config.tls.disable);
    }

    #[test]
    fn test_zero_poll_interval_disables_polling() {
        let discovery = DiscoveryConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(discovery.poll_interval().is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            hostname = "gw.example.org"

            [discovery]
            watch_glob = "/tmp/sockets/*.sock"
            "#,
        )
        .unwrap();
        assert_eq!(config.hostname, "gw.example.org");
        assert_eq!(config.discovery.watch_glob.as_deref(), Some("/tmp/sockets/*.sock"));
        assert_eq!(config.discovery.poll_interval_ms, 5_000);
        assert_eq!(config.cert_path(), PathBuf::from("vncgate.gw.example.org.crt"));
        assert_eq!(config.key_path(), PathBuf::from("vncgate.gw.example.org.key"));
    }
}
