//! Configuration loading from `~/.vncgate/config.toml` with defaults, and
//! startup validation.
//!
//! A missing file yields defaults. A file that exists but cannot be read or
//! parsed is an error, and so is a config that fails [`validate_config`].

use crate::discovery::SocketGlob;
use crate::error::KernelResult;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use vncgate_types::config::GatewayConfig;
use vncgate_types::error::GatewayError;
use vncgate_types::target::TargetDescriptor;

/// Load gateway configuration from a TOML file, with defaults for a missing file.
pub fn load_config(path: Option<&Path>) -> KernelResult<GatewayConfig> {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(GatewayConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|e| {
        GatewayError::Config(format!("cannot read {}: {e}", config_path.display()))
    })?;

    let config = toml::from_str::<GatewayConfig>(&contents).map_err(|e| {
        GatewayError::Config(format!("cannot parse {}: {e}", config_path.display()))
    })?;
    info!(path = %config_path.display(), "Loaded configuration");
    Ok(config)
}

/// Default config location: `~/.vncgate/config.toml`.
pub fn default_config_path() -> PathBuf {
    vncgate_home().join("config.toml")
}

/// The vncgate home directory (`~/.vncgate`).
pub fn vncgate_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".vncgate")
}

/// Reject configurations that cannot possibly work.
pub fn validate_config(config: &GatewayConfig) -> KernelResult<()> {
    config.listen_addr.parse::<SocketAddr>().map_err(|e| {
        GatewayError::Config(format!("listen_addr '{}': {e}", config.listen_addr))
    })?;

    if let Some(pattern) = &config.discovery.watch_glob {
        SocketGlob::new(pattern)?;
    }

    for target in &config.targets {
        TargetDescriptor::parse(target)?;
    }

    if let Some(origin) = &config.debug_webapp_proxy {
        let url = url::Url::parse(origin)
            .map_err(|e| GatewayError::Config(format!("debug_webapp_proxy '{origin}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::Config(format!(
                "debug_webapp_proxy '{origin}' must be an http(s) URL"
            ))
            .into());
        }
    }

    if config.tunnel.chunk_size == 0 {
        return Err(GatewayError::Config("tunnel.chunk_size must be positive".into()).into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
listen_addr = "127.0.0.1:7000"
targets = ["tcp://10.0.0.5:5900"]

[tls]
disable = true

[discovery]
watch_glob = "/tmp/sockets/*.sock"
poll_interval_ms = 0
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert!(config.tls.disable);
        assert!(config.discovery.poll_interval().is_none());
        assert_eq!(config.targets.len(), 1);
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_unparsable_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listen_addr = [").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_type_error_does_not_drop_auth() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[auth]
passwd_file = "/etc/vncgate/passwd"

[discovery]
poll_interval_ms = "5s"
"#,
        )
        .unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("cannot parse"), "{err}");
    }

    #[test]
    fn test_unreadable_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        // A directory exists but cannot be read as a file.
        assert!(load_config(Some(dir.path())).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = GatewayConfig {
            listen_addr: "nonsense".into(),
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());

        config.listen_addr = "127.0.0.1:0".into();
        config.discovery.watch_glob = Some("/tmp/[".into());
        assert!(validate_config(&config).is_err());

        config.discovery.watch_glob = None;
        config.targets = vec!["udp://1.2.3.4:5".into()];
        assert!(validate_config(&config).is_err());

        config.targets.clear();
        config.debug_webapp_proxy = Some("ftp://example.org".into());
        assert!(validate_config(&config).is_err());

        config.debug_webapp_proxy = Some("http://127.0.0.1:8000".into());
        validate_config(&config).unwrap();
    }
}
