//! Clap CLI definitions for vncgate.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vncgate_types::config::GatewayConfig;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  vncgate start --watch-glob '/tmp/sockets/*.sock'    Expose every VNC socket in /tmp/sockets
  vncgate start --target tcp://:secret@10.0.0.5:5900   Expose one network VNC server
  vncgate passwd /etc/vncgate/passwd admin             Add or change a dashboard login
  vncgate completion bash                              Print shell completions

\x1b[1;36mMore:\x1b[0m
  Config:     ~/.vncgate/config.toml (override with --config)
  Dashboard:  https://<host>:6080/ (when the gateway is running)";

/// vncgate: browser access to VNC servers over WebSockets.
#[derive(Parser)]
#[command(name = "vncgate", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway (HTTP(S) server + discovery).
    Start(StartArgs),
    /// Create or update a login in a credential file.
    Passwd {
        /// Credential file (created if missing).
        file: PathBuf,
        /// Username to set.
        user: String,
    },
    /// Generate shell completion scripts.
    Completion {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Flags for `vncgate start`. Each one overrides the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct StartArgs {
    /// Address to listen on, e.g. 0.0.0.0:6080.
    #[arg(long)]
    pub listen: Option<String>,

    /// Hostname for the generated certificate.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Certificate file. Generated if it does not exist.
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Private key file. Generated if it does not exist.
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Serve plain HTTP (INSECURE).
    #[arg(long)]
    pub insecure: bool,

    /// Glob matching local VNC sockets to expose.
    #[arg(long)]
    pub watch_glob: Option<String>,

    /// Re-scan interval when no filesystem events arrive. 0 disables.
    #[arg(long)]
    pub watch_interval_ms: Option<u64>,

    /// Proxy /static/* to this origin instead of the bundled dashboard.
    #[arg(long)]
    pub debug_webapp_proxy: Option<String>,

    /// Credential file. Enables login when set.
    #[arg(long)]
    pub passwd_file: Option<PathBuf>,

    /// Static target URL (repeatable), e.g. tcp://:pass@host:5900 or unix:///path.
    #[arg(long = "target", value_name = "URL")]
    pub targets: Vec<String>,
}

impl StartArgs {
    /// Layer the flags over `config`.
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(hostname) = &self.hostname {
            config.hostname = hostname.clone();
        }
        if let Some(cert) = &self.tls_cert {
            config.tls.cert_path = Some(cert.clone());
        }
        if let Some(key) = &self.tls_key {
            config.tls.key_path = Some(key.clone());
        }
        if self.insecure {
            config.tls.disable = true;
        }
        if let Some(glob) = &self.watch_glob {
            config.discovery.watch_glob = Some(glob.clone());
        }
        if let Some(ms) = self.watch_interval_ms {
            config.discovery.poll_interval_ms = ms;
        }
        if let Some(origin) = &self.debug_webapp_proxy {
            config.debug_webapp_proxy = Some(origin.clone());
        }
        if let Some(file) = &self.passwd_file {
            config.auth.passwd_file = Some(file.clone());
        }
        config.targets.extend(self.targets.iter().cloned());
    }
}
