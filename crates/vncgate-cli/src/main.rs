//! vncgate CLI: runs the gateway and manages its credential file.

mod cli;

use crate::cli::{Cli, Commands, StartArgs};
use anyhow::Context;
use clap::{CommandFactory, Parser};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use vncgate_kernel::auth::CredentialStore;
use vncgate_kernel::config::{load_config, validate_config};
use vncgate_kernel::Gateway;
use zeroize::Zeroize;

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result = match &cli.command {
        Commands::Start(args) => cmd_start(cli.config.as_deref(), args),
        Commands::Passwd { file, user } => cmd_passwd(file, user),
        Commands::Completion { shell } => {
            cmd_completion(*shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "vncgate failed");
            ExitCode::FAILURE
        }
    }
}

fn cmd_start(config_path: Option<&Path>, args: &StartArgs) -> anyhow::Result<()> {
    let mut config = load_config(config_path).context("failed to load configuration")?;
    args.apply(&mut config);
    validate_config(&config).context("invalid configuration")?;

    let rt = tokio::runtime::Runtime::new().context("failed to start the tokio runtime")?;
    rt.block_on(async {
        let gateway = Arc::new(Gateway::boot(config).context("gateway failed to boot")?);
        info!(
            listen = %gateway.config().listen_addr,
            targets = gateway.registry().len(),
            "Starting vncgate"
        );
        vncgate_api::server::run_gateway(gateway, shutdown_signal())
            .await
            .context("gateway server failed")?;
        info!("vncgate stopped");
        Ok::<(), anyhow::Error>(())
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}

fn read_secret(prompt: &str, input: &mut impl BufRead) -> anyhow::Result<String> {
    if io::stdin().is_terminal() {
        eprint!("{prompt}");
        io::stderr().flush().ok();
    }
    let mut line = String::new();
    input.read_line(&mut line).context("failed to read password")?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    line.zeroize();
    Ok(secret)
}

fn cmd_passwd(file: &Path, user: &str) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut password = read_secret("Password: ", &mut input)?;
    let mut confirm = read_secret("Confirm password: ", &mut input)?;

    let result = if password.is_empty() {
        Err(anyhow::anyhow!("password must not be empty"))
    } else if password != confirm {
        Err(anyhow::anyhow!("passwords do not match"))
    } else {
        CredentialStore::new(file)
            .set_password(user, &password)
            .with_context(|| format!("failed to update {}", file.display()))
    };
    password.zeroize();
    confirm.zeroize();
    result?;

    println!("Password for '{user}' saved to {}", file.display());
    Ok(())
}

fn cmd_completion(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "vncgate", &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_secret_strips_line_ending() {
        let mut input = io::Cursor::new(b"hunter2\r\nsecond\n".to_vec());
        assert_eq!(read_secret("", &mut input).unwrap(), "hunter2");
        assert_eq!(read_secret("", &mut input).unwrap(), "second");
        assert_eq!(read_secret("", &mut input).unwrap(), "");
    }
}
