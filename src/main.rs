//! Binary entry point: parse the command line, initialize logging, freeze
//! the shell-type registry from configuration, start the manager task, and
//! serve HTTP until ctrl-c.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shellmux::config::{default_config_path, Config, ShellTypeRegistry};
use shellmux::manager::ShellManager;
use shellmux::server;

#[derive(Parser)]
#[command(
    name = "shellmux",
    about = "Long-polling HTTP gateway to interactive PTY-backed shells"
)]
struct Args {
    /// Configuration file (defaults to ./shellmux.toml, then
    /// ~/.shellmux/shellmux.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = Config::load(&config_path)?;
    let registry = ShellTypeRegistry::from_config(&config)?;
    let handle = ShellManager::start(registry);

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    info!(addr = %listener.local_addr()?, "shellmux listening");

    server::run_server(listener, handle).await
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shellmux=info"));
    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log file path has no file name"))?;
            let appender = tracing_appender::rolling::never(dir, file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
