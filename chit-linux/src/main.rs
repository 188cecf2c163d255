// ChitChat Linux: host or join a LAN chat from the terminal.

use std::sync::Arc;

use anyhow::Context;
use chit_core::identity::{display_name, ANONYMOUS_NAME, DEFAULT_HOST_NAME};
use chit_linux::terminal::{self, ConsoleSink};
use chit_linux::{config, Node};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chit-linux", version, about = "LAN group chat: host a room or join one")]
struct Cli {
    /// Port to listen on (host) or dial when the address has none (join).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Display name shown to the other participants.
    #[arg(long, global = true)]
    name: Option<String>,
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Host a chat room on this machine.
    Host {
        /// No interactive input; run until SIGTERM or Ctrl+C.
        #[arg(long)]
        headless: bool,
    },
    /// Join the room hosted at ADDRESS (`ip` or `ip:port`).
    Join { address: String },
}

fn init_tracing(verbose: bool) {
    let directive = if verbose { "chit_linux=debug" } else { "chit_linux=info" };
    let filter = EnvFilter::from_default_env().add_directive(
        directive
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let Cli {
        port,
        name,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);

    let mut cfg = config::load();
    if let Some(port) = port {
        cfg.port = port;
    }
    let raw_name = name.or_else(|| cfg.display_name.clone()).unwrap_or_default();
    let own_name = match command {
        Mode::Host { .. } => display_name(&raw_name, DEFAULT_HOST_NAME),
        Mode::Join { .. } => display_name(&raw_name, ANONYMOUS_NAME),
    };

    let rt = tokio::runtime::Runtime::new().context("cannot start tokio runtime")?;
    rt.block_on(async move {
        let node = Node::new(cfg, Arc::new(ConsoleSink::new(&own_name)));
        let result = match start(&node, &command, &own_name).await {
            Ok(true) => {
                let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                tokio::select! {
                    _ = terminal::run(&node, stdin) => Ok(()),
                    r = shutdown_signal() => r,
                }
            }
            Ok(false) => shutdown_signal().await,
            Err(e) => Err(e),
        };
        info!("shutting down");
        node.stop().await;
        result
    })
}

/// Start the requested role. Returns whether to read commands from stdin.
async fn start(node: &Node, mode: &Mode, own_name: &str) -> anyhow::Result<bool> {
    match mode {
        Mode::Host { headless } => match node.start_host(own_name).await {
            Ok(addr) => {
                println!("Hosting on: {addr}");
                Ok(!headless)
            }
            Err(e) => {
                error!(error = %e, "cannot host");
                println!("Host failed: {e}");
                Err(e.into())
            }
        },
        Mode::Join { address } => match node.start_client(address, own_name).await {
            Ok(()) => {
                println!("Connected as {own_name}.");
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "cannot join");
                println!("Connection failed. Check the address and the network.");
                Err(e.into())
            }
        },
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("cannot watch SIGTERM")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.context("cannot watch Ctrl+C")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("cannot watch Ctrl+C")?;
    }
    Ok(())
}
