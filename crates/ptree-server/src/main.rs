//! Property tree server (`ptree-server`)
//!
//! Serves a single in-memory property tree over TCP until interrupted.

use std::{net::SocketAddr, process::ExitCode, time::Duration};

use clap::Parser;
use ptree_core::FramerConfig;
use ptree_server::{DEFAULT_PORT, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ptree-server", version, about = "Property tree server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    bind: SocketAddr,

    /// Largest accepted message body in bytes
    #[arg(long, default_value_t = FramerConfig::default().max_body_size)]
    max_body_size: usize,

    /// Idle reads tolerated in the middle of a message
    #[arg(long, default_value_t = FramerConfig::default().max_idle_reads)]
    idle_reads: u32,

    /// Read window in milliseconds after which a read counts as idle
    #[arg(long, default_value_t = 500)]
    read_timeout_ms: u64,

    /// Milliseconds a peer may take to accept a write before it is dropped
    #[arg(long, default_value_t = 10_000)]
    write_timeout_ms: u64,

    /// Queued notifications per session before the peer is dropped
    #[arg(long, default_value_t = ServerConfig::default().max_outbox_entries)]
    max_outbox: usize,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            framer: FramerConfig {
                max_body_size: self.max_body_size,
                max_idle_reads: self.idle_reads,
            },
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            max_outbox_entries: self.max_outbox,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    tracing::info!("ptree-server v{} starting", env!("CARGO_PKG_VERSION"));

    let server = std::sync::Arc::new(Server::new(args.config()));
    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, "failed to start");
            return ExitCode::FAILURE;
        },
    };

    let running = tokio::spawn({
        let server = std::sync::Arc::clone(&server);
        async move { server.run(listener).await }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    server.shutdown();

    match running.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(error)) => {
            tracing::error!(%error, "server failed");
            ExitCode::FAILURE
        },
        Err(error) => {
            tracing::error!(%error, "server task panicked");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins over -v.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            },
            _ => {
                tracing::warn!("signal handlers unavailable, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            },
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
