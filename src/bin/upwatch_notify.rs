//! upwatch listener - desktop notifications for daemon broadcasts
//!
//! Connects to the upwatch daemon's Unix socket, subscribes to status and
//! heartbeat broadcasts, and renders them as desktop notifications via
//! `notify-send`. Also manages the local suppression window.
//!
//! # Usage
//!
//! ```bash
//! # Run the listener (foreground; typically started by the session)
//! upwatch-notify run
//!
//! # Suppress informational notifications for a week
//! upwatch-notify ignore --days 7
//!
//! # Resume notifications
//! upwatch-notify resume
//! ```

use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use upwatch_core::Config;
use upwatch_notify::{
    ClientCommand, ClientConfig, DaemonClient, Listener, NotifySend, SuppressionFile, IGNORE_DAYS,
};

/// upwatch listener - desktop notifications for system update status
#[derive(Parser, Debug)]
#[command(name = "upwatch-notify", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the notification listener
    Run,
    /// Suppress informational notifications for a number of days
    Ignore {
        /// Suppression window length (1, 7, 15, or 30)
        #[arg(long)]
        days: u64,
    },
    /// Clear the suppression window and resume notifications
    Resume,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("Failed to load config")?;
    let suppression = SuppressionFile::new(&config.suppress_file);

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_listener(config, suppression),
        Command::Ignore { days } => {
            if !IGNORE_DAYS.contains(&days) {
                bail!(
                    "Unsupported window length {days}; choose one of {}",
                    IGNORE_DAYS.map(|d| d.to_string()).join(", ")
                );
            }
            suppression
                .set_days(days)
                .context("Failed to write suppression window")?;
            println!("Informational notifications suppressed for {days} day(s).");
            Ok(())
        }
        Command::Resume => {
            suppression
                .clear()
                .context("Failed to clear suppression window")?;
            println!("Notifications resumed.");
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_listener(config: Config, suppression: SuppressionFile) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("upwatch_notify=info".parse()?)
                .add_directive("upwatch_core=info".parse()?)
                .add_directive("upwatch_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "upwatch listener starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let client_config = ClientConfig {
        socket_path: config.socket_path.clone(),
        ..ClientConfig::default()
    };
    let client = DaemonClient::new(client_config, event_tx, command_rx, cancel_token.clone());
    let client_task = tokio::spawn(async move { client.run().await });

    // Late-join query: after the startup delay, ask for the current status
    // so a listener that missed the last broadcast still gets one.
    let query_delay = config.startup_query_delay();
    let query_cancel = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(query_delay) => {
                info!(delay_secs = query_delay.as_secs(), "Sending startup status query");
                let _ = command_tx.send(ClientCommand::Query);
            }
            _ = query_cancel.cancelled() => {}
        }
    });

    let listener = Listener::new(
        NotifySend,
        suppression,
        config.heartbeat_timeout(),
        event_rx,
        cancel_token.clone(),
    );
    listener.run().await;

    cancel_token.cancel();
    let _ = client_task.await;

    info!("upwatch listener stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
