//! Portal Link - console client
//!
//! Drives an Aurora Portal controller from the terminal.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use crate::cli::ReplCommand;
use portal_link::transport::sim::SimConfig;
use portal_link::{
    AppConfig, SessionEvent, SessionManager, SimTransport, Transport, TransportKind,
};

/// Portal Link - control an Aurora Portal LED controller over Bluetooth LE
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Use the simulated controller instead of the radio
    #[arg(long)]
    simulate: bool,

    /// Connect immediately on startup
    #[arg(long)]
    connect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    info!("Starting Portal Link v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = AppConfig::load(&args.config).await?;
    if args.simulate {
        config.transport = TransportKind::Simulated;
    }

    let transport = build_transport(&config).await?;
    info!("Using {} transport", transport.name());

    let session = SessionManager::spawn(transport, config.session_options());
    session.subscribe(Arc::new(|event: &SessionEvent| {
        println!("{}", cli::render_event(event));
    }));

    if args.connect {
        session.connect().await?;
    }

    cli::print_help();
    let mut lines = cli::spawn_reader();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match line.parse::<ReplCommand>() {
                    Ok(ReplCommand::Quit) => break,
                    Ok(command) => run_command(&session, command).await,
                    Err(e) => println!("{}", e),
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    session.shutdown().await;

    Ok(())
}

async fn run_command(session: &SessionManager, command: ReplCommand) {
    let result = match command {
        ReplCommand::Connect => session.connect().await,
        ReplCommand::Disconnect => session.disconnect().await,
        ReplCommand::Write { channel, value } => session.send_command(channel, value).await,
        ReplCommand::Named(command) => {
            let (channel, value) = command.to_write();
            session.send_command(channel, value).await
        }
        ReplCommand::Status { json } => {
            let snapshot = session.current_state();
            if json {
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(text) => println!("{}", text),
                    Err(e) => warn!("Failed to serialize snapshot: {}", e),
                }
            } else {
                println!("{}", cli::render_snapshot(&snapshot));
            }
            Ok(())
        }
        ReplCommand::Help => {
            cli::print_help();
            Ok(())
        }
        ReplCommand::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("{}", e.to_string().red());
    }
}

async fn build_transport(config: &AppConfig) -> Result<Arc<dyn Transport>> {
    match config.transport {
        TransportKind::Simulated => {
            let sim = SimTransport::new(SimConfig {
                name: config.device.name_filter.clone(),
                encoding: config.session.payload_encoding,
                notify_on_write: true,
                ..SimConfig::default()
            });
            Ok(Arc::new(sim))
        }
        #[cfg(feature = "bluetooth")]
        TransportKind::Bluetooth => {
            let btle = portal_link::transport::BtleTransport::new(config.scan_timeout()).await?;
            Ok(Arc::new(btle))
        }
        #[cfg(not(feature = "bluetooth"))]
        TransportKind::Bluetooth => {
            anyhow::bail!("Bluetooth support not compiled in (rebuild with --features bluetooth)")
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}
