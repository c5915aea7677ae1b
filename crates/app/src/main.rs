//! Firedeck - terminal client for shared estimation sessions
//!
//! Joins a game on the remote realtime database and renders the pushed
//! state until the user quits or the connection drops.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use firedeck_net::{Transport, TransportConfig};
use tracing::{error, info};

mod session;
mod ui;

/// Terminal client for a shared estimation session
#[derive(Debug, Parser)]
#[command(name = "firedeck", version, about)]
struct Args {
    /// Identifier of the game to join
    game_id: String,

    /// Websocket endpoint of the realtime database
    #[arg(long, default_value = "wss://firepoker-75089.firebaseio.com/.ws?v=5")]
    server: String,

    /// Display name announced to the other participants
    #[arg(long, default_value = "firedeck")]
    name: String,

    /// Diagnostic log file; the terminal itself belongs to the display
    #[arg(long, default_value = "firedeck.log")]
    log_file: PathBuf,

    /// Keepalive period in seconds
    #[arg(long, default_value_t = 45)]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_file = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("unable to open log file {}: {err}", args.log_file.display());
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .init();

    info!(game_id = %args.game_id, server = %args.server, "starting firedeck");

    let mut config = TransportConfig::new(args.server);
    config.heartbeat_interval = Duration::from_secs(args.heartbeat_secs.max(1));

    let mut transport = match Transport::connect(config).await {
        Ok(transport) => transport,
        Err(err) => {
            error!(error = %err, "unable to connect");
            eprintln!("unable to connect: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = session::join(&transport, &args.game_id, &args.name).await {
        error!(error = %err, "unable to join game");
        eprintln!("unable to join game {}: {err}", args.game_id);
        let _ = transport.disconnect().await;
        std::process::exit(1);
    }

    if let Err(err) = ui::run(&mut transport).await {
        error!(error = %err, "display error");
    }

    if let Err(err) = transport.disconnect().await {
        error!(error = %err, "error while disconnecting");
    }

    info!("stopped");
}
