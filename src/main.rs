//! Signaling server binary.
//!
//! Usage:
//! ```bash
//! rendezvous-rs --host 0.0.0.0 --port 9999
//! ```

use anyhow::Result;
use clap::Parser;

use rendezvous_rs::{run_signaling_server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "rendezvous-rs")]
#[command(about = "Signaling and rendezvous server for P2P overlay networks")]
#[command(version)]
struct Args {
    /// Host to bind the signaling listener
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on
    #[arg(short, long, default_value_t = 9999)]
    port: u16,

    /// Seconds between liveness sweeps (a client missing two sweeps is
    /// disconnected)
    #[arg(long, default_value_t = 30)]
    liveness_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        liveness_interval_secs: args.liveness_interval,
        ..ServerConfig::default()
    };

    log::info!("Starting signaling server on {}", config.bind_addr());

    run_signaling_server(config).await
}
