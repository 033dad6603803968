//! CLI for the Scribe gateway
//!
//! Subcommands:
//! - `serve`: run the gateway (MQTT connection, inbound and maintenance
//!   loops, WebSocket control server)
//! - `device`: run a simulated device against a broker (useful for smoke
//!   tests)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use scribe_gateway::broker::{self, Transport};
use scribe_gateway::client::simulator::{self, DeviceProfile};
use scribe_gateway::config::load_config;
use scribe_gateway::gateway::Gateway;
use scribe_gateway::persistence::SledStore;
use scribe_gateway::transport::start_control_server;
use scribe_gateway::utils::logging;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "scribe-gateway")]
enum Command {
    /// Start the gateway
    Serve,
    /// Run a simulated device that answers every question
    Device {
        #[arg(long)]
        family_id: String,
        #[arg(long)]
        device_id: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Topic prefix issued with the credentials
        #[arg(long)]
        prefix: String,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value_t = 1883)]
        port: u16,
        #[arg(long, default_value = "ok")]
        reply: String,
        /// Seconds between retained status refreshes
        #[arg(long, default_value_t = 30)]
        heartbeat_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    match cmd {
        Command::Serve => {
            if let Err(e) = run_server().await {
                error!("Gateway failed: {e}");
            }
        }
        Command::Device {
            family_id,
            device_id,
            username,
            password,
            prefix,
            host,
            port,
            reply,
            heartbeat_secs,
        } => {
            logging::init("info");
            let profile = DeviceProfile {
                host,
                port,
                family_id,
                device_id,
                username,
                password,
                prefix,
                reply,
                heartbeat: Duration::from_secs(heartbeat_secs),
            };
            if let Err(e) = simulator::run(profile).await {
                error!("Device failed: {e}");
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.logging.level);

    let store = Arc::new(SledStore::open(&config.persistence.path)?);
    let (adapter, mqtt_loop, inbound) = broker::connect(&config.mqtt, &config.reconnect);
    let adapter = Arc::new(adapter);
    let transport: Arc<dyn Transport> = adapter.clone();
    let gateway = Arc::new(Gateway::new(&config, transport, store.clone())?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mqtt_task = tokio::spawn(mqtt_loop.run(shutdown_rx.clone()));
    tokio::spawn(gateway.clone().run_inbound(inbound));
    tokio::spawn(gateway.clone().run_maintenance(
        Duration::from_millis(config.gateway.sweep_interval_ms),
        shutdown_rx,
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tokio::select! {
        result = start_control_server(&addr, gateway.clone()) => {
            if let Err(e) = result {
                error!("Control server exited: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    gateway.shutdown();
    adapter.disconnect().await;
    let _ = shutdown_tx.send(true);
    let _ = mqtt_task.await;
    store.flush()?;

    Ok(())
}
