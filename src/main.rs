//! Setu gateway daemon
//!
//! Wires the telemetry host, the WebSocket server, and the control loop
//! together, each on its own named thread, and tears all three down on
//! Ctrl-C:
//!
//! ```text
//! sim-host      host.run()      broker-side session loop
//! ws-accept     server.run()    accept loop + per-session ws-conn-N threads
//! control-loop  control.run()   action dispatch + periodic delta broadcast
//! ```
//!
//! Usage: `setu-gateway [broker-address] [primary-host-id] [client-id]`,
//! optionally with `--config <path>` to load a TOML file first; positional
//! arguments override the file.

use setu_gateway::bridge::{ActionQueue, ControlLoop, GatewayServer};
use setu_gateway::config::GatewayConfig;
use setu_gateway::error::{Error, Result};
use setu_gateway::host::{SimHost, TelemetryHost};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Build the configuration from an optional TOML file plus the positional
/// arguments (broker address, primary host id, client id).
fn load_config() -> Result<GatewayConfig> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut config = GatewayConfig::default();
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" || args[i] == "-c" {
            let path = args
                .get(i + 1)
                .ok_or_else(|| Error::Config("--config requires a path".to_string()))?;
            log::info!("Using config: {}", path);
            config = GatewayConfig::from_file(path)?;
            i += 2;
            continue;
        }
        positional.push(args[i].clone());
        i += 1;
    }

    if let Some(address) = positional.first() {
        config.broker.address = address.clone();
    }
    if let Some(host_id) = positional.get(1) {
        config.broker.primary_host_id = host_id.clone();
    }
    if let Some(client_id) = positional.get(2) {
        config.broker.client_id = Some(client_id.clone());
    }

    Ok(config)
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Setu gateway v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let client_id = config.resolved_client_id();

    log::info!(
        "Connecting to {} with client id {}",
        config.broker.address,
        client_id
    );
    if !config.broker.primary_host_id.is_empty() {
        log::info!("Primary host id: {}", config.broker.primary_host_id);
    }

    let host = Arc::new(SimHost::new(
        &config.broker.address,
        &client_id,
        &config.broker.primary_host_id,
    ));
    let queue = Arc::new(ActionQueue::new());
    let server = Arc::new(GatewayServer::bind(
        &config.network.bind_address,
        Arc::clone(&queue),
    )?);
    let running = Arc::new(AtomicBool::new(true));

    // Shutdown signal: flip the shared flag and ask both collaborators to
    // stop; the threads observe and wind down cooperatively.
    {
        let running = Arc::clone(&running);
        let host = Arc::clone(&host);
        let server = Arc::clone(&server);
        ctrlc::set_handler(move || {
            log::info!("Received shutdown signal");
            running.store(false, Ordering::Relaxed);
            host.stop();
            server.stop();
        })
        .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;
    }

    let host_thread = thread::Builder::new().name("sim-host".to_string()).spawn({
        let host = Arc::clone(&host);
        move || {
            if let Err(e) = host.run() {
                log::error!("Host error: {}", e);
            }
        }
    })?;

    let server_thread = thread::Builder::new().name("ws-accept".to_string()).spawn({
        let server = Arc::clone(&server);
        move || {
            if let Err(e) = server.run() {
                log::error!("Gateway server error: {}", e);
            }
        }
    })?;

    let control = ControlLoop::new(
        Arc::clone(&host),
        Arc::clone(&server),
        Arc::clone(&queue),
        Arc::clone(&running),
        &config,
    );
    let control_thread = thread::Builder::new()
        .name("control-loop".to_string())
        .spawn(move || control.run())?;

    log::info!(
        "Setu gateway running on {}. Press Ctrl-C to stop.",
        config.network.bind_address
    );

    // Wait for all three threads before exiting
    for (name, handle) in [
        ("control-loop", control_thread),
        ("sim-host", host_thread),
        ("ws-accept", server_thread),
    ] {
        if handle.join().is_err() {
            log::error!("Thread {} panicked", name);
        }
    }

    log::info!("Setu gateway stopped");
    Ok(())
}
