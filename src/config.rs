//! Configuration for the Setu gateway
//!
//! Loads configuration from a TOML file with the minimal parameters needed
//! to bridge one telemetry host to WebSocket clients. Every section has
//! working defaults so the daemon runs with no file at all; the positional
//! command line arguments (broker address, primary host id, client id)
//! override whatever was loaded.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Broker-side identity passed to the telemetry host
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// MQTT broker address the host session connects to
    pub address: String,
    /// Primary host id announced on the broker (empty = none)
    pub primary_host_id: String,
    /// Broker client id; generated at startup when absent
    pub client_id: Option<String>,
}

/// WebSocket listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP bind address for the WebSocket listener
    ///
    /// Examples:
    /// - `0.0.0.0:9000` - Bind to all interfaces on port 9000
    /// - `127.0.0.1:9000` - Localhost only
    pub bind_address: String,
    /// Cap on one encoded outbound frame; larger frames are truncated
    /// at a record boundary with an error logged
    pub max_frame_size: usize,
}

/// Control loop timing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Seconds between delta broadcasts to all sessions
    pub update_period_secs: u64,
    /// Milliseconds the control loop sleeps between iterations; bounds
    /// worst-case per-action latency
    pub poll_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "tcp://localhost:1883".to_string(),
            primary_host_id: String::new(),
            client_id: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9000".to_string(),
            max_frame_size: crate::bridge::wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            update_period_secs: 1,
            poll_interval_ms: 20,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Broker client id, generating a fresh one when not configured
    pub fn resolved_client_id(&self) -> String {
        self.broker
            .client_id
            .clone()
            .unwrap_or_else(|| format!("sparkplug_host_{}", rand::random::<u32>()))
    }
}

impl TimingConfig {
    /// Interval between delta broadcasts
    pub fn update_period(&self) -> Duration {
        Duration::from_secs(self.update_period_secs)
    }

    /// Sleep between control loop iterations
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
