//! Simulated telemetry host for broker-less operation
//!
//! Stands in for a real Sparkplug broker session so the gateway can run and
//! be tested without any MQTT infrastructure. The simulation keeps a small
//! set of home-automation metrics, random-walks one of them every churn tick
//! on its own thread, and tracks which ids changed since the last delta
//! snapshot - the same change-tracking contract a broker-backed host needs.
//!
//! Payloads are postcard-encoded [`MetricSample`]s. The gateway treats them
//! as opaque bytes either way; only this host encodes and decodes them.
//!
//! Commands and reconfigurations are recorded rather than forwarded, which
//! doubles as the observation point for tests.

use crate::error::{Error, Result};
use crate::host::{TelemetryHost, UpdateKind, UpdateRecord};
use log::{debug, info};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Interval between simulated metric changes
const CHURN_PERIOD: Duration = Duration::from_millis(250);

/// Decoded metric payload used by the simulated host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub value: f64,
}

impl MetricSample {
    /// Encode to the sim host's wire blob
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Decode from the sim host's wire blob
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        postcard::from_bytes(raw).map_err(|e| Error::Decode(e.to_string()))
    }
}

struct SimState {
    metrics: BTreeMap<String, MetricSample>,
    /// Ids changed since the last delta snapshot
    dirty: BTreeSet<String>,
    /// Ids removed since the last delta snapshot
    dead: Vec<String>,
    /// Recorded `command` calls, oldest first
    commands: Vec<(String, MetricSample)>,
    broker_address: String,
}

/// Broker-less [`TelemetryHost`] implementation
pub struct SimHost {
    state: Mutex<SimState>,
    running: AtomicBool,
    client_id: String,
    primary_host_id: String,
}

impl SimHost {
    /// Create a simulated host seeded with a few garage metrics
    pub fn new(broker_address: &str, client_id: &str, primary_host_id: &str) -> Self {
        let now = now_ms();
        let mut metrics = BTreeMap::new();
        for (id, value) in [
            ("home/garage/temperature", 21.5),
            ("home/garage/humidity", 40.0),
            ("home/garage/door", 0.0),
        ] {
            metrics.insert(
                id.to_string(),
                MetricSample {
                    timestamp_ms: now,
                    value,
                },
            );
        }

        Self {
            state: Mutex::new(SimState {
                metrics,
                dirty: BTreeSet::new(),
                dead: Vec::new(),
                commands: Vec::new(),
                broker_address: broker_address.to_string(),
            }),
            running: AtomicBool::new(true),
            client_id: client_id.to_string(),
            primary_host_id: primary_host_id.to_string(),
        }
    }

    /// Insert or overwrite a metric and mark it changed
    pub fn set_metric(&self, id: &str, sample: MetricSample) {
        let mut state = self.state.lock();
        state.metrics.insert(id.to_string(), sample);
        state.dirty.insert(id.to_string());
    }

    /// Remove a metric; the next delta snapshot carries its death record
    pub fn remove_metric(&self, id: &str) {
        let mut state = self.state.lock();
        if state.metrics.remove(id).is_some() {
            state.dirty.remove(id);
            state.dead.push(id.to_string());
        }
    }

    /// Recorded `command` calls, oldest first
    pub fn commands(&self) -> Vec<(String, MetricSample)> {
        self.state.lock().commands.clone()
    }

    /// Broker address last handed to `configure`
    pub fn broker_address(&self) -> String {
        self.state.lock().broker_address.clone()
    }
}

impl TelemetryHost for SimHost {
    type Payload = MetricSample;

    fn run(&self) -> Result<()> {
        info!(
            "Simulated host started (broker {}, client id {})",
            self.broker_address(),
            self.client_id
        );
        if !self.primary_host_id.is_empty() {
            info!("Primary host id: {}", self.primary_host_id);
        }

        while self.running.load(Ordering::Relaxed) {
            std::thread::sleep(CHURN_PERIOD);

            let mut state = self.state.lock();
            let count = state.metrics.len();
            if count == 0 {
                continue;
            }

            // Random-walk one metric per tick
            let pick = rand::thread_rng().gen_range(0..count);
            let id = state.metrics.keys().nth(pick).cloned();
            if let Some(id) = id {
                let step: f64 = rand::thread_rng().gen_range(-0.5..0.5);
                if let Some(sample) = state.metrics.get_mut(&id) {
                    sample.value += step;
                    sample.timestamp_ms = now_ms();
                }
                state.dirty.insert(id);
            }
        }

        info!("Simulated host stopped");
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn snapshot(&self, full: bool) -> Vec<UpdateRecord> {
        let mut state = self.state.lock();

        if full {
            return state
                .metrics
                .iter()
                .map(|(id, sample)| UpdateRecord {
                    id: id.clone(),
                    kind: UpdateKind::Birth,
                    payload: sample.to_bytes().ok(),
                })
                .collect();
        }

        let mut records: Vec<UpdateRecord> = Vec::new();
        for id in std::mem::take(&mut state.dead) {
            records.push(UpdateRecord {
                id,
                kind: UpdateKind::Death,
                payload: None,
            });
        }
        for id in std::mem::take(&mut state.dirty) {
            let payload = state.metrics.get(&id).and_then(|s| s.to_bytes().ok());
            records.push(UpdateRecord {
                id,
                kind: UpdateKind::Publish,
                payload,
            });
        }
        records
    }

    fn decode(&self, raw: &[u8]) -> Result<MetricSample> {
        MetricSample::from_bytes(raw)
    }

    fn command(&self, topic: &str, payload: MetricSample) {
        debug!("Recorded command for {}: {:?}", topic, payload);
        self.state
            .lock()
            .commands
            .push((topic.to_string(), payload));
    }

    fn configure(&self, address: &str) {
        info!("Simulated host reconfigured to {}", address);
        self.state.lock().broker_address = address.to_string();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
