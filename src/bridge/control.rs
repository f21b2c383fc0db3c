//! Dispatch / control loop
//!
//! Single dedicated thread, sole consumer of the action queue, and the only
//! caller into the telemetry host. Each iteration pops at most one action,
//! dispatches it, fires the periodic delta broadcast when its interval has
//! elapsed on a monotonic clock, and sleeps for one poll interval. The
//! sleep bounds worst-case per-action latency and broadcast jitter; this is
//! a polling loop, not an event-driven one.
//!
//! Every per-action failure (malformed frame, undecodable payload, frame
//! that would overflow the outbound cap) is contained here with a log line;
//! nothing short of the shared running flag clearing stops the loop. On the
//! way out the queue is drained so buffered actions do not outlive the
//! gateway.

use crate::bridge::queue::{Action, ActionQueue};
use crate::bridge::server::{Connection, FrameSink};
use crate::bridge::wire::{self, FrameEncoder};
use crate::config::GatewayConfig;
use crate::host::{TelemetryHost, UpdateRecord};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Bridges queued client actions to host operations and host state to
/// outbound frames
pub struct ControlLoop<H: TelemetryHost, S: FrameSink> {
    host: Arc<H>,
    sink: Arc<S>,
    queue: Arc<ActionQueue>,
    running: Arc<AtomicBool>,
    update_period: std::time::Duration,
    poll_interval: std::time::Duration,
    max_frame_size: usize,
}

impl<H: TelemetryHost, S: FrameSink> ControlLoop<H, S> {
    pub fn new(
        host: Arc<H>,
        sink: Arc<S>,
        queue: Arc<ActionQueue>,
        running: Arc<AtomicBool>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            host,
            sink,
            queue,
            running,
            update_period: config.timing.update_period(),
            poll_interval: config.timing.poll_interval(),
            max_frame_size: config.network.max_frame_size,
        }
    }

    /// Run until the shared running flag clears, then drain the queue
    pub fn run(&self) {
        info!("Control loop started");
        let mut last_tick = Instant::now();

        while self.running.load(Ordering::Relaxed) {
            if let Some(action) = self.queue.try_pop() {
                self.dispatch(action);
            }

            if last_tick.elapsed() >= self.update_period {
                last_tick = Instant::now();
                self.broadcast_delta();
            }

            std::thread::sleep(self.poll_interval);
        }

        let leftover = self.queue.drain();
        if leftover > 0 {
            info!("Dropped {} queued actions during shutdown", leftover);
        }
        info!("Control loop stopped");
    }

    fn dispatch(&self, action: Action) {
        match action {
            Action::Resync { origin } => self.handle_resync(&origin),
            Action::Command { frame, .. } => self.handle_command(&frame),
            Action::Configure { frame, .. } => self.handle_configure(&frame),
        }
        // A command/configure frame buffer is dropped here on every path.
    }

    /// Full snapshot, unicast to the requesting connection only
    fn handle_resync(&self, origin: &Connection) {
        let records = self.host.snapshot(true);
        let frame = self.encode(&records);
        self.sink.send(&frame, origin);
        debug!("Resynced {} with {} records", origin.id(), records.len());
    }

    /// Topic + payload handed to the host, or silently discarded
    fn handle_command(&self, frame: &[u8]) {
        let (topic, payload) = match wire::parse_command(frame) {
            Ok(parts) => parts,
            Err(e) => {
                debug!("Discarding command frame: {}", e);
                return;
            }
        };
        match self.host.decode(payload) {
            // The decoded payload moves into the host; no reply is sent.
            Ok(decoded) => self.host.command(&topic, decoded),
            Err(e) => debug!("Discarding command for {}: {}", topic, e),
        }
    }

    fn handle_configure(&self, frame: &[u8]) {
        match wire::parse_configure(frame) {
            Ok(address) => {
                info!("Reconfiguring host to {}", address);
                self.host.configure(&address);
            }
            Err(e) => debug!("Discarding configure frame: {}", e),
        }
    }

    /// Delta snapshot broadcast to every registered session
    ///
    /// Fires every tick even with no changes; the zero-record frame is the
    /// per-second liveness signal clients count on.
    fn broadcast_delta(&self) {
        let records = self.host.snapshot(false);
        let frame = self.encode(&records);
        let attempts = self.sink.broadcast(&frame);
        debug!("Broadcast {} records to {} sessions", records.len(), attempts);
    }

    /// Encode records, truncating at a record boundary when the frame
    /// would exceed the configured cap
    fn encode(&self, records: &[UpdateRecord]) -> Vec<u8> {
        let mut encoder = FrameEncoder::new(self.max_frame_size);
        for record in records {
            if let Err(e) = encoder.append(record) {
                error!("Truncating outbound frame at {}: {}", record.id, e);
                break;
            }
        }
        encoder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::server::ConnectionId;
    use crate::host::{MetricSample, SimHost, UpdateKind};
    use parking_lot::Mutex;

    /// Records every sink call instead of touching sockets
    struct RecordingSink {
        sent: Mutex<Vec<(ConnectionId, Vec<u8>)>>,
        broadcasts: Mutex<Vec<Vec<u8>>>,
        registered: usize,
    }

    impl RecordingSink {
        fn new(registered: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                broadcasts: Mutex::new(Vec::new()),
                registered,
            }
        }
    }

    impl FrameSink for RecordingSink {
        fn send(&self, frame: &[u8], connection: &Connection) {
            self.sent.lock().push((connection.id(), frame.to_vec()));
        }

        fn broadcast(&self, frame: &[u8]) -> usize {
            self.broadcasts.lock().push(frame.to_vec());
            self.registered
        }
    }

    fn control(
        registered: usize,
    ) -> (
        ControlLoop<SimHost, RecordingSink>,
        Arc<SimHost>,
        Arc<RecordingSink>,
        Arc<ActionQueue>,
        Arc<AtomicBool>,
    ) {
        let host = Arc::new(SimHost::new("tcp://localhost:1883", "test_client", ""));
        let sink = Arc::new(RecordingSink::new(registered));
        let queue = Arc::new(ActionQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let loop_ = ControlLoop::new(
            Arc::clone(&host),
            Arc::clone(&sink),
            Arc::clone(&queue),
            Arc::clone(&running),
            &GatewayConfig::default(),
        );
        (loop_, host, sink, queue, running)
    }

    fn command_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut frame = (topic.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(topic.as_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_resync_unicasts_full_snapshot_to_origin_only() {
        let (control, _host, sink, _queue, _running) = control(0);
        let origin = Connection::dangling(9);

        control.dispatch(Action::Resync {
            origin: origin.clone(),
        });

        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, origin.id());
        assert!(sink.broadcasts.lock().is_empty());

        // Three seeded metrics, all delivered as births
        let records = wire::decode_records(&sent[0].1).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.kind == UpdateKind::Birth));
    }

    #[test]
    fn test_decodable_command_reaches_host_exactly_once_with_no_reply() {
        let (control, host, sink, _queue, _running) = control(0);
        let topic = "spBv1.0/home/NCMD/garage";
        let payload = MetricSample {
            timestamp_ms: 5,
            value: 1.0,
        }
        .to_bytes()
        .unwrap();

        control.dispatch(Action::Command {
            origin: Connection::dangling(1),
            frame: command_frame(topic, &payload),
        });

        let commands = host.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, topic);
        assert!(sink.sent.lock().is_empty());
        assert!(sink.broadcasts.lock().is_empty());
    }

    #[test]
    fn test_undecodable_command_is_discarded_silently() {
        let (control, host, sink, _queue, _running) = control(0);

        control.dispatch(Action::Command {
            origin: Connection::dangling(1),
            frame: command_frame("a", &[0xAA, 0xBB, 0xCC]),
        });

        assert!(host.commands().is_empty());
        assert!(sink.sent.lock().is_empty());
    }

    #[test]
    fn test_overlong_topic_never_reaches_host() {
        let (control, host, _sink, _queue, _running) = control(0);

        // Declares 100 topic bytes but carries one
        let mut frame = 100u32.to_le_bytes().to_vec();
        frame.push(b'a');
        control.dispatch(Action::Command {
            origin: Connection::dangling(1),
            frame,
        });

        assert!(host.commands().is_empty());
    }

    #[test]
    fn test_configure_forwards_address_to_host() {
        let (control, host, _sink, _queue, _running) = control(0);
        let address = "tcp://broker.local:1883";
        let mut frame = (address.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(address.as_bytes());

        control.dispatch(Action::Configure {
            origin: Connection::dangling(1),
            frame,
        });

        assert_eq!(host.broker_address(), address);
    }

    #[test]
    fn test_delta_tick_broadcasts_even_when_idle() {
        let (control, host, sink, _queue, _running) = control(4);

        // Nothing changed: the tick still attempts every session, with a
        // zero-record frame.
        control.broadcast_delta();
        {
            let broadcasts = sink.broadcasts.lock();
            assert_eq!(broadcasts.len(), 1);
            assert!(broadcasts[0].is_empty());
        }

        host.set_metric(
            "home/garage/door",
            MetricSample {
                timestamp_ms: 1,
                value: 1.0,
            },
        );
        control.broadcast_delta();

        let broadcasts = sink.broadcasts.lock();
        assert_eq!(broadcasts.len(), 2);
        let records = wire::decode_records(&broadcasts[1]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, UpdateKind::Publish);
    }

    #[test]
    fn test_run_broadcasts_once_per_period_while_idle() {
        let (control, _host, sink, _queue, running) = control(2);

        let handle = std::thread::spawn(move || control.run());
        std::thread::sleep(std::time::Duration::from_millis(2300));
        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();

        let broadcasts = sink.broadcasts.lock();
        assert!(
            broadcasts.len() >= 2,
            "expected a broadcast attempt per delta tick, got {}",
            broadcasts.len()
        );
        assert!(broadcasts.iter().all(|frame| frame.is_empty()));
    }

    #[test]
    fn test_shutdown_drains_queued_actions() {
        let (control, _host, sink, queue, running) = control(0);
        for id in 0..3 {
            queue.push(Action::Resync {
                origin: Connection::dangling(id),
            });
        }

        running.store(false, Ordering::Relaxed);
        control.run();

        assert!(queue.is_empty());
        assert!(sink.sent.lock().is_empty(), "drained actions are dropped, not dispatched");
    }
}
