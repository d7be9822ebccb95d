//! # Transport Bridge
//!
//! Owns the single upstream connection and drives it through
//! `Disconnected → Connecting → Connected → (Closed | Errored) → Disconnected`,
//! retrying after a fixed delay forever.
//!
//! ## Data flow
//!
//! ```text
//! device bytes → line framing → JSON object  → normalizer → broadcast
//!                             → STATE: line  → relay tracker (authoritative)
//! subscriber   → ClientCommand → relay tracker (optimistic) → device
//! ```
//!
//! Broadcasting happens inline in the read loop. Subscribers have their own
//! queues, so a slow or dead subscriber never stalls the device link.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use super::command::ClientCommand;
use super::line::{classify_line, LineFramer, UpstreamLine};
use super::registry::{Outbound, SubscriberId, SubscriberRegistry, Subscription};
use crate::config::Config;
use crate::error::{PodBridgeError, Result};
use crate::health::{score, HealthInput, HealthReport};
use crate::relay::{
    CommandDialect, DeviceCommand, RelayCommand, RelayKey, RelayState, RelayTracker, StateSource,
};
use crate::serial::{BoxedUpstream, UpstreamConnector};
use crate::telemetry::normalizer::reported_relay_state;
use crate::telemetry::{FrameNormalizer, TelemetryFrame, DEFAULT_HISTORY_CAPACITY};

/// Default delay between upstream connection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Upstream link lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Device closed the stream, or teardown was requested
    Closed,
    /// Open or read failed
    Errored,
}

/// Bridge tuning
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub dialect: CommandDialect,
    pub reconnect_delay: Duration,
    pub history_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            dialect: CommandDialect::default(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dialect: config.serial.dialect,
            reconnect_delay: Duration::from_millis(config.serial.reconnect_interval_ms),
            history_capacity: config.telemetry.history_capacity,
        }
    }
}

/// Mediates between one device link and any number of subscribers
///
/// Shared as `Arc<Bridge>`; [`run`](Bridge::run) drives the upstream side
/// while subscriber tasks call [`subscribe`](Bridge::subscribe) and
/// [`submit`](Bridge::submit).
///
/// Lock order is `writer` before `relays`; the read loop never takes `writer`.
pub struct Bridge {
    connector: Arc<dyn UpstreamConnector>,
    settings: BridgeSettings,
    relays: Mutex<RelayTracker>,
    telemetry: Mutex<FrameNormalizer>,
    registry: Mutex<SubscriberRegistry>,
    writer: Mutex<Option<WriteHalf<BoxedUpstream>>>,
    /// Teardown signal for the live session, if any
    session: Mutex<Option<Arc<Notify>>>,
    state: watch::Sender<ConnectionState>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("upstream", &self.connector.describe())
            .field("settings", &self.settings)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Create a bridge; nothing is opened until [`run`](Bridge::run)
    pub fn new(connector: Arc<dyn UpstreamConnector>, settings: BridgeSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            relays: Mutex::new(RelayTracker::new()),
            telemetry: Mutex::new(FrameNormalizer::new(settings.history_capacity)),
            registry: Mutex::new(SubscriberRegistry::new()),
            writer: Mutex::new(None),
            session: Mutex::new(None),
            state,
            settings,
        }
    }

    /// Keep the upstream link open, forever
    ///
    /// Every closed or failed attempt is followed by the fixed reconnect
    /// delay. Cancel by aborting the task running this future.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Bridging {} (dialect {:?}, reconnect every {:?})",
            self.connector.describe(),
            self.settings.dialect,
            self.settings.reconnect_delay
        );

        loop {
            let outcome = self.run_once().await;
            debug!(
                "Upstream attempt ended {:?}, retrying in {:?}",
                outcome, self.settings.reconnect_delay
            );
            tokio::time::sleep(self.settings.reconnect_delay).await;
        }
    }

    /// One connection attempt, through to teardown
    ///
    /// # Returns
    ///
    /// * `ConnectionState` - `Closed` or `Errored`; the bridge is back in
    ///   `Disconnected` when this returns
    pub async fn run_once(&self) -> ConnectionState {
        self.set_state(ConnectionState::Connecting);

        let outcome = match self.connector.connect().await {
            Ok(stream) => self.run_session(stream).await,
            Err(e) => {
                warn!("Upstream connect failed: {}", e);
                ConnectionState::Errored
            }
        };

        self.set_state(outcome);
        self.set_state(ConnectionState::Disconnected);
        outcome
    }

    async fn run_session(&self, stream: BoxedUpstream) -> ConnectionState {
        let (reader, writer) = tokio::io::split(stream);
        let teardown = Arc::new(Notify::new());

        *self.writer.lock().await = Some(writer);
        *self.session.lock().await = Some(Arc::clone(&teardown));
        self.set_state(ConnectionState::Connected);
        info!("Upstream connected: {}", self.connector.describe());

        if self.settings.dialect == CommandDialect::Named {
            if let Err(e) = self.submit(ClientCommand::Status).await {
                warn!("Failed to request relay status: {}", e);
            }
        }

        let outcome = match self.read_loop(reader, &teardown).await {
            Ok(()) => {
                info!("Upstream closed");
                ConnectionState::Closed
            }
            Err(e) => {
                warn!("Upstream read failed: {}", e);
                ConnectionState::Errored
            }
        };

        self.session.lock().await.take();
        self.writer.lock().await.take();
        outcome
    }

    async fn read_loop(
        &self,
        mut reader: ReadHalf<BoxedUpstream>,
        teardown: &Notify,
    ) -> Result<()> {
        let mut framer = LineFramer::new();

        loop {
            framer.buffer_mut().reserve(1024);

            let read = tokio::select! {
                read = reader.read_buf(framer.buffer_mut()) => read?,
                _ = teardown.notified() => {
                    info!("Upstream teardown requested");
                    return Ok(());
                }
            };

            if read == 0 {
                return Ok(());
            }

            while let Some(line) = framer.next_line() {
                self.handle_line(&line).await;
            }

            if framer.discard_oversized() {
                warn!(
                    "Discarded unterminated upstream line longer than {} bytes",
                    super::line::MAX_LINE_LEN
                );
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        match classify_line(line) {
            Ok(UpstreamLine::Telemetry(payload)) => self.handle_telemetry(payload).await,
            Ok(UpstreamLine::State(flags)) => {
                self.relays.lock().await.apply_authoritative(flags);
                self.telemetry
                    .lock()
                    .await
                    .set_reported_relay_state(RelayState::from_flags(flags));
                debug!("Device reported relay state {:?}", flags);
            }
            Ok(UpstreamLine::Ignored) => {
                if !line.is_empty() {
                    debug!("Ignoring upstream line: {:?}", line);
                }
            }
            Err(e) => warn!("Dropping upstream line ({}): {:?}", e, line),
        }
    }

    async fn handle_telemetry(&self, payload: Value) {
        let received_at = Utc::now();

        let relay_state = {
            let mut relays = self.relays.lock().await;
            if let Some(reported) = reported_relay_state(&payload) {
                relays.apply_authoritative(reported.flags());
            }
            relays.state()
        };

        let frame = match self.telemetry.lock().await.apply(&payload, received_at) {
            Ok(frame) => frame.clone(),
            Err(e) => {
                warn!("Rejected telemetry payload: {}", e);
                return;
            }
        };

        let input = HealthInput::at(self.is_connected(), &frame, relay_state, received_at);
        let health = score(&input);

        match encode_broadcast(payload, &frame, relay_state, &health) {
            Ok(message) => {
                let delivered = self.registry.lock().await.broadcast(message);
                debug!(
                    "Broadcast frame to {} subscriber(s), health {}",
                    delivered, health.overall_score
                );
            }
            Err(e) => warn!("Failed to encode frame for subscribers: {}", e),
        }
    }

    /// Execute a subscriber command
    ///
    /// The relay tracker is updated optimistically, then the encoded
    /// commands are written upstream in order.
    ///
    /// # Returns
    ///
    /// * `Result<Vec<String>>` - Lines written to the device
    ///
    /// # Errors
    ///
    /// - `NotConnected` if no upstream link is open (state is left unchanged)
    /// - `Serial` if a write fails part-way
    pub async fn submit(&self, command: ClientCommand) -> Result<Vec<String>> {
        self.dispatch(|relays| match command {
            ClientCommand::Relay(cmd) => vec![DeviceCommand::Relay(relays.apply(cmd))],
            ClientCommand::EmergencyBrake => {
                warn!("Emergency brake requested");
                relay_commands(relays.emergency_stop_sequence())
            }
            ClientCommand::Resume => relay_commands(relays.resume_sequence()),
            ClientCommand::AllOn => {
                relays.all_on();
                vec![DeviceCommand::AllOn]
            }
            ClientCommand::AllOff => {
                relays.all_off();
                vec![DeviceCommand::AllOff]
            }
            ClientCommand::Status => vec![DeviceCommand::Status],
        })
        .await
    }

    /// Flip one relay based on its current tracked state
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Bridge::submit)
    pub async fn toggle_relay(&self, key: RelayKey) -> Result<RelayCommand> {
        let mut toggled = None;
        self.dispatch(|relays| {
            let cmd = relays.toggle(key);
            toggled = Some(cmd);
            vec![DeviceCommand::Relay(cmd)]
        })
        .await?;
        toggled.ok_or(PodBridgeError::NotConnected)
    }

    async fn dispatch<F>(&self, plan: F) -> Result<Vec<String>>
    where
        F: FnOnce(&mut RelayTracker) -> Vec<DeviceCommand>,
    {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(PodBridgeError::NotConnected)?;

        let commands = plan(&mut *self.relays.lock().await);

        let mut written = Vec::new();
        for command in commands {
            for line in command.encode(self.settings.dialect) {
                write_line(writer, &line).await?;
                written.push(line);
            }
        }
        Ok(written)
    }

    /// End the current upstream session; the bridge reconnects after the
    /// usual delay
    ///
    /// # Returns
    ///
    /// * `bool` - Whether a session was open
    pub async fn drop_upstream(&self) -> bool {
        match self.session.lock().await.as_ref() {
            Some(teardown) => {
                teardown.notify_one();
                true
            }
            None => false,
        }
    }

    /// Register a subscriber; it first receives the last broadcast frame, if any
    pub async fn subscribe(&self) -> Subscription {
        let subscription = self.registry.lock().await.subscribe();
        info!("Subscriber {} joined", subscription.id);
        subscription
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.registry.lock().await.unsubscribe(id);
        info!("Subscriber {} left", id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Observe connection state transitions
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub async fn relay_state(&self) -> (RelayState, StateSource) {
        let relays = self.relays.lock().await;
        (relays.state(), relays.source())
    }

    /// Current frame, or `None` before the first payload
    pub async fn latest_frame(&self) -> Option<TelemetryFrame> {
        let telemetry = self.telemetry.lock().await;
        telemetry.has_frame().then(|| telemetry.current().clone())
    }

    /// Retained frames, oldest first
    pub async fn history(&self) -> Vec<TelemetryFrame> {
        self.telemetry.lock().await.history().iter().cloned().collect()
    }

    pub async fn clear_history(&self) {
        self.telemetry.lock().await.clear_history();
    }

    /// Fresh health report for the current frame as of `now`
    pub async fn health(&self, now: DateTime<Utc>) -> HealthReport {
        let relay_state = self.relays.lock().await.state();
        let telemetry = self.telemetry.lock().await;
        score(&HealthInput::at(self.is_connected(), telemetry.current(), relay_state, now))
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Upstream {:?} -> {:?}", previous, state);
        }
    }
}

fn relay_commands(commands: Vec<RelayCommand>) -> Vec<DeviceCommand> {
    commands.into_iter().map(DeviceCommand::Relay).collect()
}

async fn write_line(writer: &mut WriteHalf<BoxedUpstream>, line: &str) -> Result<()> {
    writer
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .map_err(|e| PodBridgeError::Serial(format!("Failed to write {:?}: {}", line, e)))?;

    writer
        .flush()
        .await
        .map_err(|e| PodBridgeError::Serial(format!("Failed to flush serial port: {}", e)))?;

    debug!("Sent upstream command: {}", line);
    Ok(())
}

/// Subscriber message: the device payload plus `timestamp` (if the device
/// sent none), `frame`, `relayStates` and `health`
fn encode_broadcast(
    payload: Value,
    frame: &TelemetryFrame,
    relay_state: RelayState,
    health: &HealthReport,
) -> Result<Outbound> {
    let Value::Object(mut message) = payload else {
        return Err(PodBridgeError::Decode("telemetry payload must be a JSON object".to_string()));
    };

    let has_timestamp = message.get("timestamp").is_some_and(|ts| !ts.is_null());
    if !has_timestamp {
        if let Some(ts) = frame.timestamp {
            message.insert(
                "timestamp".to_string(),
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
    }

    message.insert("frame".to_string(), serde_json::to_value(frame)?);
    message.insert("relayStates".to_string(), serde_json::to_value(relay_state)?);
    message.insert("health".to_string(), serde_json::to_value(health)?);

    Ok(Arc::from(Value::Object(message).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use crate::serial::port_trait::mocks::DuplexConnector;
    use crate::serial::port_trait::MockUpstreamConnector;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn settings(dialect: CommandDialect, delay_ms: u64) -> BridgeSettings {
        BridgeSettings {
            dialect,
            reconnect_delay: Duration::from_millis(delay_ms),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    fn start(
        connector: &DuplexConnector,
        settings: BridgeSettings,
    ) -> (Arc<Bridge>, JoinHandle<()>) {
        let bridge = Arc::new(Bridge::new(Arc::new(connector.clone()), settings));
        let task = tokio::spawn(Arc::clone(&bridge).run());
        (bridge, task)
    }

    async fn wait_connected(bridge: &Bridge) {
        let mut rx = bridge.watch_connection();
        timeout(WAIT, rx.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .expect("bridge never connected")
            .unwrap();
    }

    async fn recv_json(sub: &mut Subscription) -> Value {
        let msg = timeout(WAIT, sub.receiver.recv())
            .await
            .expect("no message within timeout")
            .expect("subscription closed");
        serde_json::from_str(&msg).unwrap()
    }

    async fn read_device_line(reader: &mut BufReader<tokio::io::ReadHalf<DuplexStream>>) -> String {
        let mut line = String::new();
        timeout(WAIT, reader.read_line(&mut line)).await.unwrap().unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_frames_broadcast_to_subscribers() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());

        let mut a = bridge.subscribe().await;
        let mut b = bridge.subscribe().await;
        wait_connected(&bridge).await;

        device
            .write_all(b"{\"VB1\": 12.0, \"VB2\": 48.0, \"VB3\": 24.0, \"accel\": [0, 0, 9.8]}\n")
            .await
            .unwrap();

        for sub in [&mut a, &mut b] {
            let msg = recv_json(sub).await;
            assert_eq!(msg["VB1"], 12.0, "upstream fields are passed through");
            assert_eq!(msg["frame"]["voltage"]["lvs"], 12.0);
            let magnitude = msg["frame"]["acceleration"]["magnitude"].as_f64().unwrap();
            assert!((magnitude - 9.8).abs() < 1e-9, "magnitude derived from axes");
            let speed = msg["frame"]["speed"].as_f64().unwrap();
            assert!(speed < 1e-9, "gravity alone reads as zero speed");
            assert!(msg["timestamp"].is_string(), "bridge assigns a timestamp");
            assert_eq!(msg["health"]["metrics"][0]["name"], "Connection");
            assert_eq!(msg["relayStates"]["A"], false);
        }

        task.abort();
    }

    #[tokio::test]
    async fn test_device_timestamp_kept() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        let mut sub = bridge.subscribe().await;

        device
            .write_all(b"{\"timestamp\": \"2025-01-01T00:00:00Z\", \"voltage\": 5}\n")
            .await
            .unwrap();

        let msg = recv_json(&mut sub).await;
        assert_eq!(msg["timestamp"], "2025-01-01T00:00:00Z");
        assert_eq!(msg["frame"]["busVoltage"], 5.0);

        task.abort();
    }

    #[tokio::test]
    async fn test_late_joiner_receives_last_frame() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());

        let mut early = bridge.subscribe().await;
        device.write_all(b"{\"voltage\": 1}\n").await.unwrap();
        recv_json(&mut early).await;

        let mut late = bridge.subscribe().await;
        let replay = late.receiver.try_recv().expect("late joiner gets last frame immediately");
        let replay: Value = serde_json::from_str(&replay).unwrap();
        assert_eq!(replay["voltage"], 1);

        device.write_all(b"{\"voltage\": 2}\n").await.unwrap();
        assert_eq!(recv_json(&mut late).await["voltage"], 2);
        assert_eq!(recv_json(&mut early).await["voltage"], 2);

        task.abort();
    }

    #[tokio::test]
    async fn test_frames_with_zero_subscribers() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        wait_connected(&bridge).await;

        device.write_all(b"{\"voltage\": 7}\n{\"voltage\": 8}\n").await.unwrap();

        timeout(WAIT, async {
            while bridge.history().await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let mut sub = bridge.subscribe().await;
        assert_eq!(recv_json(&mut sub).await["voltage"], 8);

        task.abort();
    }

    #[tokio::test]
    async fn test_malformed_json_does_not_break_read_loop() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        let mut sub = bridge.subscribe().await;

        device.write_all(b"{\"VB1\": 12.0}\n").await.unwrap();
        recv_json(&mut sub).await;

        device
            .write_all(b"{\"VB1\": oops\nbooting...\nSTATE:1,0\n{\"VB2\": 48.0}\n")
            .await
            .unwrap();

        let msg = recv_json(&mut sub).await;
        assert_eq!(msg["VB2"], 48.0);
        assert_eq!(bridge.history().await.len(), 2, "bad lines never reach the normalizer");
        assert_eq!(bridge.connection_state(), ConnectionState::Connected);
        assert_eq!(bridge.relay_state().await.0, RelayState::default());

        task.abort();
    }

    #[tokio::test]
    async fn test_state_line_overwrites_optimistic_relays() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        let mut sub = bridge.subscribe().await;
        wait_connected(&bridge).await;

        bridge.submit("A".parse().unwrap()).await.unwrap();
        bridge.submit("B".parse().unwrap()).await.unwrap();
        assert_eq!(
            bridge.relay_state().await,
            (RelayState::from_flags([true, true, false, false]), StateSource::Optimistic)
        );

        device.write_all(b"STATE:0,0,1,1\n{\"voltage\": 3.3}\n").await.unwrap();
        let msg = recv_json(&mut sub).await;

        assert_eq!(
            bridge.relay_state().await,
            (RelayState::from_flags([false, false, true, true]), StateSource::Authoritative)
        );
        assert_eq!(
            msg["relayStates"],
            serde_json::json!({"A": false, "B": false, "C": true, "D": true})
        );

        task.abort();
    }

    #[tokio::test]
    async fn test_relay_states_payload_is_authoritative() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        let mut sub = bridge.subscribe().await;

        let report = b"{\"relayStates\": {\"A\": true, \"B\": true, \"C\": false, \"D\": true}}\n";
        device.write_all(report).await.unwrap();
        let msg = recv_json(&mut sub).await;

        let (state, source) = bridge.relay_state().await;
        assert_eq!(state, RelayState::from_flags([true, true, false, true]));
        assert_eq!(source, StateSource::Authoritative);
        assert_eq!(msg["frame"]["relayState"]["D"], true);

        task.abort();
    }

    #[tokio::test]
    async fn test_state_line_updates_frame_relay_state() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        let mut sub = bridge.subscribe().await;

        let all_on = b"{\"relayStates\": {\"A\": true, \"B\": true, \"C\": true, \"D\": true}}\n";
        device.write_all(all_on).await.unwrap();
        recv_json(&mut sub).await;

        device.write_all(b"STATE:0,0,0,0\n{\"voltage\": 1}\n").await.unwrap();
        let msg = recv_json(&mut sub).await;

        let all_off = serde_json::json!({"A": false, "B": false, "C": false, "D": false});
        assert_eq!(msg["relayStates"], all_off);
        assert_eq!(msg["frame"]["relayState"], all_off, "frame agrees with the latest report");
        assert_eq!(
            bridge.latest_frame().await.unwrap().relay_state,
            Some(RelayState::default())
        );

        task.abort();
    }

    #[tokio::test]
    async fn test_write_to_closed_upstream_rejected() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_unwritable_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        let mut sub = bridge.subscribe().await;
        wait_connected(&bridge).await;

        let result = bridge.submit("A".parse().unwrap()).await;
        assert!(matches!(result, Err(PodBridgeError::Serial(_))), "got {:?}", result);

        let result = bridge.submit(ClientCommand::EmergencyBrake).await;
        assert!(matches!(result, Err(PodBridgeError::Serial(_))), "got {:?}", result);

        device.write_all(b"{\"voltage\": 2}\n").await.unwrap();
        assert_eq!(recv_json(&mut sub).await["voltage"], 2, "read side keeps running");
        assert_eq!(bridge.connection_state(), ConnectionState::Connected);
        assert_eq!(bridge.subscriber_count().await, 1);

        task.abort();
    }

    #[tokio::test]
    async fn test_commands_written_upstream() {
        let connector = DuplexConnector::new();
        let device = connector.add_link();
        let (device_rx, _device_tx) = tokio::io::split(device);
        let mut device_rx = BufReader::new(device_rx);
        let (bridge, task) = start(&connector, BridgeSettings::default());
        wait_connected(&bridge).await;

        assert_eq!(bridge.submit("C".parse().unwrap()).await.unwrap(), vec!["C"]);
        assert_eq!(read_device_line(&mut device_rx).await, "C");

        let written = bridge.submit(ClientCommand::EmergencyBrake).await.unwrap();
        assert_eq!(written, vec!["a", "d", "b", "c"]);
        for expected in ["a", "d", "b", "c"] {
            assert_eq!(read_device_line(&mut device_rx).await, expected);
        }
        assert_eq!(bridge.relay_state().await.0, RelayState::default());

        assert_eq!(bridge.submit(ClientCommand::Resume).await.unwrap(), vec!["D", "A", "B", "c"]);
        assert_eq!(bridge.submit(ClientCommand::AllOn).await.unwrap(), vec!["A", "B", "C", "D"]);
        assert!(bridge.submit(ClientCommand::Status).await.unwrap().is_empty());

        task.abort();
    }

    #[tokio::test]
    async fn test_toggle_relay() {
        let connector = DuplexConnector::new();
        let _device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        wait_connected(&bridge).await;

        assert_eq!(bridge.toggle_relay(RelayKey::D).await.unwrap().token(), 'D');
        assert_eq!(bridge.toggle_relay(RelayKey::D).await.unwrap().token(), 'd');
        assert_eq!(bridge.relay_state().await.0, RelayState::default());

        task.abort();
    }

    #[tokio::test]
    async fn test_concurrent_toggles_do_not_race() {
        let connector = DuplexConnector::new();
        let _device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        wait_connected(&bridge).await;

        let toggles: Vec<_> = (0..10)
            .map(|_| {
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move { bridge.toggle_relay(RelayKey::A).await.unwrap() })
            })
            .collect();

        let mut ons = 0;
        for toggle in toggles {
            if toggle.await.unwrap().on {
                ons += 1;
            }
        }

        assert_eq!(ons, 5, "every toggle observed the previous one");
        assert!(!bridge.relay_state().await.0.a);

        task.abort();
    }

    #[tokio::test]
    async fn test_named_dialect() {
        let connector = DuplexConnector::new();
        let device = connector.add_link();
        let (device_rx, _device_tx) = tokio::io::split(device);
        let mut device_rx = BufReader::new(device_rx);
        let (bridge, task) = start(&connector, settings(CommandDialect::Named, 20));

        assert_eq!(read_device_line(&mut device_rx).await, "STATUS", "status requested on connect");

        bridge.submit("D".parse().unwrap()).await.unwrap();
        assert_eq!(read_device_line(&mut device_rx).await, "RELAYD_ON");

        bridge.submit(ClientCommand::AllOff).await.unwrap();
        assert_eq!(read_device_line(&mut device_rx).await, "ALL_OFF");
        assert_eq!(bridge.relay_state().await.0, RelayState::default());

        task.abort();
    }

    #[tokio::test]
    async fn test_command_without_upstream_rejected() {
        let connector = DuplexConnector::new();
        let bridge = Bridge::new(Arc::new(connector), BridgeSettings::default());

        let result = bridge.submit("A".parse().unwrap()).await;

        assert!(matches!(result, Err(PodBridgeError::NotConnected)));
        assert_eq!(bridge.relay_state().await.0, RelayState::default(), "no optimistic change");
    }

    #[tokio::test]
    async fn test_failed_connect_ends_disconnected() {
        let connector = DuplexConnector::new();
        let bridge = Bridge::new(Arc::new(connector.clone()), BridgeSettings::default());
        let mut states = bridge.watch_connection();

        assert_eq!(bridge.run_once().await, ConnectionState::Errored);
        assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
        assert!(states.has_changed().unwrap());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_upstream_drop_keeps_subscribers() {
        let connector = DuplexConnector::new();
        let first = connector.add_link();
        let mut second = connector.add_link();
        let (bridge, task) = start(&connector, settings(CommandDialect::Letter, 20));
        let mut sub = bridge.subscribe().await;
        wait_connected(&bridge).await;

        drop(first);
        second.write_all(b"{\"voltage\": 9}\n").await.unwrap();

        let msg = recv_json(&mut sub).await;
        assert_eq!(msg["voltage"], 9);
        assert_eq!(connector.attempts(), 2);
        assert_eq!(bridge.subscriber_count().await, 1);

        task.abort();
    }

    #[tokio::test]
    async fn test_drop_upstream_forces_reconnect() {
        let connector = DuplexConnector::new();
        let _first = connector.add_link();
        let _second = connector.add_link();
        let (bridge, task) = start(&connector, settings(CommandDialect::Letter, 20));
        wait_connected(&bridge).await;

        assert!(bridge.drop_upstream().await);

        timeout(WAIT, async {
            while connector.attempts() < 2 || !bridge.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("bridge did not reconnect");

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attempts_spaced_by_delay() {
        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&attempts);

        let mut connector = MockUpstreamConnector::new();
        connector.expect_connect().returning(move || {
            recorded.lock().unwrap().push(tokio::time::Instant::now());
            Err(PodBridgeError::Serial("unplugged".to_string()))
        });
        connector.expect_describe().return_const("mock".to_string());

        let settings = settings(CommandDialect::Letter, 3000);
        let bridge = Arc::new(Bridge::new(Arc::new(connector), settings));
        let task = tokio::spawn(Arc::clone(&bridge).run());

        tokio::time::sleep(Duration::from_millis(9_500)).await;
        task.abort();

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 4, "attempts at 0, 3, 6 and 9 seconds");
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(3000), "gap {:?} shorter than delay", gap);
            assert!(gap < Duration::from_millis(3010), "gap {:?} longer than delay", gap);
        }
    }

    #[tokio::test]
    async fn test_health_on_demand() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        let mut sub = bridge.subscribe().await;

        device
            .write_all(
                b"{\"VB1\": 12, \"VB2\": 48, \"VB3\": 24, \
                  \"dsTemperature\": 50, \"objectTemp\": 40, \
                  \"ambientTemp\": 25, \"mlxTemperature\": 30, \"accel\": [0, 0, 9.8]}\n",
            )
            .await
            .unwrap();
        let msg = recv_json(&mut sub).await;
        assert_eq!(msg["health"]["overallStatus"], "excellent");

        let report = bridge.health(Utc::now()).await;
        assert_eq!(report.overall_score, 100);

        let stale = bridge.health(Utc::now() + chrono::Duration::seconds(30)).await;
        assert_eq!(stale.overall_score, 90);
        assert!(stale.critical_issues.iter().any(|m| m.contains("No recent data")));

        task.abort();
    }

    #[tokio::test]
    async fn test_health_before_any_frame_is_offline() {
        let bridge = Bridge::new(Arc::new(DuplexConnector::new()), BridgeSettings::default());
        let report = bridge.health(Utc::now()).await;
        assert_eq!(report.overall_status, HealthStatus::Offline);
        assert!(bridge.latest_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_clear_history() {
        let connector = DuplexConnector::new();
        let mut device = connector.add_link();
        let (bridge, task) = start(&connector, BridgeSettings::default());
        let mut sub = bridge.subscribe().await;

        device.write_all(b"{\"voltage\": 1}\n").await.unwrap();
        recv_json(&mut sub).await;
        bridge.clear_history().await;

        assert!(bridge.history().await.is_empty());
        assert_eq!(bridge.latest_frame().await.unwrap().bus_voltage, 1.0, "current frame is kept");

        task.abort();
    }
}
