//! Main [`Dps150`] client implementation.
//!
//! This module provides the high-level [`Dps150`] client that combines
//! transport, telemetry processing, and command submission into a unified
//! interface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::commands::CommandHandler;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::protocol::command::{BaudRate, FieldCode};
use crate::protocol::parser::interpret;
use crate::transport::{Inbound, SerialTransport, Transport, serial::SerialConfig};
use crate::types::{DeviceIdentity, DeviceState, GroupPreset, ProtectionKind};

/// Fallback maximum voltage setpoint, volts. The device-reported upper
/// limit takes precedence once known.
pub const VOLTAGE_MAX: f32 = 30.0;

/// Fallback maximum current setpoint, amps.
pub const CURRENT_MAX: f32 = 5.0;

/// Maximum over-power threshold, watts.
pub const POWER_MAX: f32 = 150.0;

/// Maximum over-temperature threshold, degrees Celsius.
pub const TEMPERATURE_MAX: f32 = 80.0;

/// Consecutive malformed frames that raise a link-degraded event.
const MALFORMED_BURST_THRESHOLD: u32 = 8;

/// Client for communicating with a DPS-150 power supply.
pub struct Dps150<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: EventDispatcher,
    commands: CommandHandler<T>,

    // Internal state
    state: Arc<RwLock<DeviceState>>,
    session_open: Arc<AtomicBool>,

    // Background task
    process_task: Option<JoinHandle<()>>,
}

impl Dps150<SerialTransport> {
    /// Creates a new client for a serial port.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyACM0")
    ///
    /// # Returns
    ///
    /// A new client (not yet connected).
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        let config = SerialConfig::new(port);
        Self::with_serial_config(config)
    }

    /// Creates a new client with custom serial configuration.
    #[must_use]
    pub fn with_serial_config(config: SerialConfig) -> Self {
        let transport = SerialTransport::new(config);
        Self::new(transport)
    }
}

impl<T: Transport + 'static> Dps150<T> {
    /// Creates a new client with the given transport.
    fn new(transport: T) -> Self {
        let dispatcher = EventDispatcher::new(256);
        let transport = Arc::new(Mutex::new(transport));
        let session_open = Arc::new(AtomicBool::new(false));

        let commands = CommandHandler::new(
            Arc::clone(&transport),
            dispatcher.clone(),
            Arc::clone(&session_open),
        );

        Self {
            transport,
            dispatcher,
            commands,
            state: Arc::new(RwLock::new(DeviceState::default())),
            session_open,
            process_task: None,
        }
    }

    /// Connects to the device and initializes the session.
    ///
    /// This will:
    /// 1. Open the transport at the device's fixed line parameters
    /// 2. Start the telemetry processing task
    /// 3. Announce the session and probe the device (model-name read)
    /// 4. Read the identity strings and seed the state snapshot
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the port opens but the device does
    /// not answer the probe within the command timeout; in that case no
    /// channel is left open. Port-open failures come back as
    /// [`Error::Serial`]/[`Error::Io`].
    pub async fn connect(&mut self) -> Result<DeviceIdentity> {
        if self.session_open.load(Ordering::Acquire) {
            return Err(Error::Connection {
                message: "session already open".into(),
            });
        }

        {
            let mut transport = self.transport.lock().await;
            // Clear any half-open state left by a lost link before reopening.
            transport.disconnect().await?;
            transport.connect().await?;
        }

        let inbound = {
            let mut transport = self.transport.lock().await;
            transport.take_inbound()
        };
        let Some(inbound) = inbound else {
            let mut transport = self.transport.lock().await;
            let _ = transport.disconnect().await;
            return Err(Error::Connection {
                message: "transport provided no inbound channel".into(),
            });
        };

        // Fresh snapshot for the new session.
        *self.state.write().await = DeviceState::default();
        self.session_open.store(true, Ordering::Release);
        self.start_process_loop(inbound);

        match self.initialize().await {
            Ok(identity) => {
                self.dispatcher.dispatch(Event::Connected);
                Ok(identity)
            }
            Err(e) => {
                // Tear down completely: a failed connect holds no channel.
                self.session_open.store(false, Ordering::Release);
                if let Some(task) = self.process_task.take() {
                    task.abort();
                }
                {
                    let mut transport = self.transport.lock().await;
                    let _ = transport.disconnect().await;
                }
                Err(match e {
                    Error::Timeout { timeout_ms } => Error::Connection {
                        message: format!("device did not respond within {timeout_ms}ms"),
                    },
                    other => other,
                })
            }
        }
    }

    /// Announces the session and reads the device identity, mirroring the
    /// vendor software's init sequence.
    async fn initialize(&self) -> Result<DeviceIdentity> {
        self.commands.session_start().await?;
        self.commands.select_baud_rate(BaudRate::B115200).await?;

        // First read doubles as the connection probe.
        let model = self.commands.get_string(FieldCode::ModelName).await?;
        let hardware_version = self.commands.get_string(FieldCode::HardwareVersion).await?;
        let firmware_version = self.commands.get_string(FieldCode::FirmwareVersion).await?;

        // Seed the snapshot with the full status record.
        self.commands.get_all().await?;

        Ok(DeviceIdentity {
            model,
            hardware_version,
            firmware_version,
        })
    }

    /// Spawns the telemetry processing task for this session.
    fn start_process_loop(&mut self, inbound: mpsc::Receiver<Inbound>) {
        let dispatcher = self.dispatcher.clone();
        let state = Arc::clone(&self.state);
        let session_open = Arc::clone(&self.session_open);

        let task = tokio::spawn(async move {
            run_process_loop(inbound, &dispatcher, &state, &session_open).await;
        });
        self.process_task = Some(task);
    }

    /// Disconnects from the device.
    ///
    /// Pending submissions fail with [`Error::NotConnected`] before the
    /// channel is released. Idempotent.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.session_open.load(Ordering::Acquire) {
            // Best-effort goodbye; the device drops the session on its own
            // if this never arrives.
            if let Err(e) = self.commands.session_stop().await {
                tracing::debug!("session stop failed: {}", e);
            }
        }

        let was_open = self.session_open.swap(false, Ordering::AcqRel);

        if let Some(task) = self.process_task.take() {
            task.abort();
        }

        {
            let mut transport = self.transport.lock().await;
            transport.disconnect().await?;
        }

        if was_open {
            self.dispatcher.dispatch(Event::Disconnected);
        }

        Ok(())
    }

    /// Returns true if a session is open.
    pub async fn is_connected(&self) -> bool {
        self.session_open.load(Ordering::Acquire) && {
            let transport = self.transport.lock().await;
            transport.is_connected()
        }
    }

    /// Returns a copy of the last-known device state.
    pub async fn state(&self) -> DeviceState {
        self.state.read().await.clone()
    }

    /// Returns the device identity if all three strings have been read.
    pub async fn identity(&self) -> Option<DeviceIdentity> {
        self.state.read().await.identity()
    }

    /// Returns the command handler for direct command access.
    #[must_use]
    pub const fn commands(&self) -> &CommandHandler<T> {
        &self.commands
    }

    /// Sets the per-command response timeout.
    pub fn set_command_timeout(&mut self, timeout: Duration) {
        self.commands.set_timeout(timeout);
    }

    /// Subscribes to events.
    ///
    /// Subscribers receive [`Event::Snapshot`] on every state change plus
    /// the connection-lifecycle events. Dropping the subscription
    /// unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    // ==================== Output Control ====================

    /// Sets the output voltage setpoint in volts.
    pub async fn set_voltage(&self, volts: f32) -> Result<()> {
        let max = self.voltage_limit().await;
        check_range("voltage", volts, max)?;
        self.commands.set_float(FieldCode::VoltageSet, volts).await
    }

    /// Sets the output current setpoint in amps.
    pub async fn set_current(&self, amps: f32) -> Result<()> {
        let max = self.current_limit().await;
        check_range("current", amps, max)?;
        self.commands.set_float(FieldCode::CurrentSet, amps).await
    }

    /// Sets the output power limit in watts.
    ///
    /// The device has no separate power setpoint; this drives the
    /// over-power protection threshold.
    pub async fn set_power_limit(&self, watts: f32) -> Result<()> {
        check_range("power", watts, POWER_MAX)?;
        self.commands
            .set_float(FieldCode::OverPowerProtection, watts)
            .await
    }

    /// Turns the output on.
    pub async fn enable_output(&self) -> Result<()> {
        self.commands.enable_output().await
    }

    /// Turns the output off.
    pub async fn disable_output(&self) -> Result<()> {
        self.commands.disable_output().await
    }

    // ==================== Protection ====================

    /// Sets a protection threshold.
    pub async fn set_protection(&self, kind: ProtectionKind, threshold: f32) -> Result<()> {
        let max = match kind {
            ProtectionKind::OverVoltage | ProtectionKind::LowVoltage => {
                self.voltage_limit().await
            }
            ProtectionKind::OverCurrent => self.current_limit().await,
            ProtectionKind::OverPower => POWER_MAX,
            ProtectionKind::OverTemperature => TEMPERATURE_MAX,
        };
        check_range("threshold", threshold, max)?;
        self.commands.set_float(kind.field(), threshold).await
    }

    /// Reads a protection threshold back from the device.
    pub async fn get_protection(&self, kind: ProtectionKind) -> Result<f32> {
        self.commands.get_float(kind.field()).await
    }

    // ==================== Display & Metering ====================

    /// Sets the display brightness (0–5).
    pub async fn set_brightness(&self, level: u8) -> Result<()> {
        self.commands.set_byte(FieldCode::Brightness, level).await
    }

    /// Sets the beeper volume (0–5).
    pub async fn set_volume(&self, level: u8) -> Result<()> {
        self.commands.set_byte(FieldCode::Volume, level).await
    }

    /// Starts or stops capacity/energy metering.
    pub async fn set_metering(&self, on: bool) -> Result<()> {
        self.commands.set_metering(on).await
    }

    // ==================== Group Presets ====================

    /// Stores a voltage/current preset in a group slot (index 0–5).
    pub async fn save_group(&self, index: u8, voltage: f32, current: f32) -> Result<()> {
        let (Some(voltage_field), Some(current_field)) = (
            FieldCode::group_voltage(index),
            FieldCode::group_current(index),
        ) else {
            return Err(Error::OutOfRange {
                field: "group",
                value: f64::from(index),
                min: 0.0,
                max: 5.0,
            });
        };

        check_range("voltage", voltage, self.voltage_limit().await)?;
        check_range("current", current, self.current_limit().await)?;

        self.commands.set_float(voltage_field, voltage).await?;
        self.commands.set_float(current_field, current).await
    }

    /// Recalls a group preset (index 0–5) onto the active setpoints.
    ///
    /// Returns the preset that was applied.
    pub async fn load_group(&self, index: u8) -> Result<GroupPreset> {
        if usize::from(index) >= crate::types::GROUP_COUNT {
            return Err(Error::OutOfRange {
                field: "group",
                value: f64::from(index),
                min: 0.0,
                max: 5.0,
            });
        }

        let preset = self.state.read().await.groups[usize::from(index)];
        self.commands
            .set_float(FieldCode::VoltageSet, preset.voltage)
            .await?;
        self.commands
            .set_float(FieldCode::CurrentSet, preset.current)
            .await?;
        Ok(preset)
    }

    // ==================== Refresh ====================

    /// Forces a full-state refresh and returns the fresh snapshot.
    pub async fn get_all(&self) -> Result<DeviceState> {
        self.commands.get_all().await?;
        Ok(self.state.read().await.clone())
    }

    /// Reads the voltage setpoint back from the device.
    pub async fn get_set_voltage(&self) -> Result<f32> {
        self.commands.get_float(FieldCode::VoltageSet).await
    }

    /// Reads the current setpoint back from the device.
    pub async fn get_set_current(&self) -> Result<f32> {
        self.commands.get_float(FieldCode::CurrentSet).await
    }

    // ==================== Limits ====================

    async fn voltage_limit(&self) -> f32 {
        let limit = self.state.read().await.upper_limit_voltage;
        if limit > 0.0 { limit } else { VOLTAGE_MAX }
    }

    async fn current_limit(&self) -> f32 {
        let limit = self.state.read().await.upper_limit_current;
        if limit > 0.0 { limit } else { CURRENT_MAX }
    }
}

/// Validates a setpoint against `0.0..=max`.
fn check_range(field: &'static str, value: f32, max: f32) -> Result<()> {
    if value.is_finite() && (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::OutOfRange {
            field,
            value: f64::from(value),
            min: 0.0,
            max: f64::from(max),
        })
    }
}

/// Consumes the inbound channel for one session: folds frames into the
/// snapshot, notifies subscribers, and tracks malformed bursts.
///
/// This task never blocks on a command submitter; it always drains the
/// channel. When the channel closes underneath it (device unplugged, read
/// failure), it marks the session closed and notifies subscribers.
async fn run_process_loop(
    mut inbound: mpsc::Receiver<Inbound>,
    dispatcher: &EventDispatcher,
    state: &Arc<RwLock<DeviceState>>,
    session_open: &Arc<AtomicBool>,
) {
    let mut malformed_run: u32 = 0;

    while let Some(item) = inbound.recv().await {
        match item {
            Inbound::Frame(frame) => {
                malformed_run = 0;
                match interpret(&frame) {
                    Ok(update) => {
                        let snapshot = {
                            let mut state = state.write().await;
                            state.apply(&update);
                            Arc::new(state.clone())
                        };
                        dispatcher.dispatch(Event::Update(update));
                        dispatcher.dispatch(Event::Snapshot(snapshot));
                    }
                    Err(e) => {
                        tracing::warn!("failed to interpret field {}: {}", frame.field, e);
                    }
                }
            }
            Inbound::Malformed(e) => {
                malformed_run += 1;
                tracing::trace!("malformed frame ({} in a row): {}", malformed_run, e);
                if malformed_run == MALFORMED_BURST_THRESHOLD {
                    tracing::warn!("link degraded: {} consecutive malformed frames", malformed_run);
                    dispatcher.dispatch(Event::LinkDegraded {
                        malformed_frames: malformed_run,
                    });
                }
            }
        }
    }

    // The transport read side is gone; this session is over.
    if session_open.swap(false, Ordering::AcqRel) {
        tracing::info!("connection lost");
        dispatcher.dispatch(Event::Disconnected);
    }
}

impl<T> Drop for Dps150<T> {
    fn drop(&mut self) {
        if let Some(task) = self.process_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use crate::protocol::frame::{DEVICE_COMMAND, Frame};
    use crate::types::{RegulationMode, TripState};
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use std::sync::Mutex as StdMutex;

    /// Handles shared between a test and the mock it moved into the client.
    #[derive(Clone, Default)]
    struct MockShared {
        /// Every frame written to the wire, in write order.
        writes: Arc<StdMutex<Vec<Bytes>>>,
        /// When set, get commands go unanswered.
        silent: Arc<AtomicBool>,
        /// Sender side of the inbound channel, for injecting telemetry.
        inbound_tx: Arc<StdMutex<Option<mpsc::Sender<Inbound>>>>,
    }

    impl MockShared {
        fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }

        async fn inject(&self, item: Inbound) {
            let tx = self.inbound_tx.lock().unwrap().clone().unwrap();
            tx.send(item).await.unwrap();
        }

        /// Simulates yanking the cable: the read side goes away.
        fn drop_link(&self) {
            self.inbound_tx.lock().unwrap().take();
        }
    }

    /// Scripted in-memory transport: records writes and answers get
    /// commands like the device would.
    struct MockTransport {
        shared: MockShared,
        connected: bool,
        inbound: Option<mpsc::Receiver<Inbound>>,
    }

    impl MockTransport {
        fn new(shared: MockShared) -> Self {
            Self {
                shared,
                connected: false,
                inbound: None,
            }
        }

        fn response_for(field: u8) -> Option<Frame> {
            let payload: Vec<u8> = match field {
                222 => b"DPS-150".to_vec(),
                223 => b"V1.0".to_vec(),
                224 => b"V1.3".to_vec(),
                255 => full_status_payload(),
                // Float-valued settings echo a fixed reading.
                193 | 194 | 197..=213 | 226 | 227 => 12.5f32.to_le_bytes().to_vec(),
                _ => return None,
            };
            Some(Frame {
                command: DEVICE_COMMAND,
                field,
                payload: Bytes::from(payload),
            })
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                let (tx, rx) = mpsc::channel(64);
                *self.shared.inbound_tx.lock().unwrap() = Some(tx);
                self.inbound = Some(rx);
                self.connected = true;
                Ok(())
            })
        }

        fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.connected = false;
                self.inbound = None;
                self.shared.inbound_tx.lock().unwrap().take();
                Ok(())
            })
        }

        fn send(&mut self, frame: Bytes) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                if !self.connected {
                    return Err(Error::NotConnected);
                }
                self.shared.writes.lock().unwrap().push(frame.clone());

                if self.shared.silent.load(Ordering::Acquire) {
                    return Ok(());
                }

                // Answer get commands (0xa1) like the device.
                if frame.len() < 3 || frame[1] != 0xa1 {
                    return Ok(());
                }
                if let Some(response) = Self::response_for(frame[2]) {
                    let tx = self.shared.inbound_tx.lock().unwrap().clone();
                    if let Some(tx) = tx {
                        let _ = tx.send(Inbound::Frame(response)).await;
                    }
                }
                Ok(())
            })
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn take_inbound(&mut self) -> Option<mpsc::Receiver<Inbound>> {
            self.inbound.take()
        }
    }

    /// A 119-byte full status record with recognizable values.
    fn full_status_payload() -> Vec<u8> {
        let mut p = Vec::new();
        for v in [24.0f32, 12.0, 2.0, 11.98, 1.5, 17.97, 31.2] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        for group in 0..6u8 {
            p.extend_from_slice(&(f32::from(group) + 1.0).to_le_bytes());
            p.extend_from_slice(&0.5f32.to_le_bytes());
        }
        for v in [31.0f32, 5.1, 155.0, 80.0, 2.9] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        p.extend_from_slice(&[4, 2, 1]); // brightness, volume, metering
        p.extend_from_slice(&0.75f32.to_le_bytes());
        p.extend_from_slice(&9.0f32.to_le_bytes());
        p.extend_from_slice(&[1, 0, 0, 0]); // output on, no trip, CC, reserved
        p.extend_from_slice(&30.0f32.to_le_bytes());
        p.extend_from_slice(&5.0f32.to_le_bytes());
        p
    }

    fn connected_pair() -> (Dps150<MockTransport>, MockShared) {
        let shared = MockShared::default();
        let client = Dps150::new(MockTransport::new(shared.clone()));
        (client, shared)
    }

    /// Asserts one recorded write is exactly one well-formed frame.
    fn assert_whole_frame(bytes: &Bytes) {
        assert!(bytes.len() >= 5, "truncated frame: {bytes:?}");
        assert_eq!(bytes[0], 0xf1, "bad header");
        let len = bytes[3] as usize;
        assert_eq!(bytes.len(), 5 + len, "frame length mismatch");
        let sum = crate::protocol::frame::checksum(bytes[2], &bytes[4..4 + len]);
        assert_eq!(bytes[bytes.len() - 1], sum, "bad checksum");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reads_identity_and_seeds_state() {
        let (mut client, _shared) = connected_pair();

        let identity = client.connect().await.unwrap();
        assert_eq!(identity.model, "DPS-150");
        assert_eq!(identity.firmware_version, "V1.3");
        assert!(client.is_connected().await);

        // The full status record seeded the snapshot.
        let state = client.state().await;
        assert_eq!(state.set_voltage, 12.0);
        assert_eq!(state.output_voltage, 11.98);
        assert_eq!(state.upper_limit_voltage, 30.0);
        assert_eq!(state.mode, RegulationMode::ConstantCurrent);
        assert_eq!(state.model_name.as_deref(), Some("DPS-150"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_probe_timeout_leaves_no_channel() {
        let (mut client, shared) = connected_pair();
        shared.silent.store(true, Ordering::Release);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
        assert!(!client.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setters_write_whole_frames_in_order() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();
        let before = shared.write_count();

        client.set_voltage(5.0).await.unwrap();
        client.set_current(1.0).await.unwrap();
        client.enable_output().await.unwrap();

        let writes = shared.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), before + 3);
        for frame in &writes {
            assert_whole_frame(frame);
        }
        // FIFO: the three frames carry the fields in submission order.
        assert_eq!(writes[before][2], 193);
        assert_eq!(writes[before + 1][2], 194);
        assert_eq!(writes[before + 2][2], 219);
        assert_eq!(&writes[before][4..8], &5.0f32.to_le_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submissions_never_interleave() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();
        let before = shared.write_count();

        let client = Arc::new(client);
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client.set_voltage(f32::from(i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let writes = shared.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), before + 8);
        // Every write is a complete frame; the gate never let two
        // commands' bytes mix.
        for frame in &writes[before..] {
            assert_whole_frame(frame);
            assert_eq!(frame[2], 193);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_the_slot() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();

        shared.silent.store(true, Ordering::Release);
        let err = client.get_protection(ProtectionKind::OverVoltage).await;
        assert!(matches!(err, Err(Error::Timeout { .. })), "got {err:?}");

        // The timed-out command does not wedge the session.
        shared.silent.store(false, Ordering::Release);
        let ovp = client.get_protection(ProtectionKind::OverVoltage).await.unwrap();
        assert_eq!(ovp, 12.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_close_does_not_touch_channel() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();

        let before = shared.write_count();
        let err = client.set_voltage(5.0).await;
        assert!(matches!(err, Err(Error::NotConnected)), "got {err:?}");
        let err = client.get_set_voltage().await;
        assert!(matches!(err, Err(Error::NotConnected)), "got {err:?}");
        assert_eq!(shared.write_count(), before);

        // Idempotent close.
        client.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_rejects_before_io() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();
        let before = shared.write_count();

        assert!(matches!(
            client.set_voltage(VOLTAGE_MAX + 10.0).await,
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            client.set_current(-0.1).await,
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            client.set_brightness(6).await,
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            client.save_group(6, 5.0, 1.0).await,
            Err(Error::OutOfRange { .. })
        ));
        assert_eq!(shared.write_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_notification_on_telemetry() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();
        let mut sub = client.subscribe();

        let mut payload = Vec::new();
        for v in [13.0f32, 2.5, 32.5] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        shared
            .inject(Inbound::Frame(Frame {
                command: DEVICE_COMMAND,
                field: 195,
                payload: Bytes::from(payload),
            }))
            .await;

        // Update event first, then the snapshot carrying the new values.
        loop {
            match sub.recv().await.unwrap() {
                Event::Snapshot(state) => {
                    assert_eq!(state.output_voltage, 13.0);
                    assert_eq!(state.output_current, 2.5);
                    assert_eq!(state.output_power, 32.5);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_burst_degrades_link_without_teardown() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();
        let mut sub = client.subscribe();

        for _ in 0..MALFORMED_BURST_THRESHOLD {
            shared
                .inject(Inbound::Malformed(FrameError::Desync { discarded: 4 }))
                .await;
        }

        loop {
            match sub.recv().await.unwrap() {
                Event::LinkDegraded { malformed_frames } => {
                    assert_eq!(malformed_frames, MALFORMED_BURST_THRESHOLD);
                    break;
                }
                Event::Disconnected => panic!("degraded link must not tear down the session"),
                _ => continue,
            }
        }
        assert!(client.is_connected().await);
        client.set_voltage(3.3).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_notifies_and_closes_session() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();
        let mut sub = client.subscribe();

        shared.drop_link();

        loop {
            if let Event::Disconnected = sub.recv().await.unwrap() {
                break;
            }
        }
        assert!(matches!(
            client.set_voltage(1.0).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_save_and_recall() {
        let (mut client, shared) = connected_pair();
        client.connect().await.unwrap();

        client.save_group(2, 9.0, 1.5).await.unwrap();
        let writes = shared.writes.lock().unwrap().clone();
        let tail = &writes[writes.len() - 2..];
        assert_eq!(tail[0][2], 201); // group 3 voltage
        assert_eq!(tail[1][2], 202); // group 3 current

        // Recall applies the snapshot's preset (seeded by the full status
        // record: group 1 stores 1.0 V / 0.5 A).
        let preset = client.load_group(0).await.unwrap();
        assert_eq!(preset, GroupPreset { voltage: 1.0, current: 0.5 });

        let writes = shared.writes.lock().unwrap().clone();
        let tail = &writes[writes.len() - 2..];
        assert_eq!(tail[0][2], 193);
        assert_eq!(&tail[0][4..8], &1.0f32.to_le_bytes());
        assert_eq!(tail[1][2], 194);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_all_returns_fresh_snapshot() {
        let (mut client, _shared) = connected_pair();
        client.connect().await.unwrap();

        let state = client.get_all().await.unwrap();
        assert_eq!(state.input_voltage, 24.0);
        assert_eq!(state.protection_trip, TripState::Normal);
        assert!(state.output_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roundtrip_setpoint_readback() {
        // decode(encode(set 12.5)) through the echoing stub reconstructs
        // the semantic value.
        let (mut client, _shared) = connected_pair();
        client.connect().await.unwrap();

        client.set_voltage(12.5).await.unwrap();
        let readback = client.get_set_voltage().await.unwrap();
        assert!((readback - 12.5).abs() < f32::EPSILON);
    }
}
