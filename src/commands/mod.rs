//! Command submission for DPS-150 operations.
//!
//! This module enforces the session's write discipline. The protocol has no
//! request IDs: responses are matched to requests purely by field code, so
//! at most one command may be on the wire at a time. All submissions pass
//! through one FIFO-fair request gate; a command holds it from the moment
//! its frame is written until its response arrives or it times out. Set
//! commands are not acknowledged and hold it for the settle delay instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter};
use crate::protocol::command::{BaudRate, Command, FieldCode};
use crate::protocol::parser::TelemetryUpdate;
use crate::transport::Transport;
use crate::types::FullStatus;

/// Default response timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Delay after an unacknowledged write; the device needs spacing between
/// commands.
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Serialized command submission over a transport.
///
/// Cancelling a pending submission (dropping its future) removes the waiter
/// and releases the gate; the device still finishes the wire transaction on
/// its own time and any late response folds into the state snapshot as an
/// ordinary orphaned update.
pub struct CommandHandler<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: EventDispatcher,
    session_open: Arc<AtomicBool>,
    gate: Mutex<()>,
    timeout: Duration,
}

impl<T: Transport> CommandHandler<T> {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        transport: Arc<Mutex<T>>,
        dispatcher: EventDispatcher,
        session_open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            session_open,
            gate: Mutex::new(()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the response timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.session_open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Sends a command and waits for the frame that answers it.
    ///
    /// Holds the request gate for the whole exchange; queued callers run in
    /// submission order (the gate is FIFO-fair). A timeout frees the gate
    /// for the next command.
    async fn send_and_wait(&self, command: Command) -> Result<TelemetryUpdate> {
        // Validation errors surface before any queueing or I/O.
        let frame = command.encode()?;
        let field = command.response_field().ok_or_else(|| Error::Protocol {
            message: "command expects no response".into(),
        })?;

        let _slot = self.gate.lock().await;
        self.ensure_open()?;

        // Subscribe BEFORE sending. Events are only delivered to receivers
        // that exist at dispatch time; a fast response could otherwise be
        // dispatched before the subscription exists and be missed.
        let filter = EventFilter::fields(vec![field]);
        let mut subscription = self.dispatcher.subscribe();

        {
            let mut transport = self.transport.lock().await;
            transport.send(frame).await?;
        }

        let timeout = self.timeout;
        tokio::select! {
            biased;
            result = async {
                loop {
                    if let Some(event) = subscription.recv().await {
                        if filter.matches(&event) {
                            if let Event::Update(update) = event {
                                return Some(update);
                            }
                        }
                    } else {
                        return None;
                    }
                }
            } => result.ok_or(Error::NotConnected),
            () = tokio::time::sleep(timeout) => Err(Error::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Sends a command the device does not acknowledge.
    ///
    /// The gate is held across the settle delay so back-to-back sets keep
    /// their spacing on the wire.
    async fn send_fire_and_forget(&self, command: Command) -> Result<()> {
        let frame = command.encode()?;

        let _slot = self.gate.lock().await;
        self.ensure_open()?;

        {
            let mut transport = self.transport.lock().await;
            transport.send(frame).await?;
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    // ==================== Write Commands ====================

    /// Writes a float-valued setting.
    pub async fn set_float(&self, field: FieldCode, value: f32) -> Result<()> {
        self.send_fire_and_forget(Command::SetFloat { field, value })
            .await
    }

    /// Writes a byte-valued setting.
    pub async fn set_byte(&self, field: FieldCode, value: u8) -> Result<()> {
        self.send_fire_and_forget(Command::SetByte { field, value })
            .await
    }

    /// Turns the output on.
    pub async fn enable_output(&self) -> Result<()> {
        self.send_fire_and_forget(Command::EnableOutput).await
    }

    /// Turns the output off.
    pub async fn disable_output(&self) -> Result<()> {
        self.send_fire_and_forget(Command::DisableOutput).await
    }

    /// Starts or stops capacity/energy metering.
    pub async fn set_metering(&self, on: bool) -> Result<()> {
        self.set_byte(FieldCode::MeteringEnable, u8::from(on)).await
    }

    // ==================== Read Commands ====================

    /// Reads a float-valued field back from the device.
    pub async fn get_float(&self, field: FieldCode) -> Result<f32> {
        let update = self.send_and_wait(Command::Get { field }).await?;
        update.as_float().ok_or_else(|| Error::Protocol {
            message: format!("expected float payload for {field:?}"),
        })
    }

    /// Reads a string-valued field (model name, versions).
    pub async fn get_string(&self, field: FieldCode) -> Result<String> {
        let update = self.send_and_wait(Command::Get { field }).await?;
        update
            .as_string()
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::Protocol {
                message: format!("expected string payload for {field:?}"),
            })
    }

    /// Requests the full status record.
    pub async fn get_all(&self) -> Result<FullStatus> {
        let update = self.send_and_wait(Command::GetAll).await?;
        if let TelemetryUpdate::FullStatus(status) = update {
            Ok(*status)
        } else {
            Err(Error::Protocol {
                message: "expected full status record".into(),
            })
        }
    }

    // ==================== Session Commands ====================

    /// Tells the device a host session begins.
    pub async fn session_start(&self) -> Result<()> {
        self.send_fire_and_forget(Command::SessionStart).await
    }

    /// Tells the device the host session ends.
    pub async fn session_stop(&self) -> Result<()> {
        self.send_fire_and_forget(Command::SessionStop).await
    }

    /// Switches the device's serial baud rate.
    pub async fn select_baud_rate(&self, rate: BaudRate) -> Result<()> {
        self.send_fire_and_forget(Command::SelectBaudRate(rate))
            .await
    }
}
