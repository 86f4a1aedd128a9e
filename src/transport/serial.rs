//! Serial/USB transport implementation.
//!
//! The DPS-150 enumerates as a USB CDC serial port and speaks at fixed line
//! parameters: 115200 baud, 8 data bits, no parity, 1 stop bit, hardware
//! RTS/CTS flow control.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::{Error, Result};
use crate::protocol::frame::FrameDecoder;
use crate::transport::{Inbound, Transport};

/// The baud rate the device uses.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default settle delay after opening the port.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Substring of the USB product description the device enumerates with.
pub const VENDOR_KEYWORD: &str = "FNIRSI";

/// Capacity of the inbound frame channel.
const INBOUND_CAPACITY: usize = 256;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate. The device default is 115200; only change this if the
    /// device was switched with a baud-rate command first.
    pub baud_rate: u32,
    /// Delay after opening before the stale-byte drain.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport for DPS-150 communication.
///
/// Uses split read/write halves: writes happen on demand under a lock, the
/// read half is owned by a background task that decodes frames into the
/// inbound channel.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<Arc<Mutex<WriteHalf<SerialStream>>>>,
    inbound: Option<mpsc::Receiver<Inbound>>,
    read_task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            inbound: None,
            read_task: None,
        }
    }

    /// Creates a new serial transport for the given port with default
    /// settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Runs the read loop, decoding incoming bytes into frames.
    ///
    /// Returns when the channel read fails fatally or the receiver is
    /// dropped. Dropping the sender is what tells the processing task the
    /// link is gone.
    async fn run_read_loop(
        mut reader: ReadHalf<SerialStream>,
        mut decoder: FrameDecoder,
        tx: mpsc::Sender<Inbound>,
    ) -> Result<()> {
        let mut buf = [0u8; 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("serial port closed");
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "serial port closed",
                    )));
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("serial read error: {}", e);
                    return Err(Error::Io(e));
                }
            };

            tracing::trace!("received {} bytes", n);
            decoder.feed(&buf[..n]);

            // Drain all complete frames from the decoder.
            loop {
                match decoder.decode() {
                    Ok(Some(frame)) => {
                        tracing::trace!(
                            "decoded frame: field {}, {} bytes",
                            frame.field,
                            frame.payload.len()
                        );
                        if tx.send(Inbound::Frame(frame)).await.is_err() {
                            tracing::debug!("inbound receiver dropped");
                            return Ok(());
                        }
                    }
                    Ok(None) => break, // Need more data
                    Err(e) => {
                        tracing::trace!("frame decode error: {}", e);
                        if tx.send(Inbound::Malformed(e)).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Ok(());
            }

            tracing::info!("connecting to serial port: {}", self.config.port);

            let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::Hardware)
                .open_native_async()
                .map_err(Error::Serial)?;

            // Wait for the device to be ready.
            tokio::time::sleep(self.config.connection_delay).await;

            // Drain stale data; the device streams telemetry and the OS
            // buffer may hold bytes from before we attached.
            let mut buf = [0u8; 1024];
            let mut total_drained = 0usize;
            let drain_deadline = tokio::time::Instant::now() + Duration::from_millis(200);
            while tokio::time::Instant::now() < drain_deadline {
                match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await
                {
                    Ok(Ok(n)) if n > 0 => {
                        total_drained += n;
                    }
                    _ => break,
                }
            }
            if total_drained > 0 {
                tracing::debug!("drained {} stale bytes from buffer", total_drained);
            }

            let (reader, writer) = tokio::io::split(stream);
            let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);

            let read_task = tokio::spawn(async move {
                if let Err(e) = Self::run_read_loop(reader, FrameDecoder::new(), tx).await {
                    tracing::debug!("read loop ended: {}", e);
                }
            });

            self.writer = Some(Arc::new(Mutex::new(writer)));
            self.inbound = Some(rx);
            self.read_task = Some(read_task);

            tracing::info!("connected to serial port");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.writer.is_some() || self.read_task.is_some() {
                tracing::info!("disconnecting from serial port");
                if let Some(task) = self.read_task.take() {
                    task.abort();
                }
                self.writer = None;
                self.inbound = None;
            }
            Ok(())
        })
    }

    fn send(&mut self, frame: Bytes) -> BoxFuture<'_, Result<()>> {
        let writer = self.writer.clone();
        Box::pin(async move {
            let writer = writer.ok_or(Error::NotConnected)?;
            let mut writer = writer.lock().await;

            tracing::trace!("sending frame: {} bytes", frame.len());

            writer.write_all(&frame).await.map_err(Error::Io)?;
            writer.flush().await.map_err(Error::Io)?;

            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Inbound>> {
        self.inbound.take()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

/// Information about one available serial port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port path, e.g. "/dev/ttyACM0".
    pub name: String,
    /// Human-readable product description, if the OS provides one.
    pub description: Option<String>,
}

/// Lists available serial ports with their descriptions.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                tokio_serial::SerialPortType::UsbPort(usb) => usb.product,
                _ => None,
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect())
}

/// Returns the first port whose description names the device vendor.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn find_device_port() -> Result<Option<String>> {
    Ok(list_ports()?
        .into_iter()
        .find(|p| {
            p.description
                .as_deref()
                .is_some_and(|d| d.contains(VENDOR_KEYWORD))
        })
        .map(|p| p.name))
}
