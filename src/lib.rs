//! # dps150
//!
//! A Rust client library for the FNIRSI DPS-150 programmable power supply.
//!
//! This library provides async communication with the DPS-150 over its
//! USB/Serial interface.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Event-driven telemetry with a consistent device-state snapshot
//! - Type-safe protocol implementation
//! - Comprehensive error handling
//!
//! ## Quick Start
//!
//! ```no_run
//! use dps150::Dps150;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dps150::Error> {
//!     // Connect to a DPS-150 device
//!     let mut psu = Dps150::serial("/dev/ttyACM0");
//!     let identity = psu.connect().await?;
//!
//!     println!("Connected to: {}", identity.model);
//!     println!("Firmware: {}", identity.firmware_version);
//!
//!     // Set 12 V / 1 A and switch the output on
//!     psu.set_voltage(12.0).await?;
//!     psu.set_current(1.0).await?;
//!     psu.enable_output().await?;
//!
//!     // Watch the telemetry stream
//!     let mut events = psu.subscribe();
//!     while let Some(event) = events.recv().await {
//!         if let dps150::Event::Snapshot(state) = event {
//!             println!("{:.3} V  {:.3} A", state.output_voltage, state.output_current);
//!             break;
//!         }
//!     }
//!
//!     // Disconnect
//!     psu.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Low-level protocol types (frames, field codes, commands)
//! - [`types`] - Data structures (device state, presets, protections)
//! - [`transport`] - Transport implementations (currently USB/Serial)
//! - [`event`] - Async event system for telemetry and lifecycle changes
//! - [`commands`] - Serialized command submission
//! - [`client`] - High-level [`Dps150`] client

pub mod client;
pub mod commands;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{CURRENT_MAX, Dps150, POWER_MAX, TEMPERATURE_MAX, VOLTAGE_MAX};
pub use commands::CommandHandler;
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, Subscription};
pub use protocol::{BaudRate, Command, CommandOpcode, FieldCode, Frame, FrameDecoder, TelemetryUpdate};
pub use transport::{
    SerialTransport, Transport,
    serial::{PortInfo, SerialConfig, find_device_port, list_ports},
};
pub use types::{
    DeviceIdentity, DeviceState, FullStatus, GroupPreset, ProtectionKind, ProtectionThresholds,
    RegulationMode, TripState,
};
