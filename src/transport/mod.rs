//! Transport layer for DPS-150 communication.
//!
//! This module provides the abstraction for the byte channel to the device.
//! Currently only USB/Serial is implemented; tests substitute an in-memory
//! mock.

pub mod serial;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{FrameError, Result};
use crate::protocol::frame::Frame;

/// One item produced by a transport's read loop.
#[derive(Debug)]
pub enum Inbound {
    /// A complete, checksum-valid frame.
    Frame(Frame),
    /// A framing failure; the offending bytes were already discarded.
    Malformed(FrameError),
}

/// Trait for transport implementations.
///
/// A transport owns the physical channel: it writes whole frames on demand
/// and runs the only reader, pushing decoded frames into the inbound
/// channel. The channel closing signals that the transport read side died.
pub trait Transport: Send + Sync {
    /// Connects to the device and starts the read loop.
    fn connect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Disconnects from the device, stopping the read loop.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Writes one encoded frame to the device.
    fn send(&mut self, frame: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;

    /// Takes the inbound frame receiver.
    ///
    /// Available exactly once per successful connect.
    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Inbound>>;
}

pub use serial::SerialTransport;
