//! Protocol definitions for DPS-150 communication.
//!
//! This module contains the low-level protocol types including:
//! - Frame encoding/decoding
//! - Command opcodes and field codes
//! - Inbound payload interpretation

pub mod command;
pub mod frame;
pub mod parser;

pub use command::{BaudRate, Command, CommandOpcode, FieldCode};
pub use frame::{
    DEVICE_COMMAND, Frame, FrameDecoder, HEADER_DEVICE, HEADER_HOST, MAX_PAYLOAD_SIZE, checksum,
    encode as encode_frame,
};
pub use parser::{TelemetryUpdate, interpret, parse_full_status};
