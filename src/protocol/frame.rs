//! Frame encoding and decoding for the DPS-150 protocol.
//!
//! The wire format is the same in both directions:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬──────────────┬──────────┐
//! │  header  │ command  │  field   │   len    │   payload    │ checksum │
//! │  1 byte  │  1 byte  │  1 byte  │  1 byte  │  len bytes   │  1 byte  │
//! └──────────┴──────────┴──────────┴──────────┴──────────────┴──────────┘
//! ```
//!
//! The header is `0xf1` host→device and `0xf0` device→host; frames coming
//! from the device always carry command byte `0xa1`, which the decoder uses
//! as a two-byte sync marker. The checksum is `(field + len + sum(payload))
//! mod 256`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Header byte of frames sent by the device.
pub const HEADER_DEVICE: u8 = 0xf0;

/// Header byte of frames sent by the host.
pub const HEADER_HOST: u8 = 0xf1;

/// Command byte carried by every device→host frame.
pub const DEVICE_COMMAND: u8 = 0xa1;

/// Maximum frame payload size (length is a single byte).
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Frame overhead: header, command, field, length, checksum.
pub const MIN_FRAME_SIZE: usize = 5;

/// Computes the mod-256 checksum over field code, length and payload.
#[must_use]
pub fn checksum(field: u8, payload: &[u8]) -> u8 {
    let sum = u32::from(field)
        + payload.len() as u32
        + payload.iter().map(|&b| u32::from(b)).sum::<u32>();
    (sum % 0x100) as u8
}

/// Encodes a host→device frame.
///
/// # Panics
///
/// Panics if the payload exceeds [`MAX_PAYLOAD_SIZE`]. All payloads built by
/// this crate are at most four bytes.
#[must_use]
pub fn encode(command: u8, field: u8, payload: &[u8]) -> Bytes {
    assert!(
        payload.len() <= MAX_PAYLOAD_SIZE,
        "payload exceeds maximum frame size"
    );

    let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + payload.len());
    buf.put_u8(HEADER_HOST);
    buf.put_u8(command);
    buf.put_u8(field);
    buf.put_u8(payload.len() as u8);
    buf.put_slice(payload);
    buf.put_u8(checksum(field, payload));
    buf.freeze()
}

/// One complete frame received from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command byte (always [`DEVICE_COMMAND`] on current firmware).
    pub command: u8,
    /// Field code identifying what the payload carries.
    pub field: u8,
    /// Payload bytes, length already validated against the frame header.
    pub payload: Bytes,
}

/// Incremental frame decoder that handles partial data.
///
/// Bytes arrive in arbitrary chunks from the serial driver; [`feed`] buffers
/// them and [`decode`] yields complete frames one at a time. After a checksum
/// mismatch the presumed frame is dropped and decoding continues at the next
/// `f0 a1` marker, so a single corrupted frame never stalls the stream.
///
/// [`feed`]: FrameDecoder::feed
/// [`decode`]: FrameDecoder::decode
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded and
    /// `Ok(None)` if more data is needed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Desync`] when leading bytes had to be discarded
    /// to find the next sync marker, and [`FrameError::BadChecksum`] when a
    /// framed region failed its checksum. Both consume the offending bytes;
    /// calling `decode` again continues with the remaining buffer.
    pub fn decode(&mut self) -> Result<Option<Frame>, FrameError> {
        // Resynchronize: drop anything before the next `f0 a1` marker.
        let discarded = self.skip_to_marker();
        if discarded > 0 {
            return Err(FrameError::Desync { discarded });
        }

        if self.buffer.len() < MIN_FRAME_SIZE {
            return Ok(None);
        }

        let field = self.buffer[2];
        let length = self.buffer[3] as usize;
        let total = 4 + length + 1;

        if self.buffer.len() < total {
            return Ok(None);
        }

        let expected = checksum(field, &self.buffer[4..4 + length]);
        let actual = self.buffer[4 + length];

        if expected != actual {
            // Drop the whole presumed frame and rescan from the byte after it.
            self.buffer.advance(total);
            return Err(FrameError::BadChecksum {
                field,
                expected,
                actual,
            });
        }

        let command = self.buffer[1];
        self.buffer.advance(4);
        let payload = self.buffer.split_to(length).freeze();
        self.buffer.advance(1); // checksum byte

        Ok(Some(Frame {
            command,
            field,
            payload,
        }))
    }

    /// Discards bytes up to the next `f0 a1` pair, returning how many were
    /// dropped. A trailing lone `f0` is kept, since its command byte may
    /// still be in flight.
    fn skip_to_marker(&mut self) -> usize {
        let buf = &self.buffer[..];
        let mut i = 0;
        while i < buf.len() {
            if buf[i] == HEADER_DEVICE && (i + 1 >= buf.len() || buf[i + 1] == DEVICE_COMMAND) {
                break;
            }
            i += 1;
        }
        self.buffer.advance(i);
        i
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
