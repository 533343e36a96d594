//! Frame codec for text payloads
//!
//! Every command, acknowledgment and typed reply travels in its own frame so
//! that one logical message is never split or merged by the TCP stream.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::MAGIC_BYTES;

/// Default maximum payload size (64 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Header size: magic(4) + length(4) = 8 bytes
pub const HEADER_SIZE: usize = 8;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),

    #[error("Frame payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Encodes text payloads into the wire format
pub struct Encoder {
    max_frame_size: usize,
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Encode a payload into a buffer
    pub fn encode(&self, payload: &str, buf: &mut BytesMut) -> Result<(), CodecError> {
        let bytes = payload.as_bytes();
        if bytes.len() > self.max_frame_size {
            return Err(CodecError::MessageTooLarge(bytes.len(), self.max_frame_size));
        }
        let length = u32::try_from(bytes.len())
            .map_err(|_| CodecError::MessageTooLarge(bytes.len(), u32::MAX as usize))?;

        buf.reserve(HEADER_SIZE + bytes.len());
        buf.put_slice(&MAGIC_BYTES);
        buf.put_u32(length);
        buf.put_slice(bytes);
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes text payloads from the wire format
pub struct Decoder {
    state: DecodeState,
    max_frame_size: usize,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Header,
    Payload {
        length: usize,
    },
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_frame_size,
        }
    }

    /// True once a header was consumed and its payload is still missing
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, DecodeState::Payload { .. })
    }

    /// Attempt to decode one payload from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    if buf[0..4] != MAGIC_BYTES {
                        return Err(CodecError::InvalidMagic);
                    }

                    let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
                    if length > self.max_frame_size {
                        return Err(CodecError::MessageTooLarge(length, self.max_frame_size));
                    }

                    buf.advance(HEADER_SIZE);
                    self.state = DecodeState::Payload { length };
                }
                DecodeState::Payload { length } => {
                    if buf.len() < length {
                        return Ok(None);
                    }

                    let payload = buf.split_to(length);
                    self.state = DecodeState::Header;

                    return String::from_utf8(payload.to_vec())
                        .map(Some)
                        .map_err(|_| CodecError::InvalidUtf8);
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
