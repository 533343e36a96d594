//! Protocol module - Defines the wire protocol between coordinator and peers
//!
//! Text payloads are carried in length-prefixed frames:
//! - 4 bytes magic
//! - 4 bytes payload length (big-endian)
//! - Variable length UTF-8 payload
//!
//! The payload is one command, one acknowledgment or one typed reply.

mod codec;
mod command;
mod value;

pub use codec::*;
pub use command::*;
pub use value::*;

/// Default port for the coordinator
pub const DEFAULT_PORT: u16 = 5000;

/// Magic bytes for protocol identification
pub const MAGIC_BYTES: [u8; 4] = [0x54, 0x52, 0x50, 0x43]; // "TRPC"

/// Acknowledgment payload
pub const ACK: &str = "ACK";

/// Answer to a frame that did not match the expected keyword
pub const KO: &str = "KO";
