//! Session state held by a peer
//!
//! Tunnels are named cells that the coordinator can read remotely. They are
//! created by role setup before the command loop starts.

mod tunnel;

pub use tunnel::*;
