//! Crate-wide constants. Mirrors the fixed `#define`/`static const` knobs of
//! the original implementation; AU has no runtime-tunable configuration.

use std::time::Duration;

/// Raw IPv4 protocol number AU rides on.
pub const IPPROTO_AU: i32 = 151;

/// Maximum payload bytes per segment.
pub const MAX_SEGMENT_SIZE: usize = 1000;

/// Fixed AU header size, in bytes.
pub const AU_HEADER_SIZE: usize = 20;

/// Largest AU packet the codec will ever produce or accept.
pub const MAX_PACKET_SIZE: usize = AU_HEADER_SIZE + MAX_SEGMENT_SIZE;

/// Capacity, in bytes, of both the send window and the receive queue.
pub const WINDOW_BYTES: usize = 4096;

/// Delay before a send window segment that hasn't been ACKed is retransmitted.
pub const SEND_ACK_TIMEOUT: Duration = Duration::from_millis(100);

/// Size of the reader thread's per-datagram scratch buffer.
pub const READ_BUFFER_SIZE: usize = 8192;
