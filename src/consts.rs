//! Constants used across the CEC protocol implementation.
//!
//! This module defines protocol-wide constants for frame sizing, addressing,
//! and the resend budget. They come straight from the CEC section of the HDMI
//! specification and should be used wherever framing or retry logic is
//! implemented so message boundaries stay consistent between the transmit and
//! receive paths.

/// The CEC broadcast address. Also the highest possible CEC address.
///
/// Frames whose destination nibble equals this value are broadcast frames,
/// which invert the ACK polarity: a follower pulls the line low to *reject*
/// (NAK) the frame rather than to acknowledge it.
pub const CEC_BROADCAST_ADDR: u8 = 15;

/// Maximum length (in bytes) of a CEC frame, header block included.
pub const MAX_CEC_MSG_LEN: usize = 16;

/// The CEC specification requires at least one and a maximum of
/// five resend attempts per frame.
pub const CEC_MAX_RESENDS: u8 = 5;

/// Number of completed incoming frames buffered before the oldest is dropped.
///
/// Frames are only produced at bus rate (a frame takes several milliseconds
/// on the wire), so a shallow queue is enough for any consumer that polls the
/// pending-event bitmap with reasonable latency.
pub const RX_QUEUE_DEPTH: usize = 4;
