//! Bit/byte cursor over a fixed-size frame buffer.
//!
//! [`MsgTransfer`] is shared by the transmit and receive paths: the initiator
//! reads bits out of it while driving the line, the follower writes decoded
//! bits into it. CEC sends each byte MSB first, so bit offset 0 addresses the
//! most significant bit of the current byte.
//!
//! Running the cursor past the end of the buffer is a silent saturating
//! condition rather than an error: an oversized or truncated frame must
//! degrade gracefully, never index outside the buffer, and never fault the
//! interrupt context that is advancing it.

use crate::consts::MAX_CEC_MSG_LEN;

/// A CEC message during transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct MsgTransfer {
    /// The CEC message.
    pub buf: [u8; MAX_CEC_MSG_LEN],
    /// Bit offset within the current byte (0 = MSB).
    pub bit: u8,
    /// Byte offset into `buf`.
    pub byte: u8,
}

impl MsgTransfer {
    /// Returns the bit under the cursor; 0 once the cursor is exhausted.
    pub fn get_bit(&self) -> bool {
        if self.byte as usize >= MAX_CEC_MSG_LEN {
            return false;
        }
        self.buf[self.byte as usize] & (0x80 >> self.bit) != 0
    }

    /// Writes the bit under the cursor; no-op once the cursor is exhausted.
    pub fn set_bit(&mut self, val: bool) {
        if self.byte as usize >= MAX_CEC_MSG_LEN {
            return;
        }
        let bit_flag = 0x80 >> self.bit;
        self.buf[self.byte as usize] &= !bit_flag;
        if val {
            self.buf[self.byte as usize] |= bit_flag;
        }
    }

    /// Advances the cursor one bit, carrying into the byte offset; no-op once
    /// the cursor is exhausted, no matter how often it keeps being advanced.
    pub fn inc_bit(&mut self) {
        if self.byte as usize >= MAX_CEC_MSG_LEN {
            return;
        }
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }
    }

    /// True iff the cursor sits exactly at the end of a `len`-byte message.
    pub fn is_eom(&self, len: u8) -> bool {
        if self.bit != 0 {
            return false;
        }
        self.byte == len
    }

    /// Rewinds the cursor to the start of the buffer without clearing it.
    pub fn rewind(&mut self) {
        self.bit = 0;
        self.byte = 0;
    }
}
