//! Error definitions for the CEC engine's public surface.
//!
//! Everything in here is surfaced synchronously from the outer (non-interrupt)
//! API. Bus-level failures — timing violations, lost arbitration, missing
//! acknowledgements — are never errors in this sense: they are recovered
//! inside the state machine and, where the caller needs to know, reported
//! through the pending-event bitmap instead.

use thiserror::Error;

/// Errors returned by the non-interrupt API of [`CecDriver`](crate::driver::CecDriver).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum CecError {
    /// A frame is already queued for transmission. At most one frame
    /// may be outstanding; retry after a send-ok or send-failed event.
    #[error("A transfer is already pending")]
    Busy,

    /// The engine is disabled; call `enable` first.
    #[error("CEC engine is disabled")]
    Disabled,

    /// Frame is empty or longer than the maximum CEC frame length.
    #[error("Invalid frame length")]
    InvalidLength,

    /// Logical addresses are 4 bits; values above 15 are rejected.
    #[error("Invalid logical address")]
    InvalidAddress,
}
