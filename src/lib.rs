//! # hdmi-cec
//!
//! A portable, no_std Rust engine for the single-wire HDMI Consumer
//! Electronics Control (CEC) bus, bit-banged over any open-drain GPIO with a
//! capture-capable timer.
//!
//! This crate implements the CEC bit layer entirely from interrupts:
//! - transmit pulses are produced by programming timer timeouts
//! - receive pulses are measured with edge capture and checked against the
//!   bus specification's tolerance windows
//! - acknowledgement, broadcast NAK, resend, and bus arbitration semantics
//!   are handled by a single exhaustive state machine
//! - no blocking waits, no heap, no locks around protocol state
//!
//! ## Crate features
//! | Feature               | Description |
//! |-----------------------|-------------|
//! | `std`                 | Disables `#![no_std]` support, for host-side testing |
//! | `timer-isr` (default) | `critical_section`-protected global driver helpers and macros |
//! | `defmt-0-3`           | Uses `defmt` logging and derives |
//! | `log`                 | Uses `log` logging |
//!
//! ## Usage
//!
//! Implement [`timer::CecTimer`] for your capture timer peripheral, hand the
//! engine an open-drain pin, and forward every timer interrupt:
//!
//! ```ignore
//! use hdmi_cec::driver::CecDriver;
//!
//! let mut driver = CecDriver::new(line, timer);
//! driver.enable(4)?;
//! driver.send(&[0x45, 0x36])?;
//! ```
//!
//! ```ignore
//! #[interrupt]
//! fn MFT1() {
//!     let events = read_and_clear_pending(); // -> hdmi_cec::timer::IsrEvents
//!     cec_isr!(events);
//! }
//! ```
//!
//! Completion and reception are reported through an atomically drained
//! pending-event bitmap ([`driver::CecDriver::take_events`]) so a
//! notification task can forward them without ever touching protocol state.
//!
//! ## Integration Notes
//!
//! - The capture interrupt and the secondary-timer interrupt must share one
//!   priority; their mutual exclusion is what makes the engine lock-free.
//! - Only one driver instance should be active per physical bus.
//! - `send` is non-blocking and admits at most one outstanding frame; the
//!   outcome arrives as a `SEND_OK`/`SEND_FAILED` event after up to
//!   1 + [`consts::CEC_MAX_RESENDS`] attempts.
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "timer-isr")]
pub use critical_section;

pub mod consts;
pub mod driver;
pub mod error;
pub mod timer;
pub mod timing;
pub mod transfer;
