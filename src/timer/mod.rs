//! Capture/timeout timer abstraction and ISR scheduling helpers.
//!
//! The engine never touches timer registers itself: it programs pulses
//! through the [`CecTimer`] trait and is fed back the resulting interrupt
//! causes as an [`IsrEvents`] set. A typical implementation wraps a
//! multi-function timer peripheral with one dual-edge capture channel (the
//! primary timer) and one plain oneshot channel (the secondary timer, used to
//! hoist send requests into interrupt context).
//!
//! With the `timer-isr` feature (default), this module also provides
//! `critical_section`-protected global-singleton helpers and macros for
//! wiring [`CecDriver`](crate::driver::CecDriver) into a real interrupt
//! handler:
//! - `global_cec_driver_init` / `global_cec_driver_setup`
//! - `global_cec_isr` and `global_cec_take_events`
//! - `init_cec_driver!()` and `cec_isr!()`

#[cfg(feature = "timer-isr")]
mod isr;
#[cfg_attr(feature = "timer-isr", allow(unused_imports))]
#[cfg(feature = "timer-isr")]
pub use isr::*;

#[cfg(feature = "timer-isr")]
mod macros;
#[cfg_attr(feature = "timer-isr", allow(unused_imports))]
#[cfg(feature = "timer-isr")]
pub use macros::*;

/// Edge to trigger a capture-timer interrupt on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum CapEdge {
    /// Capture on the line going low.
    Falling,
    /// Capture on the line going high.
    Rising,
}

/// Pending interrupt causes handed to [`CecDriver::interrupt`].
///
/// A hardware ISR reads its status register once, translates the pending
/// flags into this struct, clears them, and forwards the lot. Both the
/// capture-edge and capture-timeout flags may be pending at once in the
/// edge-trigger case; the dispatcher gives the edge precedence.
///
/// [`CecDriver::interrupt`]: crate::driver::CecDriver::interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct IsrEvents {
    /// The armed capture edge occurred.
    pub capture: bool,
    /// The capture timer expired before the armed edge occurred.
    pub timeout: bool,
    /// The secondary oneshot timer expired (a send request is pending).
    pub secondary: bool,
}

impl IsrEvents {
    /// A lone capture-edge event.
    pub const CAPTURE: Self = Self { capture: true, timeout: false, secondary: false };
    /// A lone capture-timeout event.
    pub const TIMEOUT: Self = Self { capture: false, timeout: true, secondary: false };
    /// A lone secondary-timer event.
    pub const SECONDARY: Self = Self { capture: false, timeout: false, secondary: true };
}

/// Interface to the capture-capable timer peripheral driving the engine.
///
/// All durations are in timer ticks at [`tick_freq`](CecTimer::tick_freq).
/// Implementations must deliver the resulting interrupts at a single
/// priority: the capture/timeout interrupt and the secondary-timer interrupt
/// must not be able to preempt one another, since that exclusivity is what
/// lets the engine mutate its state without locks.
pub trait CecTimer {
    /// Arms the capture timer for `edge` with a timeout of `timeout_ticks`.
    ///
    /// A timeout of 0 disables the timeout interrupt; only the edge is
    /// waited for. Any previously charged capture or timeout is discarded.
    fn start_capture(&mut self, edge: CapEdge, timeout_ticks: u32);

    /// Stops the capture timer and masks its interrupts.
    fn stop_capture(&mut self);

    /// Ticks elapsed since the capture timer was last started.
    fn elapsed_ticks(&self) -> u32;

    /// Starts a plain oneshot on the capture channel, no edge armed.
    fn start_oneshot(&mut self, ticks: u32);

    /// Starts the secondary oneshot timer.
    fn start_secondary(&mut self, ticks: u32);

    /// Stops the secondary oneshot timer.
    fn stop_secondary(&mut self);

    /// Frequency of the timer's tick clock in Hz.
    ///
    /// Sampled once per enable to derive every bus timing; see
    /// [`Timings::new`](crate::timing::Timings::new).
    fn tick_freq(&self) -> u32;
}
