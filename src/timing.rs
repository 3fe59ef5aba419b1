//! Bus timing derivation and pulse validation.
//!
//! All CEC timing is specified in microseconds, but the engine only ever sees
//! capture-timer ticks. [`Timings`] converts the specification values into
//! tick counts for a measured peripheral clock frequency, once, at enable
//! time, so the interrupt paths never divide.
//!
//! A pulse is validated in two stages, which is how the follower tells a
//! 0-bit from a 1-bit without knowing in advance which was sent:
//!
//! 1. At the rising edge the *low* duration is checked against the low window
//!    of each bit class ([`Timings::classify_data_low`]).
//! 2. At the next falling edge the *combined* low + high duration is checked
//!    against the total-duration window of the class picked in stage one
//!    ([`Timings::valid_data_high`]).
//!
//! Every window is widened by a fixed symmetric tolerance: incoming signals
//! are allowed some variance outside the CEC specification, and our own
//! measurements are not perfectly accurate either.

/// Tolerance applied symmetrically to every validation window (µs).
const VALID_TOLERANCE_US: u32 = 100;

/// Nominal duration of one bit period (µs).
const NOMINAL_BIT_TIME_US: u32 = 2400;

/// Time from the falling edge after which it is safe to sample an ACK (µs).
const NOMINAL_SAMPLE_TIME_US: u32 = 1050;

/// Timing window for one pulse class, in capture-timer ticks.
///
/// `low`/`high` are the nominal durations driven when transmitting;
/// the min/max pairs bound what is accepted when receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct BitWindow {
    /// Nominal low-phase duration.
    pub low: u32,
    /// Nominal high-phase duration.
    pub high: u32,
    /// Minimum acceptable low-phase duration (before tolerance).
    pub min_low: u32,
    /// Maximum acceptable low-phase duration (before tolerance).
    pub max_low: u32,
    /// Minimum acceptable combined low + high duration (before tolerance).
    pub min_duration: u32,
    /// Maximum acceptable combined low + high duration (before tolerance).
    pub max_duration: u32,
}

/// All bus timings converted to capture-timer ticks.
///
/// Built by [`Timings::new`] from the peripheral clock frequency. Also holds
/// the capture-timeout guard values: timeouts charged into the capture timer
/// at a point where, if they ever fire, the signal is known to be broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Timings {
    /// Nominal duration of one bit period.
    pub nominal_bit_time: u32,
    /// Point after a falling edge where sampling an ACK is safe.
    pub nominal_sample_time: u32,
    /// Free time before a resend attempt (3 bit periods).
    pub free_time_resend: u32,
    /// Free time before a new initiator's first attempt (5 bit periods).
    pub free_time_new_initiator: u32,
    /// Start bit window.
    pub start_bit: BitWindow,
    /// Data 0-bit window.
    pub data_zero: BitWindow,
    /// Data 1-bit window.
    pub data_one: BitWindow,
    /// Validation tolerance in ticks.
    pub tolerance: u32,
    /// Capture timeout while waiting out a start-bit low phase.
    pub cap_start_low: u32,
    /// Capture timeout while waiting out a start-bit high phase.
    pub cap_start_high: u32,
    /// Capture timeout while waiting out a data-bit low phase.
    pub cap_data_low: u32,
    /// Capture timeout while waiting out a data-bit high phase.
    pub cap_data_high: u32,
}

impl Timings {
    /// Derives all tick counts from the peripheral clock frequency in Hz.
    ///
    /// The frequency is stored divided by 10 000 so that the per-value
    /// conversion is a single multiply and a divide by 100, with no risk of
    /// 32-bit overflow for any timing the bus specification uses.
    pub fn new(freq_hz: u32) -> Self {
        let freq_div_10k = freq_hz / 10_000;
        let ticks = |us: u32| us * freq_div_10k / 100;

        let nominal_bit_time = ticks(NOMINAL_BIT_TIME_US);
        let start_bit = BitWindow {
            low: ticks(3700),
            high: ticks(800),
            min_low: ticks(3500),
            max_low: ticks(3900),
            min_duration: ticks(4300),
            max_duration: ticks(5700),
        };
        let data_zero = BitWindow {
            low: ticks(1500),
            high: ticks(900),
            min_low: ticks(1300),
            max_low: ticks(1700),
            min_duration: ticks(2050),
            max_duration: ticks(2750),
        };
        let data_one = BitWindow {
            low: ticks(600),
            high: ticks(1800),
            min_low: ticks(400),
            max_low: ticks(800),
            min_duration: ticks(2050),
            max_duration: ticks(2750),
        };
        let tolerance = ticks(VALID_TOLERANCE_US);

        Self {
            nominal_bit_time,
            nominal_sample_time: ticks(NOMINAL_SAMPLE_TIME_US),
            free_time_resend: 3 * nominal_bit_time,
            free_time_new_initiator: 5 * nominal_bit_time,
            tolerance,
            cap_start_low: start_bit.max_low + tolerance,
            cap_start_high: start_bit.max_duration - start_bit.min_low + tolerance,
            cap_data_low: data_zero.max_low + tolerance,
            cap_data_high: data_one.max_duration - data_one.min_low + tolerance,
            start_bit,
            data_zero,
            data_one,
        }
    }

    /// Nominal low-phase duration to drive for a data bit value.
    pub fn data_low(&self, bit: bool) -> u32 {
        if bit { self.data_one.low } else { self.data_zero.low }
    }

    /// Nominal high-phase duration to drive for a data bit value.
    pub fn data_high(&self, bit: bool) -> u32 {
        if bit { self.data_one.high } else { self.data_zero.high }
    }

    fn valid_low(&self, window: &BitWindow, t: u32) -> bool {
        t >= window.min_low.saturating_sub(self.tolerance) && t <= window.max_low + self.tolerance
    }

    fn valid_high(&self, window: &BitWindow, low_time: u32, high_time: u32) -> bool {
        let total = low_time + high_time;
        total >= window.min_duration.saturating_sub(self.tolerance)
            && total <= window.max_duration + self.tolerance
    }

    /// Checks a measured low pulse against the start-bit low window.
    pub fn valid_start_low(&self, t: u32) -> bool {
        self.valid_low(&self.start_bit, t)
    }

    /// Checks a start bit's combined duration at the trailing falling edge.
    pub fn valid_start_high(&self, low_time: u32, high_time: u32) -> bool {
        self.valid_high(&self.start_bit, low_time, high_time)
    }

    /// Classifies a measured data-bit low pulse.
    ///
    /// Returns the bit value whose low window the pulse falls in, or `None`
    /// if it matches neither. The 0-bit window is tried first; the windows do
    /// not overlap even with tolerance applied, so order only matters for the
    /// degenerate clock frequencies where they would.
    pub fn classify_data_low(&self, t: u32) -> Option<bool> {
        if self.valid_low(&self.data_zero, t) {
            Some(false)
        } else if self.valid_low(&self.data_one, t) {
            Some(true)
        } else {
            None
        }
    }

    /// Checks a data bit's combined duration against the window for `bit`.
    pub fn valid_data_high(&self, bit: bool, low_time: u32, high_time: u32) -> bool {
        if bit {
            self.valid_high(&self.data_one, low_time, high_time)
        } else {
            self.valid_high(&self.data_zero, low_time, high_time)
        }
    }
}
