//! Interrupt-driven CEC bus engine.
//!
//! This module provides the [`CecDriver`] struct, which bit-bangs the CEC
//! single-wire bus using nothing but a capture-capable timer and an
//! open-drain GPIO. There is no blocking anywhere: the engine is a state
//! machine advanced exclusively by capture-edge and timeout interrupts, with
//! transmit pulse widths produced by timer programming and receive pulse
//! widths measured by edge capture.
//!
//! ## Roles
//!
//! The engine is an *initiator* when sending a frame and a *follower* when
//! receiving one. Both roles share the wire and the state machine:
//!
//! - An initiator observes a free-time interval, drives the start bit and the
//!   frame's bits as timed low/high pulses, and samples the ACK bit-period
//!   after each byte. An unacknowledged frame is resent up to
//!   [`CEC_MAX_RESENDS`] times.
//! - A follower validates every measured pulse against the specification's
//!   tolerance windows, reconstructs the frame bit by bit, and asserts the
//!   ACK for frames addressed to it. Broadcast frames invert the ACK
//!   polarity: pulling the line low rejects them.
//! - Arbitration: a falling edge seen while idle, or while a queued send is
//!   still in its free-time/start window, always converts the engine into a
//!   follower. The queued frame stays queued and is retried once the bus
//!   returns to idle.
//!
//! ## Concurrency model
//!
//! Exactly one execution context ever mutates protocol state. Send requests
//! from thread context only copy the frame and arm the secondary oneshot
//! timer with zero delay; the actual admission into the state machine happens
//! inside the timer interrupt, at the same priority as the capture events, so
//! no lock is needed around the state machine. The only cross-context data
//! is the pending-event bitmap, which is an atomic fetch-or / swap pair.
//!
//! ## Example
//!
//! ```ignore
//! use hdmi_cec::driver::CecDriver;
//!
//! let mut driver = CecDriver::new(line, timer);
//! driver.enable(4)?;
//! driver.send(&[0x45, 0x36])?; // <Standby> from address 4 to address 5
//! // ... later, from the notification path:
//! let events = driver.take_events();
//! ```

use crate::consts::{
    CEC_BROADCAST_ADDR, CEC_MAX_RESENDS, MAX_CEC_MSG_LEN, RX_QUEUE_DEPTH,
};
use crate::error::CecError;
use crate::timer::{CapEdge, CecTimer, IsrEvents};
use crate::timing::Timings;
use crate::transfer::MsgTransfer;

use core::sync::atomic::{AtomicU32, Ordering};
use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Deque;

macro_rules! cec_log {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::debug!($($arg)*);
        #[cfg(feature = "defmt-0-3")]
        defmt::debug!($($arg)*);
    }};
}

/// CEC state machine states. Each state typically takes action on entry and
/// on timeouts. `Initiator*` states are used for sending, `Follower*` states
/// for receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum CecState {
    /// Engine off; all contexts zeroed.
    #[default]
    Disabled,
    /// Bus idle, watching for a start bit, ready to admit a queued send.
    Idle,
    /// Initiator waiting out the mandatory signal-free time.
    InitiatorFreeTime,
    /// Initiator driving the start bit low phase.
    InitiatorStartLow,
    /// Initiator in the start bit high phase, still open to arbitration.
    InitiatorStartHigh,
    /// Initiator driving a header source-nibble bit low phase.
    InitiatorHeaderInitLow,
    /// Initiator in a header source-nibble high phase, open to arbitration.
    InitiatorHeaderInitHigh,
    /// Initiator driving a header destination-nibble bit low phase.
    InitiatorHeaderDestLow,
    /// Initiator in a header destination-nibble high phase.
    InitiatorHeaderDestHigh,
    /// Initiator driving a data bit low phase.
    InitiatorDataLow,
    /// Initiator in a data bit high phase.
    InitiatorDataHigh,
    /// Initiator driving the end-of-message bit low phase.
    InitiatorEomLow,
    /// Initiator in the end-of-message bit high phase.
    InitiatorEomHigh,
    /// Initiator driving the ACK bit-period low phase.
    InitiatorAckLow,
    /// Initiator released the line, waiting for the safe sample point.
    InitiatorAckHigh,
    /// Initiator sampled the ACK, waiting out the rest of the bit.
    InitiatorAckVerify,
    /// Follower measuring the start bit low phase.
    FollowerStartLow,
    /// Follower measuring the start bit high phase.
    FollowerStartHigh,
    /// Follower measuring a header source-nibble low phase.
    FollowerHeaderInitLow,
    /// Follower measuring a header source-nibble high phase.
    FollowerHeaderInitHigh,
    /// Follower measuring a header destination-nibble low phase.
    FollowerHeaderDestLow,
    /// Follower measuring a header destination-nibble high phase.
    FollowerHeaderDestHigh,
    /// Follower measuring the end-of-message bit low phase.
    FollowerEomLow,
    /// Follower measuring the end-of-message bit high phase.
    FollowerEomHigh,
    /// Follower in the ACK low phase, asserting it if addressed.
    FollowerAckLow,
    /// Follower at the ACK safe sample point (broadcast NAK detection).
    FollowerAckVerify,
    /// Follower releasing the ACK and closing out the bit-period.
    FollowerAckFinish,
    /// Follower measuring a data bit low phase.
    FollowerDataLow,
    /// Follower measuring a data bit high phase.
    FollowerDataHigh,
}

/// Outward notifications produced by the engine, as a bitmask value.
///
/// Consumed through [`CecDriver::take_events`], which drains the pending set
/// atomically so interrupt-context producers never race the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct CecEvents(u32);

impl CecEvents {
    /// A queued frame was transmitted and acknowledged.
    pub const SEND_OK: Self = Self(1 << 0);
    /// A queued frame exhausted its resend budget and was dropped.
    pub const SEND_FAILED: Self = Self(1 << 1);
    /// A complete incoming frame is waiting in the receive queue.
    pub const FRAME_RECEIVED: Self = Self(1 << 2);

    /// True iff no event bits are set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True iff every bit of `other` is set in `self`.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bitmask, for forwarding over a host transport.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Pending-event bitmap with interrupt-context producers and a single
/// out-of-interrupt consumer. Set is a fetch-or, take is a swap; neither
/// side ever blocks.
#[derive(Debug, Default)]
struct EventSet(AtomicU32);

impl EventSet {
    fn post(&self, events: CecEvents) {
        let _ = self.0.fetch_or(events.0, Ordering::Relaxed);
    }

    fn take(&self) -> CecEvents {
        CecEvents(self.0.swap(0, Ordering::Relaxed))
    }

    fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// A complete received CEC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct CecFrame {
    /// Frame bytes; the header block is at index 0.
    pub buf: [u8; MAX_CEC_MSG_LEN],
    /// Number of valid bytes in `buf`.
    pub len: u8,
}

impl CecFrame {
    /// The valid bytes of the frame.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }
}

/// Receive buffer and state.
#[derive(Debug, Default)]
struct CecRx {
    /// The current incoming message being parsed. Copied to the receive
    /// queue upon completion.
    msgt: MsgTransfer,
    /// End of Message received from the source?
    eom: bool,
    /// A follower NAKed a broadcast transfer.
    broadcast_nak: bool,
    /// Last measured low-pulse duration, kept so the combined bit duration
    /// can be verified at the next falling edge.
    low_time: u32,
}

/// Transmit buffer and state.
#[derive(Debug, Default)]
struct CecTx {
    /// Outgoing message.
    msgt: MsgTransfer,
    /// Message length; 0 means no frame is queued.
    len: u8,
    /// Number of resends attempted in the current send.
    resends: u8,
    /// Acknowledge received from the sink?
    ack: bool,
}

/// The CEC bus engine.
///
/// Owns the open-drain line pin, the capture timer, and the transmit/receive
/// contexts. One instance per physical bus; in interrupt-driven use, wrap it
/// with the global helpers in [`crate::timer`] and forward every timer
/// interrupt to [`interrupt`](CecDriver::interrupt).
///
/// ## Type Parameters
///
/// - `LINE`: the CEC line, an open-drain pin readable and writable through
///   [`embedded_hal::digital::OutputPin`] + [`embedded_hal::digital::InputPin`]
/// - `TMR`: the capture/timeout timer, via [`CecTimer`]
#[derive(Debug)]
pub struct CecDriver<LINE, TMR>
where
    LINE: OutputPin + InputPin,
    TMR: CecTimer,
{
    state: CecState,
    rx: CecRx,
    tx: CecTx,
    /// Our logical address; incoming frames to this address get ACKed.
    addr: u8,
    timings: Timings,
    line: LINE,
    timer: TMR,
    events: EventSet,
    rx_queue: Deque<CecFrame, RX_QUEUE_DEPTH>,
}

impl<LINE, TMR> CecDriver<LINE, TMR>
where
    LINE: OutputPin + InputPin,
    TMR: CecTimer,
{
    /// Creates a new, disabled engine on the given line and timer.
    ///
    /// The line is released (high) immediately so a half-initialized engine
    /// never holds the bus down. Call [`enable`](CecDriver::enable) to start
    /// participating in bus traffic.
    pub fn new(mut line: LINE, timer: TMR) -> Self {
        let _ = line.set_high(); // Release the bus
        Self {
            state: CecState::Disabled,
            rx: CecRx::default(),
            tx: CecTx::default(),
            addr: CEC_BROADCAST_ADDR,
            timings: Timings::new(timer.tick_freq()),
            line,
            timer,
            events: EventSet::default(),
            rx_queue: Deque::new(),
        }
    }

    /// The current protocol state.
    pub fn state(&self) -> CecState {
        self.state
    }

    /// True iff the engine has been enabled.
    pub fn is_enabled(&self) -> bool {
        self.state != CecState::Disabled
    }

    /// Enables the engine with the given logical address (0–15).
    ///
    /// Samples the timer clock, derives all bus timings, enters `Idle` and
    /// arms a falling-edge capture for the first start bit. Enabling an
    /// already-enabled engine is a no-op and does not reset in-flight state.
    pub fn enable(&mut self, own_addr: u8) -> Result<(), CecError> {
        if own_addr > CEC_BROADCAST_ADDR {
            return Err(CecError::InvalidAddress);
        }
        if self.state != CecState::Disabled {
            return Ok(());
        }

        self.addr = own_addr;
        self.timings = Timings::new(self.timer.tick_freq());
        self.enter_state(CecState::Idle);
        // Capture the falling edge of the first start bit to get things going
        self.timer.start_capture(CapEdge::Falling, 0);
        cec_log!("CEC enabled, addr {}", own_addr);
        Ok(())
    }

    /// Disables the engine, zeroing all contexts, the receive queue, and
    /// the pending-event bitmap. Idempotent.
    pub fn disable(&mut self) {
        if self.state == CecState::Disabled {
            return;
        }
        self.timer.stop_secondary();
        self.timer.stop_capture();
        self.enter_state(CecState::Disabled);
        cec_log!("CEC disabled");
    }

    /// Queues a frame for transmission. At most one frame may be
    /// outstanding at a time.
    ///
    /// This never blocks and never touches the state machine: it copies the
    /// frame into the owned transmit buffer and arms the secondary oneshot
    /// timer with zero delay, so admission happens inside the timer
    /// interrupt. If the bus is mid-receive, the send starts once the
    /// receive returns the engine to idle.
    ///
    /// The outcome arrives later as a [`CecEvents::SEND_OK`] or
    /// [`CecEvents::SEND_FAILED`] event.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), CecError> {
        if self.state == CecState::Disabled {
            return Err(CecError::Disabled);
        }
        if frame.is_empty() || frame.len() > MAX_CEC_MSG_LEN {
            return Err(CecError::InvalidLength);
        }
        if self.tx.len != 0 {
            return Err(CecError::Busy);
        }

        self.tx.len = frame.len() as u8;
        self.tx.msgt.buf[..frame.len()].copy_from_slice(frame);
        cec_log!("CEC send queued, {} bytes", frame.len());

        // Elevate to interrupt context
        self.timer.start_secondary(0);

        Ok(())
    }

    /// Atomically drains and returns the pending outward events.
    ///
    /// Safe to call from outside the interrupt context while the engine
    /// keeps producing.
    pub fn take_events(&self) -> CecEvents {
        self.events.take()
    }

    /// Pops the oldest completed incoming frame, if any.
    pub fn receive(&mut self) -> Option<CecFrame> {
        self.rx_queue.pop_front()
    }

    /// Handles one set of pending timer interrupt causes.
    ///
    /// The capture edge takes precedence over the capture timeout: both are
    /// pending together in the edge-trigger case and the timeout is then
    /// stale. The secondary timer is handled on top of either, since it is
    /// an independent channel.
    pub fn interrupt(&mut self, events: IsrEvents) {
        if events.capture {
            self.event_capture();
        } else if events.timeout {
            self.event_timeout();
        }
        if events.secondary {
            self.timer.stop_secondary();
            self.event_tx();
        }
    }

    fn set_line(&mut self, level: bool) {
        if level {
            let _ = self.line.set_high();
        } else {
            let _ = self.line.set_low();
        }
    }

    fn line_level(&mut self) -> bool {
        self.line.is_high().unwrap_or(true)
    }

    /// Sole mutator of the protocol state.
    ///
    /// Derives three outputs purely from the new state and the current
    /// tx/rx contexts: the line level to drive (or leave unchanged), the
    /// capture edge to arm (or none for a pure timeout), and the timeout
    /// duration; then programs the hardware. Every state is matched
    /// explicitly.
    fn enter_state(&mut self, new_state: CecState) {
        use CecState::*;

        let mut line: Option<bool> = None;
        let mut cap_edge: Option<CapEdge> = None;
        let mut timeout: Option<u32> = None;

        self.state = new_state;
        match new_state {
            Disabled => {
                line = Some(true);
                self.rx = CecRx::default();
                self.tx = CecTx::default();
                self.rx_queue.clear();
                self.events.clear();
            }
            Idle => {
                self.tx.msgt.rewind();
                self.rx.msgt.rewind();
                if self.tx.len > 0 {
                    // Execute a postponed send
                    self.enter_state(InitiatorFreeTime);
                    return;
                }
                // Wait for an incoming frame
                line = Some(true);
                cap_edge = Some(CapEdge::Falling);
                timeout = Some(0);
            }
            InitiatorFreeTime => {
                line = Some(true);
                cap_edge = Some(CapEdge::Falling);
                timeout = Some(if self.tx.resends > 0 {
                    self.timings.free_time_resend
                } else {
                    self.timings.free_time_new_initiator
                });
            }
            InitiatorStartLow => {
                self.tx.msgt.rewind();
                line = Some(false);
                timeout = Some(self.timings.start_bit.low);
            }
            InitiatorStartHigh => {
                line = Some(true);
                cap_edge = Some(CapEdge::Falling);
                timeout = Some(self.timings.start_bit.high);
            }
            InitiatorHeaderInitLow | InitiatorHeaderDestLow | InitiatorDataLow => {
                line = Some(false);
                timeout = Some(self.timings.data_low(self.tx.msgt.get_bit()));
            }
            InitiatorHeaderInitHigh => {
                line = Some(true);
                cap_edge = Some(CapEdge::Falling);
                timeout = Some(self.timings.data_high(self.tx.msgt.get_bit()));
            }
            InitiatorHeaderDestHigh | InitiatorDataHigh => {
                line = Some(true);
                timeout = Some(self.timings.data_high(self.tx.msgt.get_bit()));
            }
            InitiatorEomLow => {
                line = Some(false);
                timeout = Some(self.timings.data_low(self.tx.msgt.is_eom(self.tx.len)));
            }
            InitiatorEomHigh => {
                line = Some(true);
                timeout = Some(self.timings.data_high(self.tx.msgt.is_eom(self.tx.len)));
            }
            InitiatorAckLow => {
                line = Some(false);
                timeout = Some(self.timings.data_low(true));
            }
            InitiatorAckHigh => {
                line = Some(true);
                // Aim for the middle of the safe sample window
                timeout = Some(
                    (self.timings.data_one.low + self.timings.data_zero.low) / 2
                        - self.timings.data_one.low,
                );
            }
            InitiatorAckVerify => {
                let mut ack = !self.line_level();
                if self.tx.msgt.buf[0] & 0x0f == CEC_BROADCAST_ADDR {
                    // We are sending a broadcast. Any follower can NAK a
                    // broadcast message the same way they would ACK a
                    // directed one.
                    ack = !ack;
                }
                self.tx.ack = ack;
                // At the safe sample point; wait until the end of this bit.
                timeout = Some(self.timings.nominal_bit_time - self.timings.nominal_sample_time);
            }
            FollowerStartLow => {
                cap_edge = Some(CapEdge::Rising);
                timeout = Some(self.timings.cap_start_low);
            }
            FollowerStartHigh => {
                cap_edge = Some(CapEdge::Falling);
                timeout = Some(self.timings.cap_start_high);
            }
            FollowerHeaderInitLow | FollowerHeaderDestLow | FollowerEomLow => {
                cap_edge = Some(CapEdge::Rising);
                timeout = Some(self.timings.cap_data_low);
            }
            FollowerHeaderInitHigh | FollowerHeaderDestHigh | FollowerEomHigh => {
                cap_edge = Some(CapEdge::Falling);
                timeout = Some(self.timings.cap_data_high);
            }
            FollowerAckLow => {
                let addr = self.rx.msgt.buf[0] & 0x0f;
                if addr == self.addr {
                    // The frame is addressed to us; assert the ACK
                    line = Some(false);
                    timeout = Some(self.timings.nominal_sample_time);
                } else if addr == CEC_BROADCAST_ADDR {
                    // Never ack a broadcast, but keep reading so a NAK from
                    // another follower can be sampled
                    timeout = Some(self.timings.nominal_sample_time);
                }
            }
            FollowerAckVerify => {
                // At the safe sample point. A broadcast frame is considered
                // lost if any follower pulls the line low here.
                if self.rx.msgt.buf[0] & 0x0f == CEC_BROADCAST_ADDR {
                    self.rx.broadcast_nak = !self.line_level();
                } else {
                    self.rx.broadcast_nak = false;
                }
                // The ACK is released at the end of a data-zero low period
                // (an ACK is technically a zero).
                timeout = Some(self.timings.data_zero.low - self.timings.nominal_sample_time);
            }
            FollowerAckFinish => {
                line = Some(true);
                if self.rx.eom || self.rx.msgt.byte as usize >= MAX_CEC_MSG_LEN {
                    self.complete_receive();
                    timeout = Some(self.timings.data_zero.high);
                } else {
                    cap_edge = Some(CapEdge::Falling);
                    timeout = Some(self.timings.cap_data_high);
                }
            }
            FollowerDataLow => {
                cap_edge = Some(CapEdge::Rising);
                timeout = Some(self.timings.cap_data_low);
            }
            FollowerDataHigh => {
                cap_edge = Some(CapEdge::Falling);
                timeout = Some(self.timings.cap_data_high);
            }
        }

        if let Some(level) = line {
            self.set_line(level);
        }
        if let Some(timeout) = timeout {
            match cap_edge {
                Some(edge) => self.timer.start_capture(edge, timeout),
                None => self.timer.start_oneshot(timeout),
            }
        }
    }

    /// Hands a completed, addressed incoming frame to the receive queue.
    fn complete_receive(&mut self) {
        let addr = self.rx.msgt.buf[0] & 0x0f;
        if addr != self.addr && addr != CEC_BROADCAST_ADDR {
            return;
        }
        let frame = CecFrame {
            buf: self.rx.msgt.buf,
            len: self.rx.msgt.byte,
        };
        if self.rx_queue.is_full() {
            // Keep the freshest frames
            let _ = self.rx_queue.pop_front();
        }
        let _ = self.rx_queue.push_back(frame);
        self.events.post(CecEvents::FRAME_RECEIVED);
        cec_log!("CEC frame received, {} bytes", frame.len);
    }

    /// Capture-timeout event handler.
    ///
    /// For initiator states a timeout is the normal forward progression:
    /// we programmed the pulse duration ourselves. For follower states a
    /// timeout means the far end stalled mid-frame, which is a protocol
    /// violation; the exchange is abandoned.
    fn event_timeout(&mut self) {
        use CecState::*;

        match self.state {
            Disabled | Idle => {}
            InitiatorFreeTime => self.enter_state(InitiatorStartLow),
            InitiatorStartLow => self.enter_state(InitiatorStartHigh),
            InitiatorStartHigh => self.enter_state(InitiatorHeaderInitLow),
            InitiatorHeaderInitLow => self.enter_state(InitiatorHeaderInitHigh),
            InitiatorHeaderInitHigh => {
                self.tx.msgt.inc_bit();
                if self.tx.msgt.bit == 4 {
                    self.enter_state(InitiatorHeaderDestLow);
                } else {
                    self.enter_state(InitiatorHeaderInitLow);
                }
            }
            InitiatorHeaderDestLow => self.enter_state(InitiatorHeaderDestHigh),
            InitiatorHeaderDestHigh => {
                self.tx.msgt.inc_bit();
                if self.tx.msgt.byte == 1 {
                    self.enter_state(InitiatorEomLow);
                } else {
                    self.enter_state(InitiatorHeaderDestLow);
                }
            }
            InitiatorEomLow => self.enter_state(InitiatorEomHigh),
            InitiatorEomHigh => self.enter_state(InitiatorAckLow),
            InitiatorAckLow => self.enter_state(InitiatorAckHigh),
            InitiatorAckHigh => self.enter_state(InitiatorAckVerify),
            InitiatorAckVerify => {
                if self.tx.ack {
                    if !self.tx.msgt.is_eom(self.tx.len) {
                        // More data in this frame
                        self.enter_state(InitiatorDataLow);
                    } else {
                        // Transfer completed successfully
                        self.tx.len = 0;
                        self.tx.resends = 0;
                        self.enter_state(Idle);
                        self.events.post(CecEvents::SEND_OK);
                        cec_log!("CEC send ok");
                    }
                } else if self.tx.resends < CEC_MAX_RESENDS {
                    // Resend
                    self.tx.resends += 1;
                    self.enter_state(InitiatorFreeTime);
                } else {
                    // Transfer failed
                    self.tx.len = 0;
                    self.tx.resends = 0;
                    self.enter_state(Idle);
                    self.events.post(CecEvents::SEND_FAILED);
                    cec_log!("CEC send failed");
                }
            }
            InitiatorDataLow => self.enter_state(InitiatorDataHigh),
            InitiatorDataHigh => {
                self.tx.msgt.inc_bit();
                if self.tx.msgt.bit == 0 {
                    self.enter_state(InitiatorEomLow);
                } else {
                    self.enter_state(InitiatorDataLow);
                }
            }
            FollowerAckLow => self.enter_state(FollowerAckVerify),
            FollowerAckVerify => {
                if self.rx.broadcast_nak {
                    self.enter_state(Idle);
                } else {
                    self.enter_state(FollowerAckFinish);
                }
            }
            FollowerStartLow | FollowerStartHigh | FollowerHeaderInitLow
            | FollowerHeaderInitHigh | FollowerHeaderDestLow | FollowerHeaderDestHigh
            | FollowerEomLow | FollowerEomHigh | FollowerAckFinish | FollowerDataLow
            | FollowerDataHigh => self.enter_state(Idle),
        }
    }

    /// Capture-edge event handler.
    ///
    /// Classifies the measured pulse against the tolerance windows to pick
    /// the next state; any invalid timing falls back to `Idle`. A falling
    /// edge while idle or while a queued send has not yet claimed the bus is
    /// another initiator's start bit: the send is postponed and the engine
    /// becomes a follower.
    fn event_capture(&mut self) {
        use CecState::*;

        match self.state {
            Idle => {
                // A falling edge during idle, likely a start bit
                self.enter_state(FollowerStartLow);
            }
            InitiatorFreeTime | InitiatorStartHigh | InitiatorHeaderInitHigh => {
                // A falling edge during free time: lost arbitration.
                // Postpone this send and listen.
                self.tx.msgt.rewind();
                self.enter_state(FollowerStartLow);
            }
            FollowerStartLow => {
                // Rising edge of the start bit, validate the low phase
                let t = self.timer.elapsed_ticks();
                if self.timings.valid_start_low(t) {
                    self.rx.low_time = t;
                    self.enter_state(FollowerStartHigh);
                } else {
                    self.enter_state(Idle);
                }
            }
            FollowerStartHigh => {
                let t = self.timer.elapsed_ticks();
                if self.timings.valid_start_high(self.rx.low_time, t) {
                    self.enter_state(FollowerHeaderInitLow);
                } else {
                    self.enter_state(Idle);
                }
            }
            FollowerHeaderInitLow | FollowerHeaderDestLow | FollowerDataLow => {
                let t = self.timer.elapsed_ticks();
                match self.timings.classify_data_low(t) {
                    Some(bit) => {
                        self.rx.low_time = t;
                        self.rx.msgt.set_bit(bit);
                        let next = match self.state {
                            FollowerHeaderInitLow => FollowerHeaderInitHigh,
                            FollowerHeaderDestLow => FollowerHeaderDestHigh,
                            _ => FollowerDataHigh,
                        };
                        self.enter_state(next);
                    }
                    None => self.enter_state(Idle),
                }
            }
            FollowerHeaderInitHigh => {
                let t = self.timer.elapsed_ticks();
                let data = self.rx.msgt.get_bit();
                if self.timings.valid_data_high(data, self.rx.low_time, t) {
                    self.rx.msgt.inc_bit();
                    if self.rx.msgt.bit == 4 {
                        self.enter_state(FollowerHeaderDestLow);
                    } else {
                        self.enter_state(FollowerHeaderInitLow);
                    }
                } else {
                    self.enter_state(Idle);
                }
            }
            FollowerHeaderDestHigh => {
                let t = self.timer.elapsed_ticks();
                let data = self.rx.msgt.get_bit();
                if self.timings.valid_data_high(data, self.rx.low_time, t) {
                    self.rx.msgt.inc_bit();
                    if self.rx.msgt.bit == 0 {
                        self.enter_state(FollowerEomLow);
                    } else {
                        self.enter_state(FollowerHeaderDestLow);
                    }
                } else {
                    self.enter_state(Idle);
                }
            }
            FollowerEomLow => {
                let t = self.timer.elapsed_ticks();
                match self.timings.classify_data_low(t) {
                    Some(bit) => {
                        self.rx.low_time = t;
                        self.rx.eom = bit;
                        self.enter_state(FollowerEomHigh);
                    }
                    None => self.enter_state(Idle),
                }
            }
            FollowerEomHigh => {
                let t = self.timer.elapsed_ticks();
                if self.timings.valid_data_high(self.rx.eom, self.rx.low_time, t) {
                    self.enter_state(FollowerAckLow);
                } else {
                    self.enter_state(Idle);
                }
            }
            FollowerAckLow => self.enter_state(FollowerAckFinish),
            FollowerAckFinish => self.enter_state(FollowerDataLow),
            FollowerDataHigh => {
                let t = self.timer.elapsed_ticks();
                let data = self.rx.msgt.get_bit();
                if self.timings.valid_data_high(data, self.rx.low_time, t) {
                    self.rx.msgt.inc_bit();
                    if self.rx.msgt.bit == 0 {
                        self.enter_state(FollowerEomLow);
                    } else {
                        self.enter_state(FollowerDataLow);
                    }
                } else {
                    self.enter_state(Idle);
                }
            }
            // Captures in any other state carry no information
            _ => {}
        }
    }

    /// Secondary-timer event handler: a send request is pending.
    fn event_tx(&mut self) {
        // If a receive is in progress, this transfer starts when the
        // engine transitions back to Idle
        if self.state == CecState::Idle {
            self.enter_state(CecState::InitiatorFreeTime);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    /// Test clock: 15 MHz, so one microsecond is 15 ticks.
    const FREQ: u32 = 15_000_000;

    fn us(t: u32) -> u32 {
        t * 15
    }

    #[derive(Debug)]
    struct LineState {
        /// Level we drive: true = released.
        driven: bool,
        /// Level driven by the rest of the bus.
        external: bool,
        /// History of levels we have driven.
        drives: Vec<bool>,
    }

    /// Open-drain bus line double: the wire reads low if either side
    /// drives low.
    #[derive(Debug, Clone)]
    struct SimLine(Rc<RefCell<LineState>>);

    impl SimLine {
        fn new() -> Self {
            Self(Rc::new(RefCell::new(LineState {
                driven: true,
                external: true,
                drives: Vec::new(),
            })))
        }

        fn set_bus(&self, level: bool) {
            self.0.borrow_mut().external = level;
        }

        fn drives(&self) -> Vec<bool> {
            self.0.borrow().drives.clone()
        }
    }

    impl ErrorType for SimLine {
        type Error = Infallible;
    }

    impl OutputPin for SimLine {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            let mut s = self.0.borrow_mut();
            s.driven = false;
            s.drives.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            let mut s = self.0.borrow_mut();
            s.driven = true;
            s.drives.push(true);
            Ok(())
        }
    }

    impl InputPin for SimLine {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            let s = self.0.borrow();
            Ok(s.driven && s.external)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            self.is_high().map(|h| !h)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    enum Program {
        #[default]
        None,
        Capture {
            edge: CapEdge,
            timeout: u32,
        },
        Oneshot(u32),
        Stopped,
    }

    #[derive(Debug, Default)]
    struct TimerState {
        program: Program,
        secondary: Option<u32>,
        elapsed: u32,
    }

    #[derive(Debug, Clone)]
    struct SimTimer(Rc<RefCell<TimerState>>);

    impl SimTimer {
        fn new() -> Self {
            Self(Rc::new(RefCell::new(TimerState::default())))
        }

        fn set_elapsed(&self, ticks: u32) {
            self.0.borrow_mut().elapsed = ticks;
        }

        fn program(&self) -> Program {
            self.0.borrow().program
        }

        fn secondary(&self) -> Option<u32> {
            self.0.borrow().secondary
        }

        fn last_oneshot(&self) -> u32 {
            match self.0.borrow().program {
                Program::Oneshot(t) => t,
                other => panic!("expected a oneshot, timer is {other:?}"),
            }
        }

        fn last_timeout(&self) -> u32 {
            match self.0.borrow().program {
                Program::Capture { timeout, .. } => timeout,
                Program::Oneshot(t) => t,
                other => panic!("no timeout charged, timer is {other:?}"),
            }
        }
    }

    impl CecTimer for SimTimer {
        fn start_capture(&mut self, edge: CapEdge, timeout_ticks: u32) {
            self.0.borrow_mut().program = Program::Capture {
                edge,
                timeout: timeout_ticks,
            };
        }

        fn stop_capture(&mut self) {
            self.0.borrow_mut().program = Program::Stopped;
        }

        fn elapsed_ticks(&self) -> u32 {
            self.0.borrow().elapsed
        }

        fn start_oneshot(&mut self, ticks: u32) {
            self.0.borrow_mut().program = Program::Oneshot(ticks);
        }

        fn start_secondary(&mut self, ticks: u32) {
            self.0.borrow_mut().secondary = Some(ticks);
        }

        fn stop_secondary(&mut self) {
            self.0.borrow_mut().secondary = None;
        }

        fn tick_freq(&self) -> u32 {
            FREQ
        }
    }

    fn driver() -> (CecDriver<SimLine, SimTimer>, SimLine, SimTimer) {
        let line = SimLine::new();
        let timer = SimTimer::new();
        let driver = CecDriver::new(line.clone(), timer.clone());
        (driver, line, timer)
    }

    /// Injects a capture edge after `low_us` microseconds of measured pulse.
    fn edge(d: &mut CecDriver<SimLine, SimTimer>, timer: &SimTimer, pulse_us: u32) {
        timer.set_elapsed(us(pulse_us));
        d.interrupt(IsrEvents::CAPTURE);
    }

    /// Feeds one valid data bit (low pulse then combined-duration check).
    fn feed_bit(d: &mut CecDriver<SimLine, SimTimer>, timer: &SimTimer, bit: bool) {
        edge(d, timer, if bit { 600 } else { 1500 });
        edge(d, timer, if bit { 1800 } else { 900 });
    }

    /// Feeds a valid start bit and a full header byte to a follower.
    fn feed_header(d: &mut CecDriver<SimLine, SimTimer>, timer: &SimTimer, header: u8) {
        d.interrupt(IsrEvents::CAPTURE); // falling edge while idle
        assert_eq!(d.state(), CecState::FollowerStartLow);
        edge(d, timer, 3700);
        edge(d, timer, 800);
        assert_eq!(d.state(), CecState::FollowerHeaderInitLow);
        for i in 0..8 {
            feed_bit(d, timer, header & (0x80 >> i) != 0);
        }
    }

    /// Walks a follower through EOM, ACK low, ACK verify, ACK finish.
    fn feed_eom_and_ack(d: &mut CecDriver<SimLine, SimTimer>, timer: &SimTimer, eom: bool) {
        feed_bit(d, timer, eom);
        assert_eq!(d.state(), CecState::FollowerAckLow);
        d.interrupt(IsrEvents::TIMEOUT); // safe sample point
        assert_eq!(d.state(), CecState::FollowerAckVerify);
        d.interrupt(IsrEvents::TIMEOUT); // release point
    }

    /// Runs an initiator until it returns to idle, collecting the frame
    /// bits it drove and counting free-time sightings (= attempts).
    /// `acked` controls whether the far end pulls ACK low at sample time.
    fn run_initiator(
        d: &mut CecDriver<SimLine, SimTimer>,
        line: &SimLine,
        timer: &SimTimer,
        acked: bool,
    ) -> (Vec<bool>, u32) {
        let mut bits = Vec::new();
        let mut attempts = 0;
        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 10_000, "initiator never returned to idle");
            match d.state() {
                CecState::Idle | CecState::Disabled => break,
                CecState::InitiatorFreeTime => {
                    attempts += 1;
                    d.interrupt(IsrEvents::TIMEOUT);
                }
                CecState::InitiatorHeaderInitLow
                | CecState::InitiatorHeaderDestLow
                | CecState::InitiatorDataLow => {
                    bits.push(timer.last_oneshot() == us(600));
                    d.interrupt(IsrEvents::TIMEOUT);
                }
                CecState::InitiatorAckHigh => {
                    line.set_bus(!acked);
                    d.interrupt(IsrEvents::TIMEOUT);
                    line.set_bus(true);
                }
                _ => d.interrupt(IsrEvents::TIMEOUT),
            }
        }
        (bits, attempts)
    }

    fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
        bits.chunks(8)
            .map(|byte| byte.iter().fold(0u8, |acc, &b| acc << 1 | b as u8))
            .collect()
    }

    #[test]
    fn starts_disabled_with_line_released() {
        let (d, line, _timer) = driver();
        assert_eq!(d.state(), CecState::Disabled);
        assert!(!d.is_enabled());
        assert_eq!(line.drives(), vec![true]);
    }

    #[test]
    fn new_with_mock_pin_releases_the_line() {
        use embedded_hal_mock::eh1::digital::{
            Mock as PinMock, State as PinState, Transaction as PinTransaction,
        };

        let pin = PinMock::new(&[PinTransaction::set(PinState::High)]);
        let mut d = CecDriver::new(pin, SimTimer::new());
        assert!(!d.is_enabled());
        d.line.done();
    }

    #[test]
    fn enable_arms_first_start_bit_capture() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        assert_eq!(d.state(), CecState::Idle);
        assert!(d.is_enabled());
        assert_eq!(
            timer.program(),
            Program::Capture {
                edge: CapEdge::Falling,
                timeout: 0
            }
        );
    }

    #[test]
    fn enable_rejects_bad_address() {
        let (mut d, _line, _timer) = driver();
        assert_eq!(d.enable(16), Err(CecError::InvalidAddress));
        assert!(!d.is_enabled());
    }

    #[test]
    fn enable_twice_is_a_noop() {
        let (mut d, _line, _timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        assert_eq!(d.send(&[0x45]), Ok(()));
        assert_eq!(d.enable(5), Ok(()));
        // The queued frame survived the second enable
        assert_eq!(d.tx.len, 1);
    }

    #[test]
    fn disable_zeroes_everything() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        assert_eq!(d.send(&[0x45, 0x82]), Ok(()));
        d.disable();
        d.disable(); // idempotent
        assert!(!d.is_enabled());
        assert_eq!(d.tx.len, 0);
        assert!(d.take_events().is_empty());
        assert!(d.receive().is_none());
        assert_eq!(timer.secondary(), None);
        assert_eq!(d.send(&[0x45]), Err(CecError::Disabled));
    }

    #[test]
    fn send_validates_frames() {
        let (mut d, _line, _timer) = driver();
        assert_eq!(d.send(&[0x45]), Err(CecError::Disabled));
        assert_eq!(d.enable(4), Ok(()));
        assert_eq!(d.send(&[]), Err(CecError::InvalidLength));
        assert_eq!(d.send(&[0u8; 17]), Err(CecError::InvalidLength));
    }

    #[test]
    fn send_is_busy_while_a_frame_is_queued() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(4), Ok(()));
        assert_eq!(d.send(&[0x45, 0x36]), Ok(()));
        assert_eq!(d.send(&[0x45, 0x36]), Err(CecError::Busy));
        // The request only armed the secondary timer; no state change yet
        assert_eq!(d.state(), CecState::Idle);
        assert_eq!(timer.secondary(), Some(0));
    }

    #[test]
    fn receives_directed_frame_and_acks_once() {
        let (mut d, line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        let drives_before = line.drives().len();

        // Header 0x15: initiator 1, destination 5 (us), EOM set
        feed_header(&mut d, &timer, 0x15);
        assert_eq!(d.state(), CecState::FollowerEomLow);
        feed_eom_and_ack(&mut d, &timer, true);
        assert_eq!(d.state(), CecState::FollowerAckFinish);
        d.interrupt(IsrEvents::TIMEOUT);
        assert_eq!(d.state(), CecState::Idle);

        assert!(d.take_events().contains(CecEvents::FRAME_RECEIVED));
        let frame = d.receive().expect("frame was delivered");
        assert_eq!(frame.data(), &[0x15]);
        assert!(d.receive().is_none());

        // Exactly one low drive: the ACK assertion
        let acks = line.drives()[drives_before..]
            .iter()
            .filter(|&&level| !level)
            .count();
        assert_eq!(acks, 1);
    }

    #[test]
    fn receives_two_byte_frame_bit_for_bit() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));

        feed_header(&mut d, &timer, 0x05);
        feed_eom_and_ack(&mut d, &timer, false); // more bytes follow
        assert_eq!(d.state(), CecState::FollowerAckFinish);
        edge(&mut d, &timer, 0); // falling edge of the next byte's first bit
        assert_eq!(d.state(), CecState::FollowerDataLow);
        for i in 0..8 {
            feed_bit(&mut d, &timer, 0x82 & (0x80 >> i) != 0);
        }
        feed_eom_and_ack(&mut d, &timer, true);
        d.interrupt(IsrEvents::TIMEOUT);

        let frame = d.receive().expect("frame was delivered");
        assert_eq!(frame.data(), &[0x05, 0x82]);
    }

    #[test]
    fn ignores_frames_for_other_addresses() {
        let (mut d, line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        let drives_before = line.drives().len();

        // Destination 3, not us and not broadcast
        feed_header(&mut d, &timer, 0x13);
        feed_bit(&mut d, &timer, true); // EOM
        assert_eq!(d.state(), CecState::FollowerAckLow);
        d.interrupt(IsrEvents::TIMEOUT);
        d.interrupt(IsrEvents::TIMEOUT);
        d.interrupt(IsrEvents::TIMEOUT);
        assert_eq!(d.state(), CecState::Idle);

        assert!(d.take_events().is_empty());
        assert!(d.receive().is_none());
        assert!(line.drives()[drives_before..].iter().all(|&level| level));
    }

    #[test]
    fn receives_broadcast_without_acking() {
        let (mut d, line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        let drives_before = line.drives().len();

        feed_header(&mut d, &timer, 0x1f);
        feed_eom_and_ack(&mut d, &timer, true);
        assert_eq!(d.state(), CecState::FollowerAckFinish);
        d.interrupt(IsrEvents::TIMEOUT);

        let frame = d.receive().expect("broadcast was delivered");
        assert_eq!(frame.data(), &[0x1f]);
        // We never pulled the line low during the ACK window
        let acks_after_header = line.drives()[drives_before..]
            .iter()
            .filter(|&&level| !level)
            .count();
        assert_eq!(acks_after_header, 0);
    }

    #[test]
    fn broadcast_nak_abandons_the_frame() {
        let (mut d, line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));

        feed_header(&mut d, &timer, 0x1f);
        feed_bit(&mut d, &timer, true); // EOM
        assert_eq!(d.state(), CecState::FollowerAckLow);
        // Another follower is pulling the line low at the sample point
        line.set_bus(false);
        d.interrupt(IsrEvents::TIMEOUT);
        assert_eq!(d.state(), CecState::FollowerAckVerify);
        line.set_bus(true);
        d.interrupt(IsrEvents::TIMEOUT);

        assert_eq!(d.state(), CecState::Idle);
        assert!(d.receive().is_none());
        assert!(d.take_events().is_empty());
    }

    #[test]
    fn invalid_timing_recovers_to_idle() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));

        d.interrupt(IsrEvents::CAPTURE);
        assert_eq!(d.state(), CecState::FollowerStartLow);
        edge(&mut d, &timer, 1000); // nothing like a start bit
        assert_eq!(d.state(), CecState::Idle);

        // Mid-header violation as well
        feed_header(&mut d, &timer, 0x15);
        edge(&mut d, &timer, 2500); // between the two data low windows
        assert_eq!(d.state(), CecState::Idle);
    }

    #[test]
    fn stalled_follower_times_out_to_idle() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        d.interrupt(IsrEvents::CAPTURE);
        edge(&mut d, &timer, 3700);
        assert_eq!(d.state(), CecState::FollowerStartHigh);
        d.interrupt(IsrEvents::TIMEOUT);
        assert_eq!(d.state(), CecState::Idle);
    }

    #[test]
    fn capture_takes_precedence_over_stale_timeout() {
        let (mut d, _line, _timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        d.interrupt(IsrEvents {
            capture: true,
            timeout: true,
            secondary: false,
        });
        assert_eq!(d.state(), CecState::FollowerStartLow);
    }

    #[test]
    fn transmits_frame_bit_for_bit_and_reports_ok() {
        let (mut d, line, timer) = driver();
        assert_eq!(d.enable(4), Ok(()));
        assert_eq!(d.send(&[0x45, 0x36]), Ok(()));

        // Admission happens at interrupt level via the secondary timer
        assert_eq!(timer.secondary(), Some(0));
        d.interrupt(IsrEvents::SECONDARY);
        assert_eq!(d.state(), CecState::InitiatorFreeTime);
        assert_eq!(timer.secondary(), None);
        assert_eq!(timer.last_timeout(), 5 * us(2400));

        let (bits, attempts) = run_initiator(&mut d, &line, &timer, true);
        assert_eq!(attempts, 1);
        assert_eq!(bits_to_bytes(&bits), vec![0x45, 0x36]);
        assert!(d.take_events().contains(CecEvents::SEND_OK));
        // The frame is cleared; the next send is admitted immediately
        assert_eq!(d.send(&[0x45]), Ok(()));
    }

    #[test]
    fn unacked_send_retries_then_fails() {
        let (mut d, line, timer) = driver();
        assert_eq!(d.enable(0), Ok(()));
        assert_eq!(d.send(&[0x05, 0x82]), Ok(()));
        d.interrupt(IsrEvents::SECONDARY);

        // First attempt observes new-initiator free time
        assert_eq!(timer.last_timeout(), 5 * us(2400));
        d.interrupt(IsrEvents::TIMEOUT);
        let (_, more_attempts) = run_initiator(&mut d, &line, &timer, false);

        // 1 + CEC_MAX_RESENDS attempts in total (one consumed above)
        assert_eq!(1 + more_attempts, 6);
        assert!(d.take_events().contains(CecEvents::SEND_FAILED));
        assert_eq!(d.tx.len, 0);
        assert_eq!(d.send(&[0x05, 0x82]), Ok(()));
    }

    #[test]
    fn resend_uses_the_shorter_free_time() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(0), Ok(()));
        assert_eq!(d.send(&[0x05]), Ok(()));
        d.interrupt(IsrEvents::SECONDARY);
        assert_eq!(timer.last_timeout(), 5 * us(2400));

        // Drive one full unacked attempt, stopping at the next free time
        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 1000);
            d.interrupt(IsrEvents::TIMEOUT);
            if d.state() == CecState::InitiatorFreeTime {
                break;
            }
        }
        assert_eq!(d.tx.resends, 1);
        assert_eq!(timer.last_timeout(), 3 * us(2400));
    }

    #[test]
    fn broadcast_send_treats_quiet_bus_as_acked() {
        let (mut d, line, timer) = driver();
        assert_eq!(d.enable(4), Ok(()));
        // Destination 15: broadcast, nobody pulls the line low
        assert_eq!(d.send(&[0x4f, 0x36]), Ok(()));
        d.interrupt(IsrEvents::SECONDARY);
        let (bits, attempts) = run_initiator(&mut d, &line, &timer, false);
        assert_eq!(attempts, 1);
        assert_eq!(bits_to_bytes(&bits), vec![0x4f, 0x36]);
        assert!(d.take_events().contains(CecEvents::SEND_OK));
    }

    #[test]
    fn broadcast_send_nak_triggers_resend_path() {
        let (mut d, line, timer) = driver();
        assert_eq!(d.enable(4), Ok(()));
        assert_eq!(d.send(&[0x4f]), Ok(()));
        d.interrupt(IsrEvents::SECONDARY);
        // A follower pulling low during a broadcast ACK is a NAK
        let (_, attempts) = run_initiator(&mut d, &line, &timer, true);
        assert_eq!(attempts, 6);
        assert!(d.take_events().contains(CecEvents::SEND_FAILED));
    }

    #[test]
    fn arbitration_loss_postpones_the_send() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(1), Ok(()));
        assert_eq!(d.send(&[0x15, 0x44]), Ok(()));
        d.interrupt(IsrEvents::SECONDARY);
        assert_eq!(d.state(), CecState::InitiatorFreeTime);

        // Another initiator's start bit arrives during our free time
        d.interrupt(IsrEvents::CAPTURE);
        assert_eq!(d.state(), CecState::FollowerStartLow);
        assert_eq!(d.tx.len, 2);
        assert_eq!((d.tx.msgt.byte, d.tx.msgt.bit), (0, 0));

        // The competing frame turns out malformed; back to idle, where the
        // postponed send restarts as a fresh attempt (full free time)
        edge(&mut d, &timer, 1000);
        assert_eq!(d.state(), CecState::InitiatorFreeTime);
        assert_eq!(d.tx.resends, 0);
        assert_eq!(timer.last_timeout(), 5 * us(2400));
    }

    #[test]
    fn send_requested_mid_receive_waits_for_idle() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));

        // A receive is in flight
        d.interrupt(IsrEvents::CAPTURE);
        edge(&mut d, &timer, 3700);
        assert_eq!(d.state(), CecState::FollowerStartHigh);

        assert_eq!(d.send(&[0x51]), Ok(()));
        d.interrupt(IsrEvents::SECONDARY);
        // Not admitted: the receive still owns the bus
        assert_eq!(d.state(), CecState::FollowerStartHigh);

        // The receive collapses; the queued send is admitted from Idle
        edge(&mut d, &timer, 50_000);
        assert_eq!(d.state(), CecState::InitiatorFreeTime);
    }

    #[test]
    fn simultaneous_capture_and_send_request_prefers_receive() {
        let (mut d, _line, _timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        assert_eq!(d.send(&[0x51]), Ok(()));
        // Both the start-bit edge and the secondary timer fire in one ISR
        d.interrupt(IsrEvents {
            capture: true,
            timeout: false,
            secondary: true,
        });
        assert_eq!(d.state(), CecState::FollowerStartLow);
        assert_eq!(d.tx.len, 1);
    }

    #[test]
    fn rx_queue_drops_oldest_when_full() {
        let (mut d, _line, timer) = driver();
        assert_eq!(d.enable(5), Ok(()));
        for n in 0..(RX_QUEUE_DEPTH as u8 + 1) {
            feed_header(&mut d, &timer, 0x05);
            feed_eom_and_ack(&mut d, &timer, false);
            edge(&mut d, &timer, 0);
            for i in 0..8 {
                feed_bit(&mut d, &timer, n & (0x80 >> i) != 0);
            }
            feed_eom_and_ack(&mut d, &timer, true);
            d.interrupt(IsrEvents::TIMEOUT);
            assert_eq!(d.state(), CecState::Idle);
        }
        // Frame 0 was dropped; 1..=4 remain in order
        for n in 1..(RX_QUEUE_DEPTH as u8 + 1) {
            assert_eq!(d.receive().expect("queued frame").data(), &[0x05, n]);
        }
        assert!(d.receive().is_none());
    }
}
