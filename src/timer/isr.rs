use crate::driver::{CecDriver, CecEvents};
use crate::timer::{CecTimer, IsrEvents};
use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal::digital::{InputPin, OutputPin};

/// Used to initialize the global static `CecDriver` for use with
/// `critical_section`.
///
/// # Returns
/// * An empty mutable ref-cell
///
/// # Example
/// ```ignore
/// use hdmi_cec::driver::CecDriver;
/// use hdmi_cec::timer::global_cec_driver_init;
/// use core::cell::RefCell;
/// use critical_section::Mutex;
/// use some_hal::{CecLine, CecCaptureTimer};
///
/// static CEC_DRIVER: Mutex<RefCell<Option<CecDriver<CecLine, CecCaptureTimer>>>> =
///     global_cec_driver_init::<CecLine, CecCaptureTimer>();
/// ```
pub const fn global_cec_driver_init<LINE: OutputPin + InputPin, TMR: CecTimer>()
-> Mutex<RefCell<Option<CecDriver<LINE, TMR>>>> {
    Mutex::new(RefCell::new(None))
}

/// Places a newly constructed driver into the global singleton.
///
/// # Arguments
/// * The global static `CecDriver`
/// * The open-drain CEC line pin
/// * The capture timer implementation
///
/// # Example
/// ```ignore
/// fn main() {
///     global_cec_driver_setup(&CEC_DRIVER, line, timer);
/// }
/// ```
pub fn global_cec_driver_setup<LINE: OutputPin + InputPin, TMR: CecTimer>(
    global_driver: &'static Mutex<RefCell<Option<CecDriver<LINE, TMR>>>>,
    line: LINE,
    timer: TMR,
) {
    critical_section::with(|cs| {
        let _ = global_driver
            .borrow(cs)
            .replace(Some(CecDriver::new(line, timer)));
    });
}

/// Forwards one set of pending interrupt causes to the global driver.
///
/// Call this from the timer interrupt handler after reading and clearing
/// the peripheral's pending-event flags.
///
/// # Example
/// ```ignore
/// #[interrupt]
/// fn MFT1() {
///     let events = read_and_clear_pending();
///     global_cec_isr(&CEC_DRIVER, events);
/// }
/// ```
pub fn global_cec_isr<LINE: OutputPin + InputPin, TMR: CecTimer>(
    global_driver: &'static Mutex<RefCell<Option<CecDriver<LINE, TMR>>>>,
    events: IsrEvents,
) {
    critical_section::with(|cs| {
        if let Some(driver) = global_driver.borrow(cs).borrow_mut().as_mut() {
            driver.interrupt(events);
        }
    });
}

/// Atomically drains the global driver's pending outward events.
///
/// Safe to call from thread context while the ISR keeps producing; returns
/// an empty set when the driver has not been set up yet.
pub fn global_cec_take_events<LINE: OutputPin + InputPin, TMR: CecTimer>(
    global_driver: &'static Mutex<RefCell<Option<CecDriver<LINE, TMR>>>>,
) -> CecEvents {
    critical_section::with(|cs| {
        global_driver
            .borrow(cs)
            .borrow()
            .as_ref()
            .map(|driver| driver.take_events())
            .unwrap_or_default()
    })
}
