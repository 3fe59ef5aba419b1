/// Declares a static global `CEC_DRIVER` instance protected by a
/// `critical_section` mutex.
///
/// This macro creates a `static` singleton `CEC_DRIVER` suitable for use in
/// interrupt-based environments, where both the main thread and the timer ISR
/// need to safely access the shared driver state.
///
/// # Arguments
/// - `$line`: The concrete type of the CEC line pin (must implement
///   `OutputPin + InputPin`)
/// - `$tmr`: The concrete type of the capture timer (must implement
///   [`CecTimer`](crate::timer::CecTimer))
///
/// # Example
/// ```ignore
/// init_cec_driver!(MyCecLineType, MyCaptureTimerType);
/// ```
#[macro_export]
macro_rules! init_cec_driver {
    ( $line:ty, $tmr:ty ) => {
        pub static CEC_DRIVER: $crate::critical_section::Mutex<
            core::cell::RefCell<Option<$crate::driver::CecDriver<$line, $tmr>>>,
        > = $crate::critical_section::Mutex::new(core::cell::RefCell::new(None));
    };
}

/// Initializes the global `CEC_DRIVER` singleton with a new driver instance.
///
/// Wraps construction of the `CecDriver` and stores it inside the globally
/// declared `CEC_DRIVER` created by `init_cec_driver!`.
///
/// # Arguments
/// - `$line`: The CEC line pin variable
/// - `$tmr`: The capture timer variable
///
/// # Example
/// ```ignore
/// fn main() {
///     setup_cec_driver!(line, timer);
/// }
/// ```
///
/// # Notes
/// - Must be called before enabling the timer interrupt.
/// - Requires `init_cec_driver!` to have been used earlier.
#[macro_export]
macro_rules! setup_cec_driver {
    ( $line:ident, $tmr:ident ) => {
        $crate::critical_section::with(|cs| {
            CEC_DRIVER
                .borrow(cs)
                .replace(Some($crate::driver::CecDriver::new($line, $tmr)));
        });
    };
}

/// Forwards pending interrupt causes to the global `CEC_DRIVER`.
///
/// # Arguments
/// - `$events`: An [`IsrEvents`](crate::timer::IsrEvents) value read from the
///   peripheral's pending flags
///
/// # Example
/// ```ignore
/// #[interrupt]
/// fn MFT1() {
///     let events = read_and_clear_pending();
///     cec_isr!(events);
/// }
/// ```
#[macro_export]
macro_rules! cec_isr {
    ( $events:expr ) => {
        $crate::critical_section::with(|cs| {
            if let Some(driver) = CEC_DRIVER.borrow(cs).borrow_mut().as_mut() {
                driver.interrupt($events);
            }
        });
    };
}
