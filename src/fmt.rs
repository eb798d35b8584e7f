//! Logging macros
//!
//! Messages go to `defmt` when that feature is enabled, otherwise to the
//! `log` facade. With neither feature the arguments are evaluated and
//! dropped.

#![allow(unused_macros)]

macro_rules! log_event {
    ($defmt:ident, $log:ident, $s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt")]
        ::defmt::$defmt!($s $(, $x)*);
        #[cfg(all(feature = "log", not(feature = "defmt")))]
        ::log::$log!($s $(, $x)*);
        #[cfg(not(any(feature = "log", feature = "defmt")))]
        let _ = ($(&$x),*);
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { log_event!(trace, trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { log_event!(debug, debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_event!(info, info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_event!(warn, warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_event!(error, error, $($arg)*) };
}
