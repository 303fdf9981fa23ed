//! Logging macros
//!
//! With the `defmt` feature the messages go to `defmt`. Unit tests print them
//! to stdout; every other build drops them.

macro_rules! log_with {
    ($defmt:ident, $tag:literal, $($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::$defmt!($($arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        ::std::println!("[{}] {}", $tag, ::core::format_args!($($arg)*));

        #[cfg(all(not(feature = "defmt"), not(test)))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! log_error {
    ($($arg:tt)*) => { log_with!(error, "ERROR", $($arg)*) };
}

macro_rules! log_warn {
    ($($arg:tt)*) => { log_with!(warn, "WARN", $($arg)*) };
}

macro_rules! log_info {
    ($($arg:tt)*) => { log_with!(info, "INFO", $($arg)*) };
}

macro_rules! log_debug {
    ($($arg:tt)*) => { log_with!(debug, "DEBUG", $($arg)*) };
}
