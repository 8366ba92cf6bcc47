//! Logging macros.

/// Evaluates the given expression and logs the message at debug level together
/// with the time the evaluation took.
///
/// The message may contain formatting placeholders, which are filled by the
/// arguments following it.
#[macro_export]
macro_rules! with_timing_logging {
    ($message:expr $(,$arg:expr)*; $expression:expr) => {{
        let _start_time = ::std::time::Instant::now();
        let _result = $expression;
        if $crate::log_enabled!($crate::Level::Debug) {
            $crate::debug!(
                concat!($message, " took {:.3} ms")$(,$arg)*,
                _start_time.elapsed().as_secs_f64() * 1e3,
            );
        }
        _result
    }};
}

/// Logs the message at trace level before and after evaluating the given
/// expression, including the elapsed time in the second entry.
#[macro_export]
macro_rules! with_trace_logging {
    ($message:expr $(,$arg:expr)*; $expression:expr) => {{
        $crate::trace!(concat!("Begin: ", $message)$(,$arg)*);
        let _start_time = ::std::time::Instant::now();
        let _result = $expression;
        $crate::trace!(
            concat!("Done ({:.3} ms): ", $message),
            _start_time.elapsed().as_secs_f64() * 1e3
            $(,$arg)*
        );
        _result
    }};
}
