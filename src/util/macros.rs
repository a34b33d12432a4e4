/// Check an internal invariant of the collector.
///
/// A violation means a bug in the collector.  Debug builds stop at the violation.  Release builds
/// log it and let the caller skip the offending operation, so a bug degrades into a leak instead
/// of heap corruption.  The macro evaluates to `true` if the invariant holds.
#[macro_export]
macro_rules! gc_invariant {
    ($cond:expr, $($arg:tt)+) => {{
        let holds: bool = $cond;
        if !holds {
            debug_assert!(holds, $($arg)+);
            error!("Invariant violated: {}", format_args!($($arg)+));
        }
        holds
    }};
}
