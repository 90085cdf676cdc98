//! Logging hooks.
//!
//! With the `tracing` feature enabled these forward to the `tracing` crate;
//! without it they expand to nothing, so the hot paths carry no logging cost.

/// Emits a `TRACE`-level event (anchor lifecycle, slot detaches).
macro_rules! trace_event {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        ::tracing::trace!($($arg)*);
    }};
}

/// Emits a `DEBUG`-level event (worker lifecycle).
macro_rules! debug_event {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        ::tracing::debug!($($arg)*);
    }};
}

pub(crate) use debug_event;
pub(crate) use trace_event;
