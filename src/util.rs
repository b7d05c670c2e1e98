#[cfg(all(test, not(loom)))]
macro_rules! test_dbg {
    ($e:expr) => {
        match $e {
            e => {
                tracing::debug!(
                    location = %core::panic::Location::caller(),
                    "{} = {:?}",
                    stringify!($e),
                    &e
                );
                e
            }
        }
    };
}

#[cfg(not(test))]
macro_rules! test_trace {
    ($($args:tt)+) => {};
}

#[cfg(test)]
macro_rules! test_trace {
    ($($args:tt)+) => {
        tracing::debug!(
            location = %core::panic::Location::caller(),
            $($args)+
        );
    };
}

/// An exponential backoff for idle workers.
///
/// Spins with `2^exp` pause instructions until the exponent saturates, then
/// yields the thread on every call.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    exp: u8,
    max: u8,
}

// === impl Backoff ===

impl Backoff {
    pub(crate) const DEFAULT_MAX_EXPONENT: u8 = 8;

    pub(crate) const fn new() -> Self {
        Self {
            exp: 0,
            max: Self::DEFAULT_MAX_EXPONENT,
        }
    }

    /// Back off once.
    #[inline]
    pub(crate) fn spin(&mut self) {
        if cfg!(loom) || self.exp >= self.max {
            crate::loom::thread::yield_now();
            return;
        }

        for _ in 0..(1u32 << self.exp) {
            core::hint::spin_loop();
        }
        self.exp += 1;
    }

    /// Returns `true` once the backoff has started yielding.
    #[cfg(all(test, not(loom)))]
    pub(crate) fn is_yielding(&self) -> bool {
        self.exp >= self.max
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.exp = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn core::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(all(test, not(loom)))]
pub(crate) fn trace_init() {
    use tracing_subscriber::filter::LevelFilter;
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}
