use crate::loom::sync::{
    atomic::{AtomicBool, Ordering::*},
    Arc,
};

/// A cooperative cancellation flag for worker loops.
///
/// Clones share the same flag. Workers check it between jobs; a job that is
/// already running is never interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Returns a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests that every worker loop observing this token stops.
    pub fn cancel(&self) {
        self.0.store(true, Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on this
    /// token or any of its clones.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Acquire)
    }
}
