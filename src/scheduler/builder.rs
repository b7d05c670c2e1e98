use super::Scheduler;
use rhizome::WorkStealingDeque;
use std::{num::NonZeroUsize, thread};

/// Configures a [`Scheduler`] prior to constructing it.
#[derive(Debug, Clone)]
#[must_use]
pub struct Builder {
    pub(super) background_workers: Option<usize>,
    pub(super) thread_name: String,
    pub(super) stack_size: Option<usize>,
    pub(super) deque_capacity: usize,
    pub(super) panic_policy: PanicPolicy,
}

/// What a worker does when a job panics.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum PanicPolicy {
    /// The panic unwinds out of the worker loop.
    ///
    /// Jobs that depend on the panicking job never run. A background worker
    /// that panics stops, and is reported by
    /// [`Scheduler::stop_background`]; a panic on the main-thread worker
    /// propagates out of [`Scheduler::run_main_thread`].
    #[default]
    Propagate,

    /// The panic is caught and logged, and the worker keeps running.
    ///
    /// The job's status becomes [`JobStatus::Panicked`], and jobs that depend
    /// on it are released as if it had completed.
    ///
    /// [`JobStatus::Panicked`]: crate::JobStatus::Panicked
    Isolate,
}

impl Builder {
    /// The prefix background worker threads are named with, unless
    /// [`thread_name`](Self::thread_name) sets another.
    pub const DEFAULT_THREAD_NAME: &'static str = "hyphae-worker";

    /// Returns a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            background_workers: None,
            thread_name: String::from(Self::DEFAULT_THREAD_NAME),
            stack_size: None,
            deque_capacity: WorkStealingDeque::<()>::DEFAULT_CAPACITY,
            panic_policy: PanicPolicy::Propagate,
        }
    }

    /// Sets the number of background workers.
    ///
    /// By default, one less than the [available parallelism] of the machine,
    /// so that the background workers and the main thread together occupy
    /// every core. With zero background workers, every job runs inside
    /// [`Scheduler::run_main_thread`].
    ///
    /// [available parallelism]: std::thread::available_parallelism
    pub fn background_workers(self, workers: usize) -> Self {
        Self {
            background_workers: Some(workers),
            ..self
        }
    }

    /// Sets the name prefix of background worker threads.
    ///
    /// Each thread is named `{prefix}-{index}`. By default, the prefix is
    /// [`Builder::DEFAULT_THREAD_NAME`].
    pub fn thread_name(self, prefix: impl Into<String>) -> Self {
        Self {
            thread_name: prefix.into(),
            ..self
        }
    }

    /// Sets the stack size of background worker threads, in bytes.
    ///
    /// By default, the platform's default for spawned threads is used.
    pub fn stack_size(self, bytes: usize) -> Self {
        Self {
            stack_size: Some(bytes),
            ..self
        }
    }

    /// Sets the initial capacity of each worker's deque.
    ///
    /// Deques grow as needed, so this only avoids early reallocations. The
    /// capacity is rounded up to a power of two.
    pub fn deque_capacity(self, capacity: usize) -> Self {
        Self {
            deque_capacity: capacity,
            ..self
        }
    }

    /// Sets the [`PanicPolicy`]. By default, [`PanicPolicy::Propagate`].
    pub fn panic_policy(self, panic_policy: PanicPolicy) -> Self {
        Self {
            panic_policy,
            ..self
        }
    }

    /// Builds the scheduler. Background workers are not started yet.
    #[must_use]
    pub fn build(self) -> Scheduler {
        Scheduler::from_builder(self)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

pub(super) fn default_background_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_sub(1)
}
