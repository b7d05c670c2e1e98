use std::io;

/// Errors returned by the [`Scheduler`](crate::Scheduler).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// [`Scheduler::run_main_thread`](crate::Scheduler::run_main_thread) was
    /// called while another thread was already driving the main worker.
    #[error("the main-thread worker is already being driven by another thread")]
    MainWorkerBusy,

    /// [`Scheduler::start_background`](crate::Scheduler::start_background) was
    /// called while the background workers were running.
    #[error("background workers are already running")]
    AlreadyRunning,

    /// The operating system refused to spawn a background worker thread.
    #[error("failed to spawn background worker {worker}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },

    /// One or more background workers panicked while running a job.
    #[error("background workers {workers:?} panicked")]
    WorkerPanicked { workers: Vec<usize> },
}
