//! The job scheduler.
//!
//! A [`Scheduler`] owns one *main-thread* worker and a configurable number of
//! *background* workers. Each background worker runs on its own OS thread,
//! started by [`Scheduler::start_background`]; the main-thread worker only
//! runs when the host calls [`Scheduler::run_main_thread`] from its own
//! thread.
//!
//! Jobs become runnable once every job they depend on has completed. A
//! runnable job is *placed* on a worker:
//!
//! - jobs that [require the main thread] go to the main-thread worker,
//! - every other job goes to the next background worker in round-robin
//!   order, or to the main-thread worker if there are no background workers.
//!
//! Idle background workers steal from each other's deques.
//!
//! [require the main thread]: crate::JobBuilder::main_thread
use crate::{
    cancel::CancelToken,
    error::Error,
    graph::{Inserted, JobGraph},
    job::{Job, JobBuilder, JobHandle, JobId, JobStatus, Settings},
    loom::sync::{
        atomic::{AtomicUsize, Ordering::*},
        Arc, Mutex,
    },
    util::panic_message,
    worker::{JobWorker, WorkerKind},
};
use core::fmt;
use rhizome::TryStealError;
use std::{
    panic::{self, AssertUnwindSafe},
    thread,
};

mod builder;
pub use self::builder::{Builder, PanicPolicy};


/// A multi-threaded job scheduler.
///
/// See the [module-level documentation](self) for details.
pub struct Scheduler {
    core: Arc<Core>,
    running: Mutex<Option<Running>>,
    thread_name: String,
    stack_size: Option<usize>,
}

/// Metrics recorded by one run of a worker loop.
///
/// Returned by [`Scheduler::run_main_thread`], and logged by background
/// workers when they stop.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct Tick {
    /// The number of jobs executed by this run.
    pub executed: usize,

    /// The number of jobs moved from the worker's mailbox onto its deque.
    pub received: usize,

    /// The number of jobs stolen from other workers.
    ///
    /// This is always 0 for the main-thread worker, which never steals.
    pub stolen: usize,

    /// The number of executed jobs that panicked.
    ///
    /// Only non-zero under [`PanicPolicy::Isolate`]; with the default policy,
    /// a panic ends the run instead.
    pub panicked: usize,

    /// `true` if the run ended because its [`CancelToken`] was cancelled.
    pub cancelled: bool,

    /// `true` if the run ended with jobs remaining in the worker's queues.
    pub has_remaining: bool,
}

/// State shared between the scheduler and its worker threads.
pub(crate) struct Core {
    graph: JobGraph,
    main: JobWorker,
    background: Box<[JobWorker]>,
    next_background: AtomicUsize,
    panic_policy: PanicPolicy,
}

struct Running {
    cancel: CancelToken,
    threads: Vec<(usize, thread::JoinHandle<()>)>,
}

// === impl Scheduler ===

impl Scheduler {
    /// Returns a new scheduler with the default configuration.
    ///
    /// The background workers are not started until
    /// [`start_background`](Self::start_background) is called.
    #[must_use]
    pub fn new() -> Self {
        Builder::new().build()
    }

    /// Returns a [`Builder`] for configuring a scheduler.
    #[must_use]
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn from_builder(builder: Builder) -> Self {
        let Builder {
            background_workers,
            thread_name,
            stack_size,
            deque_capacity,
            panic_policy,
        } = builder;
        let background_workers =
            background_workers.unwrap_or_else(builder::default_background_workers);
        let core = Core {
            graph: JobGraph::new(),
            main: JobWorker::main(deque_capacity),
            background: (0..background_workers)
                .map(|index| JobWorker::background(index, deque_capacity))
                .collect(),
            next_background: AtomicUsize::new(0),
            panic_policy,
        };
        Self {
            core: Arc::new(core),
            running: Mutex::new(None),
            thread_name,
            stack_size,
        }
    }

    /// Schedules `job`.
    ///
    /// The job runs once every job in `depends_on` has completed. If
    /// `requires_main_thread` is `true`, it only ever runs inside
    /// [`run_main_thread`](Self::run_main_thread).
    ///
    /// Returns a [`JobHandle`] that later jobs can depend on.
    ///
    /// # Panics
    ///
    /// If any handle in `depends_on` was returned by a different scheduler.
    #[track_caller]
    pub fn schedule(
        &self,
        job: impl Job,
        requires_main_thread: bool,
        depends_on: &[JobHandle],
    ) -> JobHandle {
        self.build_job()
            .main_thread(requires_main_thread)
            .depends_on(depends_on)
            .schedule(job)
    }

    /// Schedules `job` with no dependencies, to run on any worker.
    #[track_caller]
    pub fn spawn(&self, job: impl Job) -> JobHandle {
        self.build_job().schedule(job)
    }

    /// Returns a [`JobBuilder`] for configuring a job before scheduling it.
    #[must_use]
    pub fn build_job(&self) -> JobBuilder<'_> {
        JobBuilder::new(self)
    }

    /// Runs the main-thread worker on the calling thread.
    ///
    /// Executes jobs until both the main-thread worker's deque and mailbox are
    /// empty, or until `cancel` is cancelled. The main-thread worker never
    /// steals from the background workers, but it does run jobs released by
    /// the jobs it executes.
    ///
    /// # Errors
    ///
    /// [`Error::MainWorkerBusy`] if another thread is currently running the
    /// main-thread worker.
    ///
    /// # Panics
    ///
    /// With [`PanicPolicy::Propagate`], a panicking job's panic propagates out
    /// of this method. The main-thread worker remains usable afterwards.
    pub fn run_main_thread(&self, cancel: &CancelToken) -> Result<Tick, Error> {
        let span = tracing::debug_span!("run_main_thread");
        let _entered = span.enter();
        let tick = self
            .core
            .main
            .run(&self.core, cancel)
            .ok_or(Error::MainWorkerBusy)?;
        tracing::trace!(?tick, "main-thread worker returned");
        Ok(tick)
    }

    /// Spawns one OS thread per background worker.
    ///
    /// Jobs that were placed on a background worker while the workers were
    /// stopped run once they start.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if the background workers are running.
    /// - [`Error::Spawn`] if a thread could not be spawned. Any workers that
    ///   were already started are stopped again.
    pub fn start_background(&self) -> Result<(), Error> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let cancel = CancelToken::new();
        let mut threads = Vec::with_capacity(self.core.background.len());
        for index in 0..self.core.background.len() {
            let mut builder =
                thread::Builder::new().name(format!("{}-{index}", self.thread_name));
            if let Some(stack_size) = self.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let core = self.core.clone();
            let worker_cancel = cancel.clone();
            match builder.spawn(move || core.run_background(index, &worker_cancel)) {
                Ok(thread) => threads.push((index, thread)),
                Err(source) => {
                    tracing::error!(worker = index, %source, "failed to spawn background worker");
                    cancel.cancel();
                    for (_, thread) in threads {
                        let _ = thread.join();
                    }
                    return Err(Error::Spawn {
                        worker: index,
                        source,
                    });
                }
            }
        }

        tracing::info!(
            workers = threads.len(),
            thread_name = %self.thread_name,
            "started background workers"
        );
        *running = Some(Running { cancel, threads });
        Ok(())
    }

    /// Stops the background workers and waits for their threads to exit.
    ///
    /// Workers finish the job they are currently executing; jobs still queued
    /// stay queued, and run after the next call to
    /// [`start_background`](Self::start_background). Calling this while the
    /// workers are stopped does nothing.
    ///
    /// # Errors
    ///
    /// [`Error::WorkerPanicked`] listing the workers whose thread was ended by
    /// a panicking job. Every thread has been joined either way.
    pub fn stop_background(&self) -> Result<(), Error> {
        let mut running = self.running.lock();
        let Some(Running { cancel, threads }) = running.take() else {
            return Ok(());
        };

        cancel.cancel();
        let mut panicked = Vec::new();
        for (index, thread) in threads {
            if thread.join().is_err() {
                panicked.push(index);
            }
        }

        tracing::info!(
            workers = self.core.background.len(),
            panicked = panicked.len(),
            "stopped background workers"
        );
        if panicked.is_empty() {
            Ok(())
        } else {
            Err(Error::WorkerPanicked { workers: panicked })
        }
    }

    /// Returns `true` if the background workers have been started and not
    /// stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Returns the number of background workers.
    #[must_use]
    pub fn background_workers(&self) -> usize {
        self.core.background.len()
    }

    /// Returns the number of runnable jobs waiting in worker queues. Advisory.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.core.main.queued()
            + self
                .core
                .background
                .iter()
                .map(JobWorker::queued)
                .sum::<usize>()
    }

    /// Returns the number of jobs that have been scheduled and have not yet
    /// completed, including jobs still waiting on dependencies.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.core.graph.len()
    }

    /// Returns the handle of the job with the given id, if it has not yet
    /// completed.
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<JobHandle> {
        self.core.graph.get(id)
    }

    #[inline]
    pub(crate) fn core(&self) -> &Core {
        &self.core
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(error) = self.stop_background() {
            tracing::warn!(%error, "background workers panicked before the scheduler was dropped");
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self.running.try_lock().map(|running| running.is_some());
        f.debug_struct("Scheduler")
            .field("core", &self.core)
            .field("running", &running)
            .field("thread_name", &self.thread_name)
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

// === impl Core ===

impl Core {
    pub(crate) fn schedule(
        &self,
        job: Box<dyn Job>,
        settings: Settings,
        depends_on: &[JobHandle],
    ) -> JobHandle {
        let Inserted { handle, runnable } = self.graph.insert(job, settings, depends_on);
        if runnable {
            self.place(handle.clone());
        } else {
            tracing::debug!(
                job.id = %handle.id(),
                job.name = handle.name(),
                dependencies = depends_on.len(),
                "job waiting on dependencies"
            );
        }
        handle
    }

    /// Puts a runnable job on the worker that should run it.
    fn place(&self, job: JobHandle) {
        let worker = if job.requires_main_thread() || self.background.is_empty() {
            &self.main
        } else {
            let next = self.next_background.fetch_add(1, Relaxed);
            &self.background[next % self.background.len()]
        };
        tracing::debug!(
            job.id = %job.id(),
            job.name = job.name(),
            worker = %worker.kind,
            "placed job"
        );
        job.node().set_status(JobStatus::Queued);
        worker.enqueue(job);
    }

    /// Tries to steal a job from any background worker other than `thief`,
    /// starting with the worker after it.
    pub(crate) fn try_steal_from_any(&self, thief: WorkerKind) -> Option<JobHandle> {
        let workers = self.background.len();
        let start = thief.background_index().map_or(0, |index| index + 1);
        for offset in 0..workers {
            let victim = &self.background[(start + offset) % workers];
            if victim.kind == thief {
                continue;
            }
            match victim.stealer().try_steal() {
                Ok(job) => {
                    test_trace!(
                        thief = %thief,
                        victim = %victim.kind,
                        job.id = %job.id(),
                        "stole job"
                    );
                    return Some(job);
                }
                // another thread got there first; try the next victim, and
                // come back to this one on the next pass.
                Err(TryStealError::Contended) => {}
                Err(TryStealError::Empty) => {}
            }
        }
        None
    }

    /// Runs `job` on the current worker, then releases its dependents.
    pub(crate) fn execute(&self, worker: WorkerKind, job: JobHandle, tick: &mut Tick) {
        let Some(body) = job.node().take_job() else {
            debug_assert!(false, "job {} was executed twice", job.id());
            return;
        };

        let span = tracing::debug_span!(
            "job",
            job.id = %job.id(),
            job.name = job.name(),
            %worker,
        );
        let _entered = span.enter();

        job.node().set_status(JobStatus::Running);
        let status = match self.panic_policy {
            PanicPolicy::Propagate => {
                body.execute();
                JobStatus::Complete
            }
            PanicPolicy::Isolate => {
                match panic::catch_unwind(AssertUnwindSafe(move || body.execute())) {
                    Ok(()) => JobStatus::Complete,
                    Err(payload) => {
                        tracing::error!(
                            panic = panic_message(&*payload),
                            location = job.location().map(tracing::field::display),
                            "job panicked"
                        );
                        tick.panicked += 1;
                        JobStatus::Panicked
                    }
                }
            }
        };
        tick.executed += 1;
        job.node().set_status(status);

        self.on_complete(&job);
    }

    /// Releases every dependent for which `job` was the last outstanding
    /// dependency.
    fn on_complete(&self, job: &JobHandle) {
        let released = self.graph.complete(job);
        if !released.is_empty() {
            tracing::debug!(job.id = %job.id(), released = released.len(), "released dependents");
        }
        for dependent in released {
            self.place(dependent);
        }
    }

    fn run_background(&self, index: usize, cancel: &CancelToken) {
        let worker = &self.background[index];
        let span = tracing::info_span!("worker", worker = %worker.kind);
        let _entered = span.enter();

        tracing::info!("background worker started");
        match worker.run(self, cancel) {
            Some(tick) => tracing::info!(?tick, "background worker stopped"),
            None => tracing::error!("background worker is already running on another thread"),
        }
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("graph", &self.graph)
            .field("main", &self.main)
            .field("background", &self.background)
            .field("next_background", &self.next_background.load(Relaxed))
            .field("panic_policy", &self.panic_policy)
            .finish()
    }
}

#[cfg(test)]
fn assert_send_sync<T: Send + Sync>() {}

#[cfg(test)]
#[test]
fn scheduler_is_send_sync() {
    assert_send_sync::<Scheduler>();
    assert_send_sync::<JobHandle>();
    assert_send_sync::<CancelToken>();
}
