use super::{Job, JobHandle, Settings};
use crate::Scheduler;
use core::panic::Location;

/// Configures a job prior to scheduling it.
///
/// Returned by [`Scheduler::build_job`].
#[derive(Debug)]
#[must_use]
pub struct JobBuilder<'s> {
    scheduler: &'s Scheduler,
    settings: Settings,
    dependencies: Vec<JobHandle>,
}

impl<'s> JobBuilder<'s> {
    pub(crate) fn new(scheduler: &'s Scheduler) -> Self {
        Self {
            scheduler,
            settings: Settings::new(),
            dependencies: Vec::new(),
        }
    }

    /// Names the job.
    ///
    /// The name is recorded as the `job.name` field of the job's `tracing`
    /// span. By default, jobs are unnamed.
    pub fn name(self, name: &str) -> Self {
        Self {
            settings: Settings {
                name: Some(name.into()),
                ..self.settings
            },
            ..self
        }
    }

    /// Sets whether the job may only run on the main thread.
    ///
    /// Main-thread jobs only run inside [`Scheduler::run_main_thread`], on the
    /// thread that calls it. By default, jobs run on any worker.
    pub fn main_thread(self, requires_main_thread: bool) -> Self {
        Self {
            settings: Settings {
                requires_main_thread,
                ..self.settings
            },
            ..self
        }
    }

    /// Makes the job wait until `dependency` has completed.
    pub fn after(mut self, dependency: &JobHandle) -> Self {
        self.dependencies.push(dependency.clone());
        self
    }

    /// Makes the job wait until every job in `dependencies` has completed.
    pub fn depends_on(mut self, dependencies: &[JobHandle]) -> Self {
        self.dependencies.extend_from_slice(dependencies);
        self
    }

    /// Overrides the job's source code location.
    ///
    /// By default, jobs are recorded as having the location from which they
    /// are scheduled.
    pub fn location(self, location: &'static Location<'static>) -> Self {
        Self {
            settings: Settings {
                location: Some(location),
                ..self.settings
            },
            ..self
        }
    }

    /// Schedules `job` with this builder's configured settings.
    ///
    /// If every dependency has already completed, the job is runnable
    /// immediately.
    ///
    /// # Panics
    ///
    /// If any dependency was scheduled on a different [`Scheduler`].
    #[track_caller]
    pub fn schedule(self, job: impl Job) -> JobHandle {
        let Self {
            scheduler,
            mut settings,
            dependencies,
        } = self;
        if settings.location.is_none() {
            settings.location = Some(Location::caller());
        }
        scheduler
            .core()
            .schedule(Box::new(job), settings, &dependencies)
    }
}
