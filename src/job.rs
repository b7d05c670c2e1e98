//! Jobs and the handles that track them.
use crate::{
    graph::GraphId,
    loom::sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering::*},
        Arc, Mutex,
    },
};
use core::{fmt, panic::Location};

mod builder;
pub use self::builder::JobBuilder;

/// A unit of work.
///
/// A job is executed exactly once, by whichever worker dequeues it, and then
/// dropped. Every `FnOnce() + Send + 'static` closure is a `Job`.
pub trait Job: Send + 'static {
    /// Runs the job to completion.
    fn execute(self: Box<Self>);
}

/// The identity of a scheduled job.
///
/// Ids are unique among the jobs a scheduler is currently tracking. Once a
/// job completes its slot may be reused, but the reused id carries a new
/// generation, so it never compares equal to the old one.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct JobId {
    index: u32,
    generation: u32,
}

/// The lifecycle state of a scheduled job.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum JobStatus {
    /// The job still has dependencies that have not completed.
    Waiting = 0,
    /// The job is runnable and sits in a worker's queue.
    Queued = 1,
    /// A worker is executing the job.
    Running = 2,
    /// The job ran to completion.
    Complete = 3,
    /// The job panicked, and the scheduler's [`PanicPolicy`] isolated the
    /// panic.
    ///
    /// [`PanicPolicy`]: crate::PanicPolicy
    Panicked = 4,
}

/// A handle to a scheduled job.
///
/// Handles are cheap to clone. They are used to declare dependencies between
/// jobs, and to observe a job's [`JobStatus`].
#[derive(Clone)]
pub struct JobHandle(pub(crate) Arc<JobNode>);

/// A node in the dependency graph.
pub(crate) struct JobNode {
    /// The graph that issued `id`.
    pub(crate) graph: GraphId,
    pub(crate) id: JobId,
    /// Creation order, used to check that dependencies are acyclic.
    pub(crate) seq: u64,
    pub(crate) settings: Settings,
    /// Dependencies that have not yet completed, plus one while the job is
    /// still being registered.
    pending: AtomicUsize,
    status: AtomicU8,
    job: Mutex<Option<Box<dyn Job>>>,
    pub(crate) edges: Mutex<Edges>,
}

/// Per-job settings, fixed when the job is scheduled.
#[derive(Clone, Debug)]
pub(crate) struct Settings {
    pub(crate) name: Option<Box<str>>,
    pub(crate) requires_main_thread: bool,
    pub(crate) location: Option<&'static Location<'static>>,
}

/// The outgoing edges of a node, guarded together with its completion flag.
///
/// A dependent that registers while holding this lock either sees `complete`
/// or is guaranteed to be notified by the completing worker.
#[derive(Debug, Default)]
pub(crate) struct Edges {
    pub(crate) complete: bool,
    pub(crate) awaited_by: Vec<JobId>,
}

// === impl Job ===

impl<F> Job for F
where
    F: FnOnce() + Send + 'static,
{
    #[inline]
    fn execute(self: Box<Self>) {
        (*self)()
    }
}

// === impl JobId ===

impl JobId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

// === impl JobStatus ===

impl JobStatus {
    fn from_u8(status: u8) -> Self {
        match status {
            0 => Self::Waiting,
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Complete,
            4 => Self::Panicked,
            bits => unreachable!("invalid job status {bits:#x}; this is a bug in `hyphae`!"),
        }
    }

    /// Returns `true` if the job has finished running, with or without a
    /// panic.
    #[inline]
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Panicked)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Panicked => "panicked",
        };
        f.pad(s)
    }
}

// === impl JobHandle ===

impl JobHandle {
    /// Returns this job's [`JobId`].
    #[inline]
    #[must_use]
    pub fn id(&self) -> JobId {
        self.0.id
    }

    /// Returns this job's name, if it was given one.
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.settings.name.as_deref()
    }

    /// Returns `true` if this job may only run on the main thread.
    #[inline]
    #[must_use]
    pub fn requires_main_thread(&self) -> bool {
        self.0.settings.requires_main_thread
    }

    /// Returns the location this job was scheduled from.
    #[must_use]
    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.0.settings.location
    }

    /// Returns the job's current status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.0.status()
    }

    /// Returns `true` once the job has finished running, whether or not it
    /// panicked.
    ///
    /// Dependents of this job are released no earlier than this becomes
    /// `true`.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status().is_finished()
    }

    /// Returns the number of this job's dependencies that have not yet
    /// completed. Advisory.
    #[must_use]
    pub fn pending_dependencies(&self) -> usize {
        // the registration guard has always been released by the time the
        // caller holds a handle.
        self.0.pending.load(Acquire)
    }

    #[inline]
    pub(crate) fn node(&self) -> &JobNode {
        &self.0
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let JobNode {
            id,
            settings,
            pending,
            status,
            ..
        } = &*self.0;
        f.debug_struct("JobHandle")
            .field("id", id)
            .field("name", &settings.name)
            .field("requires_main_thread", &settings.requires_main_thread)
            .field("status", &JobStatus::from_u8(status.load(Acquire)))
            .field("pending", &pending.load(Acquire))
            .finish()
    }
}

impl PartialEq for JobHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for JobHandle {}

// === impl JobNode ===

impl JobNode {
    pub(crate) fn new(
        graph: GraphId,
        id: JobId,
        seq: u64,
        settings: Settings,
        job: Box<dyn Job>,
        dependencies: usize,
    ) -> Self {
        Self {
            graph,
            id,
            seq,
            settings,
            pending: AtomicUsize::new(dependencies + 1),
            status: AtomicU8::new(JobStatus::Waiting as u8),
            job: Mutex::new(Some(job)),
            edges: Mutex::new(Edges::default()),
        }
    }

    /// Releases `n` pending counts. Returns `true` if that made the job
    /// runnable.
    #[inline]
    pub(crate) fn release(&self, n: usize) -> bool {
        if n == 0 {
            return false;
        }
        let prev = self.pending.fetch_sub(n, AcqRel);
        debug_assert!(
            prev >= n,
            "job {} released {n} dependencies but only {prev} were pending",
            self.id
        );
        prev == n
    }

    #[inline]
    pub(crate) fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Acquire))
    }

    #[inline]
    pub(crate) fn set_status(&self, status: JobStatus) {
        self.status.store(status as u8, Release);
    }

    /// Takes the job out of the node. Returns `None` if it was already taken.
    pub(crate) fn take_job(&self) -> Option<Box<dyn Job>> {
        self.job.lock().take()
    }
}

// === impl Settings ===

impl Settings {
    pub(crate) const fn new() -> Self {
        Self {
            name: None,
            requires_main_thread: false,
            location: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}
