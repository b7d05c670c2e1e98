//! Per-thread job workers.
use crate::{
    cancel::CancelToken,
    job::JobHandle,
    loom::sync::Mutex,
    scheduler::{Core, Tick},
    util::Backoff,
};
use core::{fmt, ops::Deref};
use rhizome::{Mailbox, Owner, Stealer, WorkStealingDeque};

/// Which of the scheduler's workers this is.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) enum WorkerKind {
    /// The worker driven by [`Scheduler::run_main_thread`].
    ///
    /// [`Scheduler::run_main_thread`]: crate::Scheduler::run_main_thread
    Main,
    /// A background worker, with its index among the background workers.
    Background(usize),
}

/// One worker: a work-stealing deque plus a mailbox of handed-off jobs.
pub(crate) struct JobWorker {
    pub(crate) kind: WorkerKind,
    /// The deque's owner, held by whichever thread is currently driving this
    /// worker.
    local: Mutex<Option<Owner<JobHandle>>>,
    stealer: Stealer<JobHandle>,
    /// Jobs placed on this worker by other threads.
    incoming: Mailbox<JobHandle>,
    can_steal: bool,
    run_forever: bool,
}

/// Exclusive access to a worker's deque owner.
///
/// Dropping the guard, including while unwinding from a panicking job,
/// returns the owner to its worker.
pub(crate) struct Claimed<'w> {
    slot: &'w Mutex<Option<Owner<JobHandle>>>,
    owner: Option<Owner<JobHandle>>,
}

// === impl JobWorker ===

impl JobWorker {
    pub(crate) fn main(deque_capacity: usize) -> Self {
        Self::new(WorkerKind::Main, deque_capacity, false, false)
    }

    pub(crate) fn background(index: usize, deque_capacity: usize) -> Self {
        Self::new(WorkerKind::Background(index), deque_capacity, true, true)
    }

    fn new(kind: WorkerKind, deque_capacity: usize, can_steal: bool, run_forever: bool) -> Self {
        let (owner, stealer) = WorkStealingDeque::with_capacity(deque_capacity);
        Self {
            kind,
            local: Mutex::new(Some(owner)),
            stealer,
            incoming: Mailbox::new(),
            can_steal,
            run_forever,
        }
    }

    /// Hands `job` to this worker. May be called from any thread.
    #[inline]
    pub(crate) fn enqueue(&self, job: JobHandle) {
        self.incoming.enqueue(job);
    }

    #[inline]
    pub(crate) fn stealer(&self) -> &Stealer<JobHandle> {
        &self.stealer
    }

    /// Returns the number of jobs queued on this worker. Advisory.
    pub(crate) fn queued(&self) -> usize {
        self.incoming.len() + self.stealer.len()
    }

    /// Drives this worker on the current thread.
    ///
    /// A `run_forever` worker loops until `cancel` is cancelled. Any other
    /// worker also returns once its deque and mailbox are both empty.
    ///
    /// Returns `None` if another thread is already driving this worker.
    pub(crate) fn run(&self, core: &Core, cancel: &CancelToken) -> Option<Tick> {
        let local = self.claim()?;
        let mut tick = Tick::default();
        let mut boff = Backoff::new();

        loop {
            if cancel.is_cancelled() {
                tick.cancelled = true;
                break;
            }

            tick.received += self.drain_incoming(&local);

            let job = match local.try_pop_bottom() {
                Some(job) => Some(job),
                None if self.can_steal => core.try_steal_from_any(self.kind).map(|job| {
                    tick.stolen += 1;
                    job
                }),
                None => None,
            };

            match job {
                Some(job) => {
                    boff.reset();
                    core.execute(self.kind, job, &mut tick);
                }
                None if self.run_forever => boff.spin(),
                // a job was handed to us after the drain above.
                None if !self.incoming.is_empty() => continue,
                None => break,
            }
        }

        tick.has_remaining = !local.is_empty() || !self.incoming.is_empty();
        Some(tick)
    }

    /// Moves everything in the mailbox onto the local deque, in arrival order.
    pub(crate) fn drain_incoming(&self, local: &Owner<JobHandle>) -> usize {
        let mut received = 0;
        // only the thread holding the owner consumes the mailbox.
        if let Some(incoming) = self.incoming.try_consume() {
            for job in incoming {
                local.push_bottom(job);
                received += 1;
            }
        }
        if received > 0 {
            test_trace!(worker = %self.kind, received, "drained mailbox");
        }
        received
    }

    /// Takes the deque owner for the current thread. Returns `None` if
    /// another thread is driving this worker.
    pub(crate) fn claim(&self) -> Option<Claimed<'_>> {
        let owner = self.local.lock().take()?;
        Some(Claimed {
            slot: &self.local,
            owner: Some(owner),
        })
    }
}

impl fmt::Debug for JobWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let claimed = self.local.try_lock().map(|local| local.is_none());
        f.debug_struct("JobWorker")
            .field("kind", &self.kind)
            .field("queued", &self.stealer.len())
            .field("incoming", &self.incoming.len())
            .field("claimed", &claimed)
            .field("can_steal", &self.can_steal)
            .field("run_forever", &self.run_forever)
            .finish()
    }
}

// === impl Claimed ===

impl Deref for Claimed<'_> {
    type Target = Owner<JobHandle>;

    fn deref(&self) -> &Self::Target {
        match self.owner.as_ref() {
            Some(owner) => owner,
            None => unreachable!("the owner is only taken when the guard is dropped"),
        }
    }
}

impl Drop for Claimed<'_> {
    fn drop(&mut self) {
        let owner = self.owner.take();
        *self.slot.lock() = owner;
    }
}

// === impl WorkerKind ===

impl WorkerKind {
    /// Returns the background index, or `None` for the main worker.
    #[inline]
    pub(crate) fn background_index(self) -> Option<usize> {
        match self {
            Self::Main => None,
            Self::Background(index) => Some(index),
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Background(index) => write!(f, "background-{index}"),
        }
    }
}
