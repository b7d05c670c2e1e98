//! The dependency arena.
//!
//! Every job the scheduler is tracking lives in a [`JobGraph`] slot, keyed by
//! its [`JobId`]. Edges between jobs are ids, never pointers, so the graph has
//! no reference cycles. A job is removed from the arena once its completion
//! has been fanned out to its dependents.
//!
//! Ids only mean something inside the graph that issued them, so a job may
//! only depend on jobs from its own graph.
use crate::{
    job::{Job, JobHandle, JobId, JobNode, JobStatus, Settings},
    loom::sync::{Arc, Mutex},
};
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

pub(crate) struct JobGraph {
    id: GraphId,
    slab: Mutex<Slab>,
}

/// Identifies the graph a [`JobNode`] was inserted into.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct GraphId(u64);

#[derive(Default)]
struct Slab {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
    next_seq: u64,
}

#[derive(Default)]
struct Entry {
    generation: u32,
    node: Option<Arc<JobNode>>,
}

/// A newly inserted job.
pub(crate) struct Inserted {
    pub(crate) handle: JobHandle,
    /// `true` if every dependency had already completed, so the caller must
    /// place the job now.
    pub(crate) runnable: bool,
}

// === impl JobGraph ===

impl JobGraph {
    pub(crate) fn new() -> Self {
        Self {
            id: GraphId::next(),
            slab: Mutex::new(Slab::default()),
        }
    }

    /// Adds a job that runs after every job in `dependencies`.
    ///
    /// A dependency that has already completed counts as satisfied. If all of
    /// them have, the returned job is runnable and the caller must place it;
    /// otherwise the completion of its last outstanding dependency makes it
    /// runnable.
    ///
    /// # Panics
    ///
    /// If a dependency was inserted into a different graph. Nothing is
    /// inserted in that case.
    pub(crate) fn insert(
        &self,
        job: Box<dyn Job>,
        settings: Settings,
        dependencies: &[JobHandle],
    ) -> Inserted {
        for dep in dependencies {
            assert_eq!(
                dep.node().graph,
                self.id,
                "job {} was scheduled on another scheduler; a job can only \
                 depend on jobs from its own scheduler",
                dep.id(),
            );
        }

        let node = self
            .slab
            .lock()
            .insert(self.id, job, settings, dependencies.len());
        let id = node.id;

        let mut satisfied = 0;
        for dep in dependencies {
            let dep = dep.node();
            debug_assert!(
                dep.seq < node.seq,
                "job {id} depends on job {}, which was scheduled after it; \
                 dependency graphs must be acyclic",
                dep.id,
            );
            let mut edges = dep.edges.lock();
            if edges.complete {
                satisfied += 1;
            } else {
                edges.awaited_by.push(id);
            }
        }

        test_trace!(
            job.id = %id,
            dependencies = dependencies.len(),
            satisfied,
            "inserted job",
        );

        // release the registration guard along with the satisfied deps.
        let runnable = node.release(satisfied + 1);
        Inserted {
            handle: JobHandle(node),
            runnable,
        }
    }

    /// Marks `job` as complete and removes it from the arena.
    ///
    /// Returns the dependents for which `job` was the last outstanding
    /// dependency. The caller must place each of them.
    pub(crate) fn complete(&self, job: &JobHandle) -> Vec<JobHandle> {
        let node = job.node();
        let awaited_by = {
            let mut edges = node.edges.lock();
            debug_assert!(!edges.complete, "job {} completed twice", node.id);
            edges.complete = true;
            core::mem::take(&mut edges.awaited_by)
        };

        let mut slab = self.slab.lock();
        slab.remove(node.id);

        let mut runnable = Vec::new();
        for id in awaited_by {
            let Some(dependent) = slab.get(id) else {
                // dependents are only removed once they complete, which
                // requires this job's release below.
                debug_assert!(false, "dependent {id} of job {} is missing", node.id);
                continue;
            };
            if dependent.release(1) {
                runnable.push(JobHandle(dependent));
            }
        }
        runnable
    }

    /// Returns the handle for `id`, if that job is still being tracked.
    pub(crate) fn get(&self, id: JobId) -> Option<JobHandle> {
        self.slab.lock().get(id).map(JobHandle)
    }

    /// Returns the number of jobs that have been scheduled but have not yet
    /// completed.
    pub(crate) fn len(&self) -> usize {
        self.slab.lock().live
    }

    /// Returns the number of jobs waiting on a dependency.
    pub(crate) fn waiting(&self) -> usize {
        self.slab
            .lock()
            .entries
            .iter()
            .filter_map(|entry| entry.node.as_ref())
            .filter(|node| node.status() == JobStatus::Waiting)
            .count()
    }
}

impl Default for JobGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slab.try_lock() {
            Some(slab) => f
                .debug_struct("JobGraph")
                .field("live", &slab.live)
                .field("slots", &slab.entries.len())
                .finish(),
            None => f
                .debug_struct("JobGraph")
                .field("live", &format_args!("<locked>"))
                .finish(),
        }
    }
}

// === impl GraphId ===

impl GraphId {
    pub(crate) fn next() -> Self {
        // only uniqueness matters, so this is not a loom atomic.
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Relaxed))
    }
}

// === impl Slab ===

impl Slab {
    fn insert(
        &mut self,
        graph: GraphId,
        job: Box<dyn Job>,
        settings: Settings,
        deps: usize,
    ) -> Arc<JobNode> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.entries.len()).unwrap_or_else(|_| {
                    panic!("more than {} jobs are scheduled at once", u32::MAX)
                });
                self.entries.push(Entry::default());
                index
            }
        };

        let entry = &mut self.entries[index as usize];
        let id = JobId::new(index, entry.generation);
        let node = Arc::new(JobNode::new(graph, id, seq, settings, job, deps));
        entry.node = Some(node.clone());
        self.live += 1;
        node
    }

    fn get(&self, id: JobId) -> Option<Arc<JobNode>> {
        let entry = self.entries.get(id.index())?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.node.clone()
    }

    fn remove(&mut self, id: JobId) -> Option<Arc<JobNode>> {
        let entry = self.entries.get_mut(id.index())?;
        if entry.generation != id.generation() {
            return None;
        }
        let node = entry.node.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.live -= 1;
        Some(node)
    }
}

#[cfg(all(loom, test))]
mod loom {
    use super::*;
    use crate::loom::{self, sync::Arc, thread};

    fn noop() -> Box<dyn Job> {
        Box::new(|| {})
    }

    #[test]
    fn last_dependency_releases_dependent_once() {
        loom::model(|| {
            let graph = Arc::new(JobGraph::new());
            let a = graph.insert(noop(), Settings::new(), &[]).handle;
            let b = graph.insert(noop(), Settings::new(), &[]).handle;
            let c = graph.insert(noop(), Settings::new(), &[a.clone(), b.clone()]);
            assert!(!c.runnable);

            let t = thread::spawn({
                let graph = graph.clone();
                move || graph.complete(&a)
            });
            let mut released = graph.complete(&b);
            released.extend(t.join().unwrap());

            assert_eq!(released, vec![c.handle]);
            assert_eq!(graph.len(), 1);
        })
    }

    #[test]
    fn dependency_completes_while_registering() {
        loom::model(|| {
            let graph = Arc::new(JobGraph::new());
            let a = graph.insert(noop(), Settings::new(), &[]).handle;

            let t = thread::spawn({
                let graph = graph.clone();
                let a = a.clone();
                move || graph.complete(&a)
            });
            let b = graph.insert(noop(), Settings::new(), &[a]);
            let released = t.join().unwrap();

            // exactly one of the two paths makes `b` runnable.
            match (b.runnable, released.as_slice()) {
                (true, []) => {}
                (false, [released]) => assert_eq!(released, &b.handle),
                (runnable, released) => {
                    panic!("runnable={runnable}, released={released:?}")
                }
            }
        })
    }
}
