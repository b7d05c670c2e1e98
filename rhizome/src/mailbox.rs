//! An unbounded lock-free MPSC queue.
//!
//! Based on [Dmitry Vyukov's non-intrusive MPSC][vyukov].
//!
//! Any number of threads may [`enqueue`] values, and enqueueing never blocks.
//! Only one thread at a time may dequeue. This is checked at runtime by
//! [`Mailbox::try_dequeue`], [`Mailbox::dequeue`] and the [`Consumer`] guard,
//! or left to the caller with the `unsafe` `_unchecked` variants.
//!
//! [vyukov]: https://www.1024cores.net/home/lock-free-algorithms/queues/non-intrusive-mpsc-node-based-queue
//! [`enqueue`]: Mailbox::enqueue
use crate::{
    loom::{
        cell::UnsafeCell,
        sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering::*},
    },
    util::{Backoff, CachePadded},
};
use alloc::boxed::Box;
use core::{fmt, ptr};

/// An unbounded lock-free MPSC queue.
///
/// Based on [Dmitry Vyukov's non-intrusive MPSC][vyukov].
///
/// [vyukov]: https://www.1024cores.net/home/lock-free-algorithms/queues/non-intrusive-mpsc-node-based-queue
pub struct Mailbox<T> {
    /// The most recently enqueued node. Swapped by every producer.
    head: CachePadded<AtomicPtr<Node<T>>>,

    /// The node *before* the oldest value. Its own value has already been
    /// taken (or it is the initial stub). Accessed only by the consumer.
    tail: CachePadded<UnsafeCell<*mut Node<T>>>,

    /// Does a consumer handle to the queue exist? If not, it is safe to create a
    /// new consumer.
    has_consumer: CachePadded<AtomicBool>,

    /// Number of enqueued values not yet dequeued. Advisory.
    len: CachePadded<AtomicUsize>,
}

/// A handle that holds the right to dequeue elements from a [`Mailbox`].
///
/// This can be used when one thread wishes to dequeue many elements at a time,
/// to avoid the overhead of ensuring mutual exclusion on every [`dequeue`] or
/// [`try_dequeue`] call. A `Consumer` is also an [`Iterator`] that dequeues
/// until the mailbox is empty.
///
/// This type is returned by the [`Mailbox::consume`] and
/// [`Mailbox::try_consume`] methods.
///
/// [`dequeue`]: Consumer::dequeue
/// [`try_dequeue`]: Consumer::try_dequeue
pub struct Consumer<'q, T> {
    q: &'q Mailbox<T>,
}

/// Errors returned by [`Mailbox::try_dequeue`] and
/// [`Mailbox::try_dequeue_unchecked`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TryDequeueError {
    /// No values are in the mailbox.
    Empty,
    /// A producer is halfway through an enqueue. The value will be available
    /// momentarily.
    Inconsistent,
    /// Another thread holds the consumer side of the mailbox.
    Busy,
}

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: Option<T>,
}

// === impl Mailbox ===

impl<T> Mailbox<T> {
    /// Returns a new, empty mailbox.
    ///
    /// This allocates the stub node that the head and tail point at while
    /// the mailbox is empty.
    #[must_use]
    pub fn new() -> Self {
        let stub = Node::alloc(None);
        Self {
            head: CachePadded(AtomicPtr::new(stub)),
            tail: CachePadded(UnsafeCell::new(stub)),
            has_consumer: CachePadded(AtomicBool::new(false)),
            len: CachePadded(AtomicUsize::new(0)),
        }
    }

    /// Adds `value` to the back of the mailbox. May be called from any thread.
    pub fn enqueue(&self, value: T) {
        let node = Node::alloc(Some(value));
        // count before publishing, so that the consumer never decrements past
        // zero.
        self.len.fetch_add(1, Relaxed);
        let prev = self.head.swap(node, AcqRel);
        unsafe {
            // Safety: `prev` is never null, because the mailbox always holds at
            // least the stub node, and the consumer does not free a node
            // until its `next` pointer has been set.
            (*prev).next.store(node, Release);
        }
    }

    /// Try to dequeue a value, without waiting if the mailbox is in an
    /// inconsistent state or another thread is dequeueing.
    ///
    /// As discussed in the [algorithm description on 1024cores.net][vyukov], a
    /// consumer that runs while a producer is between its two steps observes
    /// an inconsistent queue. The value being enqueued is then not yet
    /// reachable, and this method returns [`TryDequeueError::Inconsistent`].
    ///
    /// # Returns
    ///
    /// - `T` if a value was successfully dequeued
    /// - [`TryDequeueError::Empty`] if there are no values in the mailbox
    /// - [`TryDequeueError::Inconsistent`] if the mailbox is currently in an
    ///   inconsistent state
    /// - [`TryDequeueError::Busy`] if another thread is currently dequeueing
    ///
    /// [vyukov]: https://www.1024cores.net/home/lock-free-algorithms/queues/non-intrusive-mpsc-node-based-queue
    pub fn try_dequeue(&self) -> Result<T, TryDequeueError> {
        if self.try_lock_consumer().is_none() {
            return Err(TryDequeueError::Busy);
        }

        let res = unsafe {
            // Safety: the `has_consumer` flag ensures mutual exclusion of
            // consumers.
            self.try_dequeue_unchecked()
        };

        self.has_consumer.store(false, Release);
        res
    }

    /// Dequeue a value, spinning with an exponential backoff while the mailbox
    /// is inconsistent or another thread is dequeueing.
    ///
    /// Returns `None` only when the mailbox is empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut boff = Backoff::new();
        loop {
            match self.try_dequeue() {
                Ok(val) => return Some(val),
                Err(TryDequeueError::Empty) => return None,
                Err(_) => boff.spin(),
            }
        }
    }

    /// Returns a [`Consumer`] handle that reserves the exclusive right to dequeue
    /// values until it is dropped.
    ///
    /// If another thread is dequeueing, this method spins until there is no
    /// other thread dequeueing.
    pub fn consume(&self) -> Consumer<'_, T> {
        self.lock_consumer();
        Consumer { q: self }
    }

    /// Attempts to reserve a [`Consumer`] handle that holds the exclusive right
    /// to dequeue values until it is dropped.
    ///
    /// If another thread is dequeueing, this returns `None` instead.
    pub fn try_consume(&self) -> Option<Consumer<'_, T>> {
        self.try_lock_consumer().map(|_| Consumer { q: self })
    }

    /// Try to dequeue a value without checking for other consumers.
    ///
    /// # Returns
    ///
    /// - `T` if a value was successfully dequeued
    /// - [`TryDequeueError::Empty`] if there are no values in the mailbox
    /// - [`TryDequeueError::Inconsistent`] if the mailbox is currently in an
    ///   inconsistent state
    ///
    /// # Safety
    ///
    /// This is a multi-producer, *single-consumer* queue. Only one thread may
    /// call `try_dequeue_unchecked` at a time!
    pub unsafe fn try_dequeue_unchecked(&self) -> Result<T, TryDequeueError> {
        self.tail.with_mut(|tail| {
            let tail_node = *tail;
            let next = (*tail_node).next.load(Acquire);

            if next.is_null() {
                return if ptr::eq(self.head.load(Acquire), tail_node) {
                    Err(TryDequeueError::Empty)
                } else {
                    Err(TryDequeueError::Inconsistent)
                };
            }

            // `next` becomes the new stub. Its value was written before it was
            // published with `Release`, and only the consumer touches it now.
            *tail = next;
            let value = (*next).value.take();
            debug_assert!((*tail_node).value.is_none());
            drop(Box::from_raw(tail_node));
            self.len.fetch_sub(1, Relaxed);

            match value {
                Some(value) => Ok(value),
                None => unreachable!(
                    "a node past the stub must hold a value; this is a bug in `rhizome`!"
                ),
            }
        })
    }

    /// Dequeue a value without checking for other consumers, spinning while the
    /// mailbox is inconsistent.
    ///
    /// # Safety
    ///
    /// This is a multi-producer, *single-consumer* queue. Only one thread may
    /// call `dequeue_unchecked` at a time!
    pub unsafe fn dequeue_unchecked(&self) -> Option<T> {
        let mut boff = Backoff::new();
        loop {
            match self.try_dequeue_unchecked() {
                Ok(val) => return Some(val),
                Err(TryDequeueError::Empty) => return None,
                Err(TryDequeueError::Inconsistent) => boff.spin(),
                Err(TryDequeueError::Busy) => {
                    unreachable!("try_dequeue_unchecked never returns `Busy`!")
                }
            }
        }
    }

    /// Returns the number of values in the mailbox.
    ///
    /// Advisory: producers may enqueue at any time, and a value counted here
    /// may not be dequeueable yet if its producer is mid-enqueue.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Acquire)
    }

    /// Returns `true` if [`len`](Self::len) is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn lock_consumer(&self) {
        let mut boff = Backoff::new();
        while self
            .has_consumer
            .compare_exchange(false, true, AcqRel, Acquire)
            .is_err()
        {
            while self.has_consumer.load(Relaxed) {
                boff.spin();
            }
        }
    }

    #[inline]
    fn try_lock_consumer(&self) -> Option<()> {
        self.has_consumer
            .compare_exchange(false, true, AcqRel, Acquire)
            .map(|_| ())
            .ok()
    }
}

impl<T> Drop for Mailbox<T> {
    fn drop(&mut self) {
        let mut current = self.tail.with_mut(|tail| unsafe {
            // Safety: because `Drop` is called with `&mut self`, we have
            // exclusive ownership over the queue, so it's always okay to touch
            // the tail cell.
            *tail
        });
        while !current.is_null() {
            unsafe {
                let node = Box::from_raw(current);
                current = node.next.load(Relaxed);
                // drops the node's value, if it still has one.
                drop(node);
            }
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("head", &format_args!("{:p}", self.head.load(Acquire)))
            // only the consumer can load the tail; trying to print it here
            // could be racy.
            .field("tail", &format_args!("..."))
            .field("has_consumer", &self.has_consumer.load(Acquire))
            .field("len", &self.len.load(Relaxed))
            .finish()
    }
}

unsafe impl<T: Send> Send for Mailbox<T> {}
unsafe impl<T: Send> Sync for Mailbox<T> {}

// === impl Consumer ===

impl<T> Consumer<'_, T> {
    /// Dequeue a value, spinning with an exponential backoff while the mailbox
    /// is in an inconsistent state.
    ///
    /// Returns `None` if the mailbox is empty.
    pub fn dequeue(&self) -> Option<T> {
        unsafe {
            // Safety: we have reserved exclusive access to the queue.
            self.q.dequeue_unchecked()
        }
    }

    /// Try to dequeue a value without waiting.
    ///
    /// # Returns
    ///
    /// - `T` if a value was successfully dequeued
    /// - [`TryDequeueError::Empty`] if there are no values in the mailbox
    /// - [`TryDequeueError::Inconsistent`] if the mailbox is currently in an
    ///   inconsistent state
    pub fn try_dequeue(&self) -> Result<T, TryDequeueError> {
        unsafe {
            // Safety: we have reserved exclusive access to the queue.
            self.q.try_dequeue_unchecked()
        }
    }
}

impl<T> Iterator for Consumer<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.dequeue()
    }
}

impl<T> Drop for Consumer<'_, T> {
    fn drop(&mut self) {
        self.q.has_consumer.store(false, Release);
    }
}

impl<T> fmt::Debug for Consumer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").field("q", self.q).finish()
    }
}

// === impl Node ===

impl<T> Node<T> {
    fn alloc(value: Option<T>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            value,
        }))
    }
}
