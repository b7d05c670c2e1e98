//! A lock-free work-stealing deque.
//!
//! This is the [Chase-Lev deque][chase-lev], using the memory orderings of the
//! C11 formulation by [Lê, Pop, Cohen and Zappa Nardelli][le].
//!
//! A deque has exactly one [`Owner`], which pushes and pops elements at the
//! *bottom* in LIFO order, and any number of [`Stealer`]s, which take elements
//! from the *top* in FIFO order. Both halves are returned by
//! [`WorkStealingDeque::new`] and [`WorkStealingDeque::with_capacity`].
//!
//! ```
//! use rhizome::deque::{TryStealError, WorkStealingDeque};
//!
//! let (owner, stealer) = WorkStealingDeque::new();
//! owner.push_bottom(1);
//! owner.push_bottom(2);
//! owner.push_bottom(3);
//!
//! assert_eq!(stealer.try_steal(), Ok(1));
//! assert_eq!(owner.try_pop_bottom(), Some(3));
//! assert_eq!(owner.try_pop_bottom(), Some(2));
//! assert_eq!(owner.try_pop_bottom(), None);
//! assert_eq!(stealer.try_steal(), Err(TryStealError::Empty));
//! ```
//!
//! [chase-lev]: https://doi.org/10.1145/1073970.1073974
//! [le]: https://doi.org/10.1145/2442516.2442524
use crate::{
    loom::{
        cell::UnsafeCell,
        sync::{
            atomic::{self, AtomicIsize, AtomicPtr, Ordering::*},
            Arc,
        },
    },
    ring_buffer::RingBuffer,
    util::CachePadded,
};
use alloc::{boxed::Box, vec::Vec};
use core::{cell::Cell, fmt, marker::PhantomData};

/// The shared state of a Chase-Lev work-stealing deque.
///
/// This type is not used directly; see [`Owner`] and [`Stealer`]. The
/// owner-side operations are exposed here as `unsafe` functions for callers
/// that enforce single ownership by other means.
pub struct WorkStealingDeque<T> {
    /// One past the most recently pushed element. Written only by the owner.
    bottom: CachePadded<AtomicIsize>,

    /// The oldest element. Advanced by thieves, and by the owner when it pops
    /// the last element, always with a CAS.
    top: CachePadded<AtomicIsize>,

    buffer: CachePadded<AtomicPtr<RingBuffer<T>>>,

    /// The last value of `top` the owner loaded. `top` only grows, so this is a
    /// conservative lower bound that saves the owner an acquire load on most
    /// pushes.
    top_cache: UnsafeCell<isize>,

    /// Buffers replaced by growth.
    ///
    /// A thief may have loaded the old buffer pointer just before the owner
    /// swapped it, so retired buffers are only freed with the deque itself.
    retired: UnsafeCell<Vec<Box<RingBuffer<T>>>>,
}

/// The owning half of a [`WorkStealingDeque`].
///
/// There is only ever one `Owner` per deque. It may be sent to another thread,
/// but it is not `Sync`: the bottom of the deque is accessed by one thread at
/// a time.
pub struct Owner<T> {
    deque: Arc<WorkStealingDeque<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

/// A handle that takes elements from the top of a [`WorkStealingDeque`].
///
/// `Stealer`s are cheap to clone and can be shared freely between threads.
pub struct Stealer<T> {
    deque: Arc<WorkStealingDeque<T>>,
}

/// Errors returned by [`Stealer::try_steal`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TryStealError {
    /// The deque had no elements.
    Empty,
    /// Another thief, or the owner popping the last element, claimed the
    /// element this thief was going for. Trying again may succeed.
    Contended,
}

// === impl WorkStealingDeque ===

impl<T> WorkStealingDeque<T> {
    /// The capacity of a deque returned by [`WorkStealingDeque::new`].
    pub const DEFAULT_CAPACITY: usize = 64;

    /// The smallest ring buffer a deque will allocate.
    pub const MIN_CAPACITY: usize = 2;

    /// Returns a new deque with [`Self::DEFAULT_CAPACITY`].
    #[must_use]
    pub fn new() -> (Owner<T>, Stealer<T>) {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Returns a new deque whose initial buffer holds at least `capacity`
    /// elements.
    ///
    /// The capacity is rounded up to a power of two, and to at least
    /// [`Self::MIN_CAPACITY`]. The deque grows past it when needed.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Owner<T>, Stealer<T>) {
        let capacity = capacity.max(Self::MIN_CAPACITY).next_power_of_two();
        let buffer = Box::into_raw(Box::new(RingBuffer::with_capacity(capacity)));
        let deque = Arc::new(Self {
            bottom: CachePadded(AtomicIsize::new(0)),
            top: CachePadded(AtomicIsize::new(0)),
            buffer: CachePadded(AtomicPtr::new(buffer)),
            top_cache: UnsafeCell::new(0),
            retired: UnsafeCell::new(Vec::new()),
        });
        let stealer = Stealer {
            deque: deque.clone(),
        };
        let owner = Owner {
            deque,
            _not_sync: PhantomData,
        };
        (owner, stealer)
    }

    /// Pushes `item` onto the bottom of the deque, growing the buffer if it is
    /// full.
    ///
    /// # Safety
    ///
    /// Only one thread may call `push_bottom` and [`try_pop_bottom`] at a time.
    ///
    /// [`try_pop_bottom`]: Self::try_pop_bottom
    pub unsafe fn push_bottom(&self, item: T) {
        let bottom = self.bottom.load(Relaxed);
        let mut buffer = self.buffer.load(Relaxed);
        let capacity = (*buffer).capacity() as isize;

        if bottom - self.top_cache.with(|top| *top) >= capacity {
            // the cached top says we're full; it may just be out of date.
            let top = self.top.load(Acquire);
            self.top_cache.with_mut(|cache| *cache = top);
            if bottom - top >= capacity {
                buffer = self.grow(buffer, top, bottom);
            }
        }

        (*buffer).write(bottom, item);
        // the slot write must be visible before a thief can see the new bottom.
        self.bottom.store(bottom + 1, Release);
    }

    /// Pops the most recently pushed element from the bottom of the deque.
    ///
    /// Returns `None` if the deque is empty, or if a thief took the last
    /// element first.
    ///
    /// # Safety
    ///
    /// Only one thread may call [`push_bottom`] and `try_pop_bottom` at a time.
    ///
    /// [`push_bottom`]: Self::push_bottom
    pub unsafe fn try_pop_bottom(&self) -> Option<T> {
        let bottom = self.bottom.load(Relaxed) - 1;
        let buffer = self.buffer.load(Relaxed);
        self.bottom.store(bottom, Relaxed);
        // the speculative decrement of `bottom` must be ordered before the load
        // of `top`; release/acquire alone allows the two to be reordered, and
        // then a pop and a steal can both take the last element.
        atomic::fence(SeqCst);
        let top = self.top.load(Relaxed);

        if bottom < top {
            // already empty; undo the decrement.
            self.bottom.store(bottom + 1, Relaxed);
            return None;
        }

        let item = (*buffer).read(bottom);
        if bottom > top {
            // more than one element left, so no thief can reach this one.
            return Some(item.assume_init());
        }

        // this is the last element. race any thieves for it.
        let won = self
            .top
            .compare_exchange(top, top + 1, SeqCst, Relaxed)
            .is_ok();
        self.bottom.store(top + 1, Relaxed);
        if won {
            Some(item.assume_init())
        } else {
            test_trace!(top, "lost the race for the last element");
            None
        }
    }

    /// Takes the oldest element from the top of the deque.
    ///
    /// # Returns
    ///
    /// - `Ok(T)` if an element was stolen.
    /// - [`Err(TryStealError::Empty)`] if the deque was empty.
    /// - [`Err(TryStealError::Contended)`] if another thread claimed the
    ///   element first.
    ///
    /// [`Err(TryStealError::Empty)`]: TryStealError::Empty
    /// [`Err(TryStealError::Contended)`]: TryStealError::Contended
    pub fn try_steal(&self) -> Result<T, TryStealError> {
        let top = self.top.load(Acquire);
        atomic::fence(SeqCst);
        let bottom = self.bottom.load(Acquire);
        if bottom <= top {
            return Err(TryStealError::Empty);
        }

        let buffer = self.buffer.load(Acquire);
        // Safety: retired buffers are not freed until the deque is dropped, so
        // `buffer` is valid even if the owner has replaced it since. The copy
        // is only trusted once the CAS below confirms that this thief owns
        // slot `top`.
        let item = unsafe { (*buffer).read(top) };
        if self
            .top
            .compare_exchange(top, top + 1, SeqCst, Relaxed)
            .is_err()
        {
            return Err(TryStealError::Contended);
        }

        Ok(unsafe { item.assume_init() })
    }

    /// Returns the number of elements in the deque.
    ///
    /// This is advisory only: other threads may push, pop, or steal as soon as
    /// it has been read.
    pub fn len(&self) -> usize {
        let bottom = self.bottom.load(Acquire);
        let top = self.top.load(Acquire);
        (bottom - top).max(0) as usize
    }

    /// Returns `true` if the deque has no elements. Advisory, like
    /// [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the current ring buffer.
    pub fn capacity(&self) -> usize {
        unsafe { (*self.buffer.load(Acquire)).capacity() }
    }

    #[cold]
    unsafe fn grow(
        &self,
        old: *mut RingBuffer<T>,
        top: isize,
        bottom: isize,
    ) -> *mut RingBuffer<T> {
        let grown = Box::into_raw(Box::new((*old).grow(top, bottom)));
        test_trace!(
            top,
            bottom,
            capacity = (*grown).capacity(),
            "grew work-stealing deque"
        );
        // the copied slots must be visible to anyone who loads the new pointer.
        self.buffer.store(grown, Release);
        self.retired
            .with_mut(|retired| (*retired).push(Box::from_raw(old)));
        grown
    }
}

impl<T> Drop for WorkStealingDeque<T> {
    fn drop(&mut self) {
        let bottom = self.bottom.load(Relaxed);
        let top = self.top.load(Relaxed);
        let buffer = self.buffer.load(Relaxed);
        unsafe {
            // Safety: `&mut self` means no owner or thief is left, and
            // `top..bottom` are exactly the elements nobody has taken. Retired
            // buffers only hold bitwise copies, so they are freed without
            // dropping anything.
            for index in top..bottom {
                drop((*buffer).read(index).assume_init());
            }
            drop(Box::from_raw(buffer));
        }
    }
}

impl<T> fmt::Debug for WorkStealingDeque<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkStealingDeque")
            .field("top", &self.top.load(Relaxed))
            .field("bottom", &self.bottom.load(Relaxed))
            .field("capacity", &self.capacity())
            .finish()
    }
}

unsafe impl<T: Send> Send for WorkStealingDeque<T> {}
unsafe impl<T: Send> Sync for WorkStealingDeque<T> {}

// === impl Owner ===

impl<T> Owner<T> {
    /// Pushes `item` onto the bottom of the deque.
    ///
    /// The deque grows if it is full; this never fails.
    #[inline]
    pub fn push_bottom(&self, item: T) {
        unsafe {
            // Safety: `Owner` is unique and `!Sync`.
            self.deque.push_bottom(item)
        }
    }

    /// Pops the most recently pushed element, if the deque is not empty and
    /// no thief beat us to the last element.
    #[inline]
    pub fn try_pop_bottom(&self) -> Option<T> {
        unsafe {
            // Safety: `Owner` is unique and `!Sync`.
            self.deque.try_pop_bottom()
        }
    }

    /// Returns a new [`Stealer`] for this deque.
    #[must_use]
    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            deque: self.deque.clone(),
        }
    }

    /// Returns the number of elements in the deque. Advisory.
    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    /// Returns `true` if the deque has no elements. Advisory.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    /// Returns the capacity of the current ring buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.deque.capacity()
    }
}

impl<T> fmt::Debug for Owner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owner").field(&self.deque).finish()
    }
}

// === impl Stealer ===

impl<T> Stealer<T> {
    /// Takes the oldest element from the top of the deque.
    ///
    /// See [`WorkStealingDeque::try_steal`].
    #[inline]
    pub fn try_steal(&self) -> Result<T, TryStealError> {
        self.deque.try_steal()
    }

    /// Returns the number of elements in the deque. Advisory.
    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    /// Returns `true` if the deque has no elements. Advisory.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            deque: self.deque.clone(),
        }
    }
}

impl<T> fmt::Debug for Stealer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stealer").field(&self.deque).finish()
    }
}

#[cfg(test)]
mod loom;
