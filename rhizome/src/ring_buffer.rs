use alloc::boxed::Box;
use core::{fmt, mem::MaybeUninit, ptr};

/// Fixed-capacity circular storage backing a [`WorkStealingDeque`].
///
/// Logical indices are unbounded `isize`s; a logical index maps to the slot
/// `index mod capacity`. The capacity is always a power of two, so the mapping
/// is a mask.
///
/// A `RingBuffer` never drops the values in its slots. Which slots hold live
/// values is known only to the deque, from its `top` and `bottom` indices.
///
/// [`WorkStealingDeque`]: crate::WorkStealingDeque
pub(crate) struct RingBuffer<T> {
    slots: *mut MaybeUninit<T>,
    mask: usize,
}

impl<T> RingBuffer<T> {
    /// Allocates a buffer with `capacity` uninitialized slots.
    ///
    /// # Panics
    ///
    /// If `capacity` is not a power of two.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "ring buffer capacity must be a power of two (got {capacity})"
        );
        let slots: Box<[MaybeUninit<T>]> = (0..capacity).map(|_| MaybeUninit::uninit()).collect();
        Self {
            slots: Box::into_raw(slots).cast::<MaybeUninit<T>>(),
            mask: capacity - 1,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline(always)]
    fn slot(&self, index: isize) -> *mut MaybeUninit<T> {
        // Safety: the mask keeps the offset inside the allocation.
        unsafe { self.slots.add(index as usize & self.mask) }
    }

    /// Writes `value` into the slot for logical `index`.
    ///
    /// Whatever the slot held before is overwritten without being dropped.
    ///
    /// # Safety
    ///
    /// The caller must be the only thread writing to this buffer, and `index`
    /// must not alias a slot that is still logically live.
    #[inline]
    pub(crate) unsafe fn write(&self, index: isize, value: T) {
        ptr::write_volatile(self.slot(index), MaybeUninit::new(value))
    }

    /// Reads a bitwise copy of the slot for logical `index`.
    ///
    /// The copy may be stale, or torn if the owner is concurrently writing the
    /// same slot. It may only be assumed initialized once the caller has
    /// confirmed, through the deque's indices, that it now owns that slot.
    #[inline]
    pub(crate) unsafe fn read(&self, index: isize) -> MaybeUninit<T> {
        ptr::read_volatile(self.slot(index))
    }

    /// Returns a buffer of twice the capacity with slots `top..bottom` copied
    /// to the same logical indices.
    ///
    /// The copies are bitwise; `self` keeps its bits, so a thief still
    /// reading through a stale pointer to `self` sees the same values.
    ///
    /// # Safety
    ///
    /// Only the deque's owner may call this, with the live range it observed.
    pub(crate) unsafe fn grow(&self, top: isize, bottom: isize) -> RingBuffer<T> {
        let grown = RingBuffer::with_capacity(self.capacity() * 2);
        for index in top..bottom {
            ptr::copy_nonoverlapping(self.slot(index), grown.slot(index), 1);
        }
        grown
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Frees the storage only; `MaybeUninit` never drops its contents.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.slots,
                self.capacity(),
            )));
        }
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("slots", &format_args!("{:p}", self.slots))
            .field("capacity", &self.capacity())
            .finish()
    }
}
