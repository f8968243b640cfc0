//! Reusable frame buffers and the pool that owns them.
//!
//! A [`FramePool`] allocates a fixed number of equally sized [`FrameBuffer`]s
//! once per recording session. Buffers are move-only: the pool hands one out
//! with [`FramePool::checkout`], the recorder gives it to the camera, and the
//! camera returns it on completion. The pool only keeps track of which slots
//! are currently at home; a buffer can never be in two places at once.
//!
//! ```
//! use pvrec::{FramePool, SlotId};
//!
//! # fn main() -> Result<(), pvrec::Error> {
//! let mut pool = FramePool::new();
//! pool.allocate(3, 640 * 480)?;
//!
//! let buffer = pool.checkout(SlotId::new(0)).unwrap();
//! assert_eq!(pool.in_flight(), 1);
//! assert!(buffer.payload().is_none()); // nothing captured yet
//!
//! pool.checkin(buffer);
//! pool.release();
//! # Ok(())
//! # }
//! ```

use std::fmt;

use crate::{status::FrameStatus, Error, Result};

/// Identity of a buffer within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    pub const fn new(index: usize) -> Self {
        SlotId(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion record written by the camera when it is done with a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Outcome of the transfer.
    pub status: FrameStatus,
    /// The camera's own frame counter for this exposure (1-based, monotonic).
    pub frame_count: u64,
}

/// A fixed-capacity image buffer.
///
/// The buffer is not `Clone`: whoever holds the value owns the memory.
pub struct FrameBuffer {
    slot: SlotId,
    data: Box<[u8]>,
    completion: Option<Completion>,
}

impl FrameBuffer {
    fn new(slot: SlotId, size: usize) -> Self {
        Self {
            slot,
            data: vec![0u8; size].into_boxed_slice(),
            completion: None,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Size of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Mutable access to the raw storage, for the camera filling the buffer.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Records the outcome of a transfer into this buffer.
    pub fn complete(&mut self, status: impl Into<FrameStatus>, frame_count: u64) {
        self.completion = Some(Completion {
            status: status.into(),
            frame_count,
        });
    }

    /// Returns the completion record, if the buffer has completed since it was last queued.
    pub fn completion(&self) -> Option<Completion> {
        self.completion
    }

    /// Returns the image data, but only once a completion has been observed.
    ///
    /// Buffers are recycled between captures, so the bytes of a buffer that has
    /// not completed yet belong to an older frame (or to nothing at all).
    pub fn payload(&self) -> Option<&[u8]> {
        self.completion.map(|_| &self.data[..])
    }

    /// Forgets the previous completion. Called when the buffer is queued again.
    pub fn clear_completion(&mut self) {
        self.completion = None;
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("slot", &self.slot)
            .field("capacity", &self.data.len())
            .field("completion", &self.completion)
            .finish()
    }
}

/// Owner of the buffers of one recording session.
#[derive(Debug, Default)]
pub struct FramePool {
    slots: Vec<Option<FrameBuffer>>,
    buffer_size: usize,
}

impl FramePool {
    /// Creates an empty pool. Call [`allocate`](Self::allocate) before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `count` buffers of `buffer_size` bytes each.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyAllocated`] if the previous pool has not been
    /// released, and [`Error::InvalidConfiguration`] for a zero count or size.
    pub fn allocate(&mut self, count: usize, buffer_size: usize) -> Result<()> {
        if self.is_allocated() {
            return Err(Error::AlreadyAllocated);
        }
        if count == 0 {
            return Err(Error::InvalidConfiguration(
                "at least one frame buffer is required".into(),
            ));
        }
        if buffer_size == 0 {
            return Err(Error::InvalidConfiguration(
                "frame buffer size must be greater than 0".into(),
            ));
        }

        self.slots = (0..count)
            .map(|i| Some(FrameBuffer::new(SlotId(i), buffer_size)))
            .collect();
        self.buffer_size = buffer_size;
        log::debug!("allocated {count} frame buffers of {buffer_size} bytes");
        Ok(())
    }

    /// Frees every buffer the pool holds. Calling this on an empty pool is a no-op.
    ///
    /// Buffers still checked out are not tracked anymore; they are freed when
    /// their holder drops them.
    pub fn release(&mut self) {
        if !self.is_allocated() {
            return;
        }
        let missing = self.in_flight();
        if missing > 0 {
            log::debug!("releasing frame pool with {missing} buffer(s) not returned");
        }
        self.slots.clear();
        self.buffer_size = 0;
    }

    pub fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Number of buffers in the pool, at home or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently checked out.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Slot identities in pool order.
    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.slots.len()).map(SlotId)
    }

    /// Takes a buffer out of the pool. Returns `None` if it is already checked out.
    pub fn checkout(&mut self, slot: SlotId) -> Option<FrameBuffer> {
        self.slots.get_mut(slot.0).and_then(Option::take)
    }

    /// Returns a buffer to the pool.
    ///
    /// Buffers that do not belong to the current pool (e.g. one that comes back
    /// after the pool was released) are dropped.
    pub fn checkin(&mut self, buffer: FrameBuffer) {
        let slot = buffer.slot;
        let fits = buffer.capacity() == self.buffer_size;
        match self.slots.get_mut(slot.0) {
            Some(entry) if entry.is_none() && fits => {
                *entry = Some(buffer);
            }
            _ => {
                log::debug!("dropping frame buffer {slot} that does not belong to the pool");
            }
        }
    }
}
