//! The move-segment queue: a fixed-capacity arena of [`MoveSegment`]s shared
//! between the move ISR (producer) and the per-axis step generators
//! (consumers).
//!
//! The C++ original this is distilled from (`PreciseStepping`) holds
//! reference-counted raw pointers into a ring buffer, mutated from ISR
//! context. Here the ring is an arena of stable monotonic indices with a
//! per-slot atomic refcount instead of pointers -- see `DESIGN.md`.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::segment::MoveSegment;
use crate::errors::WouldBlock;

/// A stable index into a [`MoveQueue`]. Monotonically increasing for the
/// lifetime of the queue; the actual storage slot is `index % N`.
pub type SegIndex = u32;

struct Slot {
    segment: MoveSegment,
    /// How many generators currently hold a pointer into this segment.
    refcount: AtomicU8,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            segment: MoveSegment::default(),
            refcount: AtomicU8::new(0),
        }
    }
}

/// Bounded ring of move segments with three cursors: `tail` (oldest
/// reachable), `unprocessed` (first not yet seen by any generator's "move
/// processed" handler) and `head` (next write position). `N` must be a
/// power of two.
pub struct MoveQueue<const N: usize> {
    slots: [Slot; N],
    tail: SegIndex,
    unprocessed: SegIndex,
    head: SegIndex,
}

impl<const N: usize> Default for MoveQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MoveQueue<N> {
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "MoveQueue capacity must be a power of two");
        Self {
            slots: core::array::from_fn(|_| Slot::default()),
            tail: 0,
            unprocessed: 0,
            head: 0,
        }
    }

    #[inline]
    fn slot_index(idx: SegIndex) -> usize {
        (idx as usize) & (N - 1)
    }

    pub fn len(&self) -> u32 {
        self.head.wrapping_sub(self.tail)
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// One free slot is always kept in reserve so an ending-empty move can
    /// always be enqueued even when the builder's normal bound is reached.
    pub fn free_slots(&self) -> u32 {
        (N as u32).saturating_sub(self.len())
    }

    /// Enqueues a segment, returning its stable index. `MOVE_SEGMENT_QUEUE_MIN_FREE_SLOTS`
    /// (1) free slots must remain after non-reserved pushes; callers that need
    /// to push the ending-empty move use [`Self::push_reserved`] to use the
    /// last slot.
    pub fn push(&mut self, segment: MoveSegment) -> Result<SegIndex, WouldBlock> {
        if self.free_slots() <= crate::MOVE_SEGMENT_QUEUE_MIN_FREE_SLOTS {
            return Err(WouldBlock::Full);
        }
        self.push_reserved(segment)
    }

    /// Enqueues using the last reserved slot. Used only for the
    /// beginning/ending empty moves, whose failure to enqueue is fatal.
    pub fn push_reserved(&mut self, segment: MoveSegment) -> Result<SegIndex, WouldBlock> {
        if self.free_slots() == 0 {
            return Err(WouldBlock::Full);
        }
        let idx = self.head;
        self.slots[Self::slot_index(idx)] = Slot {
            segment,
            refcount: AtomicU8::new(0),
        };
        self.head = self.head.wrapping_add(1);
        Ok(idx)
    }

    pub fn get(&self, idx: SegIndex) -> Option<&MoveSegment> {
        if self.contains(idx) {
            Some(&self.slots[Self::slot_index(idx)].segment)
        } else {
            None
        }
    }

    pub fn contains(&self, idx: SegIndex) -> bool {
        idx.wrapping_sub(self.tail) < self.len() || idx == self.tail && !self.is_empty()
    }

    /// Index one past the most recently pushed segment; `None` if empty.
    pub fn head(&self) -> SegIndex {
        self.head
    }

    pub fn tail(&self) -> SegIndex {
        self.tail
    }

    pub fn unprocessed(&self) -> SegIndex {
        self.unprocessed
    }

    /// A generator calls this once it has fully consumed `idx` and will not
    /// look at it again; this is the "move processed" handler that advances
    /// the shared unprocessed cursor when every known consumer agrees.
    pub fn mark_unprocessed_through(&mut self, idx: SegIndex) {
        if idx.wrapping_sub(self.unprocessed) < u32::MAX / 2 {
            self.unprocessed = idx;
        }
    }

    /// Acquires a pointer-equivalent into `idx` for a generator. Must be
    /// balanced by [`Self::release`].
    pub fn acquire(&self, idx: SegIndex) {
        if let Some(slot) = self.slot_if_live(idx) {
            slot.refcount.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Releases a generator's hold on `idx`. Once the refcount for the front
    /// slot reaches zero the queue's tail can advance past it.
    pub fn release(&mut self, idx: SegIndex) {
        if let Some(slot) = self.slot_if_live(idx) {
            let prev = slot.refcount.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev > 0, "released a move segment with a zero refcount");
        }
        self.advance_tail();
    }

    fn slot_if_live(&self, idx: SegIndex) -> Option<&Slot> {
        if self.contains(idx) {
            Some(&self.slots[Self::slot_index(idx)])
        } else {
            None
        }
    }

    /// Retires slots from `tail` while their refcount is zero. Called after
    /// every `release` and also opportunistically by the move ISR.
    pub fn advance_tail(&mut self) {
        while self.tail != self.head {
            let slot = &self.slots[Self::slot_index(self.tail)];
            if slot.refcount.load(Ordering::Acquire) != 0 {
                break;
            }
            self.tail = self.tail.wrapping_add(1);
        }
    }

    /// Current refcount of a live segment, for tests and diagnostics.
    pub fn refcount(&self, idx: SegIndex) -> Option<u8> {
        self.slot_if_live(idx).map(|s| s.refcount.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::MoveSegment;

    #[test]
    fn push_and_retire_respects_refcount() {
        let mut q: MoveQueue<4> = MoveQueue::new();
        let a = q.push_reserved(MoveSegment::default()).unwrap();
        q.acquire(a);
        let b = q.push_reserved(MoveSegment::default()).unwrap();
        assert_eq!(q.tail(), 0);
        // b has no holders; a does. Releasing b should not retire a.
        q.release(b);
        assert_eq!(q.tail(), 0);
        q.release(a);
        assert_eq!(q.tail(), 2);
    }

    #[test]
    fn reserved_slot_always_available() {
        let mut q: MoveQueue<2> = MoveQueue::new();
        q.push(MoveSegment::default()).unwrap();
        // The min-free-slots reserve blocks a second ordinary push...
        assert_eq!(q.push(MoveSegment::default()), Err(WouldBlock::Full));
        // ...but the reserved slot for an ending-empty move is still there.
        q.push_reserved(MoveSegment::default()).unwrap();
        assert_eq!(q.free_slots(), 0);
    }
}
