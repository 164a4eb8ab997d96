//! The segment pool that backs a [`crate::message::Reader`] or
//! [`crate::message::Builder`]: allocation policy, segment lookup, the
//! traversal-limit budget, and capability-table storage.

use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::capability::{CapTable, CapabilityHandle};
use crate::message::{Allocator, ReaderOptions, ReaderSegments};
use crate::private::units::BYTES_PER_WORD;
use crate::{Error, ErrorKind, OutputSegments, Result};

#[cfg(not(feature = "sync_reader"))]
use core::cell::Cell;
#[cfg(feature = "sync_reader")]
use core::sync::atomic::{AtomicU64, Ordering};

/// A decrementing budget of words that may be visited by following pointers
/// out of a single reader. Exists to bound the work an attacker can extract
/// from a small malicious message (the same pointer can otherwise be visited
/// repeatedly to amplify a small message into a large traversal).
#[cfg(not(feature = "sync_reader"))]
pub struct ReadLimiter {
    remaining: Cell<u64>,
}

#[cfg(not(feature = "sync_reader"))]
impl ReadLimiter {
    pub fn new(limit_words: Option<u64>) -> Self {
        ReadLimiter {
            remaining: Cell::new(limit_words.unwrap_or(u64::MAX)),
        }
    }

    pub fn can_advance(&self, words: u64) -> Result<()> {
        let remaining = self.remaining.get();
        if words > remaining {
            Err(Error::from_kind(
                ErrorKind::TraversalLimitExceeded,
                "read traversal limit exceeded; if this is an untrusted message, this is \
                 expected; if it isn't, consider raising ReaderOptions::traversal_limit_in_words",
            ))
        } else {
            self.remaining.set(remaining - words);
            Ok(())
        }
    }
}

#[cfg(feature = "sync_reader")]
pub struct ReadLimiter {
    remaining: AtomicU64,
}

#[cfg(feature = "sync_reader")]
impl ReadLimiter {
    pub fn new(limit_words: Option<u64>) -> Self {
        ReadLimiter {
            remaining: AtomicU64::new(limit_words.unwrap_or(u64::MAX)),
        }
    }

    pub fn can_advance(&self, words: u64) -> Result<()> {
        loop {
            let remaining = self.remaining.load(Ordering::Relaxed);
            if words > remaining {
                return Err(Error::from_kind(
                    ErrorKind::TraversalLimitExceeded,
                    "read traversal limit exceeded",
                ));
            }
            if self
                .remaining
                .compare_exchange_weak(
                    remaining,
                    remaining - words,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}

/// Read-only access to a message's segment pool, traversal budget, and
/// capability table. Implemented both by [`ReaderArenaImpl`] (for a plain
/// `Reader<S>`) and by [`BuilderArenaImpl`] (so that a `Builder` can be read
/// back through the same arena it was built in, without copying).
pub trait ReaderArena {
    /// Returns the start of segment `id` and its length in words.
    fn get_segment(&self, id: u32) -> Result<(*const u8, u32)>;
    fn read_limiter(&self) -> &ReadLimiter;
    fn extract_cap(&self, index: u32) -> Option<Rc<dyn CapabilityHandle>>;
    fn nesting_limit(&self) -> i32;
}

/// Mutable access to a message's segment pool: allocation and capability
/// interning. Every `BuilderArena` is also a `ReaderArena`, so that a builder
/// can read back what it has written.
pub trait BuilderArena: ReaderArena {
    /// Allocates a brand new segment of at least `minimum_size` words,
    /// returning its id.
    fn allocate_new_segment(&mut self, minimum_size: u32) -> u32;

    /// Attempts to allocate `amount` words from exactly `segment_id`, with no
    /// fallback to other segments. Used when placing a far-pointer landing
    /// pad, where only a specific target segment will do.
    fn try_allocate_in_segment(&mut self, segment_id: u32, amount: u32) -> Option<u32>;

    /// Allocates `amount` words, preferring `preferred_segment_id`. Falls back
    /// to scanning other segments, then to creating a new one. Returns the
    /// segment actually used and the word offset within it.
    fn allocate(&mut self, preferred_segment_id: u32, amount: u32) -> (u32, u32);

    /// Raw pointer to word `word_offset` of segment `segment_id`, for an
    /// in-place write. Caller must already know the offset is in bounds
    /// (e.g. because `allocate`/`try_allocate_in_segment` just returned it).
    fn segment_ptr_mut(&mut self, segment_id: u32, word_offset: u32) -> *mut u8;

    /// Start of segment `id` and how many words of it are used, for
    /// lowest-level access to the root pointer word.
    fn get_segment_mut(&mut self, id: u32) -> (*mut u8, u32);

    fn get_segments_for_output(&self) -> OutputSegments<'_>;

    fn as_reader(&self) -> &dyn ReaderArena;

    fn is_empty(&self) -> bool;

    fn local_cap_table(&mut self) -> &mut CapTable;

    /// Rolls back `segment_id`'s high-water mark by `amount` words and zeroes
    /// them, iff nothing has been allocated past `end_offset` since. Used by
    /// struct compaction to give trimmed trailing words back to the segment.
    fn try_reclaim(&mut self, segment_id: u32, end_offset: u32, amount: u32) -> bool;
}

/// `ReaderArena` backed by a [`ReaderSegments`] implementation: a plain,
/// already-serialized message.
pub struct ReaderArenaImpl<S>
where
    S: ReaderSegments,
{
    segments: S,
    limiter: ReadLimiter,
    nesting_limit: i32,
    cap_table: CapTable,
}

impl<S> ReaderArenaImpl<S>
where
    S: ReaderSegments,
{
    pub fn new(segments: S, options: ReaderOptions) -> Self {
        Self::new_with_cap_table(segments, options, CapTable::new())
    }

    pub fn new_with_cap_table(segments: S, options: ReaderOptions, cap_table: CapTable) -> Self {
        ReaderArenaImpl {
            segments,
            limiter: ReadLimiter::new(options.traversal_limit_in_words.map(|w| w as u64)),
            nesting_limit: options.nesting_limit,
            cap_table,
        }
    }

    pub fn into_segments(self) -> S {
        self.segments
    }
}

impl<S> ReaderArena for ReaderArenaImpl<S>
where
    S: ReaderSegments,
{
    fn get_segment(&self, id: u32) -> Result<(*const u8, u32)> {
        match self.segments.get_segment(id) {
            Some(slice) => Ok((slice.as_ptr(), (slice.len() / BYTES_PER_WORD) as u32)),
            None => Err(Error::from_kind(
                ErrorKind::SegmentOutOfRange,
                alloc::format!("no such segment: {id}"),
            )),
        }
    }

    fn read_limiter(&self) -> &ReadLimiter {
        &self.limiter
    }

    fn extract_cap(&self, index: u32) -> Option<Rc<dyn CapabilityHandle>> {
        self.cap_table.get(index)
    }

    fn nesting_limit(&self) -> i32 {
        self.nesting_limit
    }
}

struct SegmentBuilder {
    ptr: *mut u8,
    capacity: u32, // words
    allocated: u32, // words currently in use, from the front
}

/// `BuilderArena` that owns its segments via an [`Allocator`], growing the
/// segment pool as writes exceed the current capacity.
pub struct BuilderArenaImpl<A>
where
    A: Allocator,
{
    allocator: Option<A>,
    segments: Vec<SegmentBuilder>,
    limiter: ReadLimiter,
    cap_table: CapTable,
}

impl<A> BuilderArenaImpl<A>
where
    A: Allocator,
{
    pub fn new(allocator: A) -> Self {
        BuilderArenaImpl {
            allocator: Some(allocator),
            segments: Vec::new(),
            limiter: ReadLimiter::new(None),
            cap_table: CapTable::new(),
        }
    }

    fn deallocate_all(&mut self) {
        if let Some(allocator) = self.allocator.as_mut() {
            for seg in self.segments.drain(..) {
                unsafe {
                    allocator.deallocate_segment(seg.ptr, seg.capacity, seg.allocated);
                }
            }
        }
    }

    /// Consumes the arena, deallocating every segment and returning the
    /// underlying allocator so it (and any scratch space it owns) can be
    /// reused for a later message.
    pub fn into_allocator(mut self) -> A {
        self.deallocate_all();
        self.allocator.take().expect("allocator already taken")
    }
}

impl<A> Drop for BuilderArenaImpl<A>
where
    A: Allocator,
{
    fn drop(&mut self) {
        self.deallocate_all();
    }
}

impl<A> ReaderArena for BuilderArenaImpl<A>
where
    A: Allocator,
{
    fn get_segment(&self, id: u32) -> Result<(*const u8, u32)> {
        match self.segments.get(id as usize) {
            Some(seg) => Ok((seg.ptr as *const u8, seg.allocated)),
            None => Err(Error::from_kind(
                ErrorKind::SegmentOutOfRange,
                alloc::format!("no such segment: {id}"),
            )),
        }
    }

    fn read_limiter(&self) -> &ReadLimiter {
        &self.limiter
    }

    fn extract_cap(&self, index: u32) -> Option<Rc<dyn CapabilityHandle>> {
        self.cap_table.get(index)
    }

    fn nesting_limit(&self) -> i32 {
        i32::MAX
    }
}

impl<A> BuilderArena for BuilderArenaImpl<A>
where
    A: Allocator,
{
    fn allocate_new_segment(&mut self, minimum_size: u32) -> u32 {
        let allocator = self.allocator.as_mut().expect("allocator already taken");
        let (ptr, capacity) = allocator.allocate_segment(minimum_size);
        self.segments.push(SegmentBuilder {
            ptr,
            capacity,
            allocated: 0,
        });
        (self.segments.len() - 1) as u32
    }

    fn try_allocate_in_segment(&mut self, segment_id: u32, amount: u32) -> Option<u32> {
        let seg = self.segments.get_mut(segment_id as usize)?;
        if seg.capacity - seg.allocated >= amount {
            let offset = seg.allocated;
            seg.allocated += amount;
            Some(offset)
        } else {
            None
        }
    }

    fn allocate(&mut self, preferred_segment_id: u32, amount: u32) -> (u32, u32) {
        if let Some(offset) = self.try_allocate_in_segment(preferred_segment_id, amount) {
            return (preferred_segment_id, offset);
        }
        for id in 0..self.segments.len() as u32 {
            if id == preferred_segment_id {
                continue;
            }
            if let Some(offset) = self.try_allocate_in_segment(id, amount) {
                return (id, offset);
            }
        }
        let new_id = self.allocate_new_segment(amount);
        let offset = self
            .try_allocate_in_segment(new_id, amount)
            .expect("freshly allocated segment has room");
        (new_id, offset)
    }

    fn segment_ptr_mut(&mut self, segment_id: u32, word_offset: u32) -> *mut u8 {
        let seg = &self.segments[segment_id as usize];
        unsafe { seg.ptr.add(word_offset as usize * BYTES_PER_WORD) }
    }

    fn get_segment_mut(&mut self, id: u32) -> (*mut u8, u32) {
        let seg = &self.segments[id as usize];
        (seg.ptr, seg.allocated)
    }

    fn get_segments_for_output(&self) -> OutputSegments<'_> {
        if self.segments.len() == 1 {
            let seg = &self.segments[0];
            OutputSegments::SingleSegment([unsafe {
                core::slice::from_raw_parts(seg.ptr, seg.allocated as usize * BYTES_PER_WORD)
            }])
        } else {
            let v = self
                .segments
                .iter()
                .map(|seg| unsafe {
                    core::slice::from_raw_parts(seg.ptr, seg.allocated as usize * BYTES_PER_WORD)
                })
                .collect();
            OutputSegments::MultiSegment(v)
        }
    }

    fn as_reader(&self) -> &dyn ReaderArena {
        self
    }

    fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn local_cap_table(&mut self) -> &mut CapTable {
        &mut self.cap_table
    }

    fn try_reclaim(&mut self, segment_id: u32, end_offset: u32, amount: u32) -> bool {
        let Some(seg) = self.segments.get_mut(segment_id as usize) else {
            return false;
        };
        if seg.allocated != end_offset {
            return false;
        }
        seg.allocated -= amount;
        let ptr = unsafe { seg.ptr.add(seg.allocated as usize * BYTES_PER_WORD) };
        unsafe {
            core::ptr::write_bytes(ptr, 0, amount as usize * BYTES_PER_WORD);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_limiter_decrements_and_errors_on_exhaustion() {
        let limiter = ReadLimiter::new(Some(10));
        assert!(limiter.can_advance(4).is_ok());
        assert!(limiter.can_advance(4).is_ok());
        assert!(limiter.can_advance(3).is_err());
        assert!(limiter.can_advance(2).is_ok());
    }

    #[test]
    fn unlimited_read_limiter_never_errors() {
        let limiter = ReadLimiter::new(None);
        assert!(limiter.can_advance(u64::MAX - 1).is_ok());
    }
}
