//! Segmented chunk buffer.
//!
//! Accumulates one presort unit of records in a chain of segments instead of a single growing vector, so that
//! large inputs never trigger a reallocation of everything buffered so far. The largest segment of a completed
//! unit is kept and handed out again by the next [`SegmentedBuffer::reset_and_start`] call.

use std::error::Error;
use std::fmt;

/// Capacity of the first segment of a fresh buffer.
pub const INITIAL_SEGMENT_SIZE: usize = 1024;

/// Segments are doubled until this capacity is reached, then grown by 25%.
pub const MAX_DOUBLING_SEGMENT_SIZE: usize = 1 << 14;

/// Raised when the combined buffer does not hold the number of entries the chain accounted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConsistencyError {
    pub expected: usize,
    pub actual: usize,
}

impl Error for BufferConsistencyError {}

impl fmt::Display for BufferConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "should have gotten {} entries, got {}", self.expected, self.actual)
    }
}

/// Fixed-capacity run of buffered records.
#[derive(Debug)]
pub struct Segment<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> Segment<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Segment {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds an item to the segment. The caller is expected to check [`Segment::is_full`] first.
    pub fn push(&mut self, item: T) {
        debug_assert!(!self.is_full(), "push into a full segment");
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Nominal capacity of the segment.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    fn next_capacity(&self) -> usize {
        if self.capacity < MAX_DOUBLING_SEGMENT_SIZE {
            self.capacity + self.capacity
        } else {
            self.capacity + (self.capacity >> 2)
        }
    }
}

/// Chain of completed segments plus a reusable free segment.
pub struct SegmentedBuffer<T> {
    chain: Vec<Segment<T>>,
    buffered_count: usize,
    free: Option<Segment<T>>,
}

impl<T> SegmentedBuffer<T> {
    pub fn new() -> Self {
        SegmentedBuffer {
            chain: Vec::new(),
            buffered_count: 0,
            free: None,
        }
    }

    /// Starts a new buffering pass. Drops whatever a previous pass left linked and returns an empty segment,
    /// reusing the retained free segment if there is one.
    pub fn reset_and_start(&mut self) -> Segment<T> {
        if !self.chain.is_empty() {
            self.reset();
        }

        match self.free.take() {
            Some(mut segment) => {
                segment.items.clear();
                segment
            }
            None => Segment::with_capacity(INITIAL_SEGMENT_SIZE),
        }
    }

    /// Links a filled segment into the chain and returns the next, larger segment to fill.
    pub fn append_completed_chunk(&mut self, full_segment: Segment<T>) -> Segment<T> {
        let next_capacity = full_segment.next_capacity();
        self.buffered_count += full_segment.len();
        self.chain.push(full_segment);

        return Segment::with_capacity(next_capacity);
    }

    /// Combines every linked segment and the first `used` entries of `last_segment` into one vector, in order.
    /// Afterwards the chain is empty and the largest linked segment is retained for reuse.
    pub fn complete_and_clear_buffer(
        &mut self,
        mut last_segment: Segment<T>,
        used: usize,
    ) -> Result<Vec<T>, BufferConsistencyError> {
        let expected = self.buffered_count + used;
        let mut result = Vec::with_capacity(expected);

        for segment in self.chain.iter_mut() {
            result.append(&mut segment.items);
        }
        last_segment.items.truncate(used);
        result.append(&mut last_segment.items);

        if self.chain.is_empty() {
            self.free = Some(last_segment);
        }
        self.reset();

        if result.len() != expected {
            return Err(BufferConsistencyError {
                expected,
                actual: result.len(),
            });
        }

        return Ok(result);
    }

    /// Capacity of the retained free segment, zero if there is none.
    pub fn initial_capacity(&self) -> usize {
        self.free.as_ref().map_or(0, Segment::capacity)
    }

    /// Number of entries held by linked segments.
    pub fn buffered_size(&self) -> usize {
        self.buffered_count
    }

    fn reset(&mut self) {
        let largest = self
            .chain
            .iter()
            .enumerate()
            .max_by_key(|(_, segment)| segment.capacity)
            .map(|(idx, _)| idx);

        if let Some(idx) = largest {
            let mut segment = self.chain.swap_remove(idx);
            segment.items.clear();
            self.free = Some(segment);
        }

        self.chain.clear();
        self.buffered_count = 0;
    }
}

impl<T> Default for SegmentedBuffer<T> {
    fn default() -> Self {
        SegmentedBuffer::new()
    }
}
