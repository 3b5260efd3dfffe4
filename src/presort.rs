//! Memory-bounded reading of one presort unit.

use std::cmp;

use crate::buffer::SegmentedBuffer;
use crate::record::RecordSource;
use crate::sort::SortError;

/// Bookkeeping cost of one buffer slot.
pub const ENTRY_SLOT_SIZE: i64 = 8;

/// Headroom kept free even when every record seen so far is smaller.
pub const MIN_HEADROOM: i64 = 256;

/// Reads as many records as fit into `max_memory` bytes.
///
/// `first` is a record already pulled from `source` and is placed at the front of the result. Reading stops when
/// the source is exhausted, or when the remaining budget drops below the largest record size observed so far
/// (at least [`MIN_HEADROOM`]). Every buffer segment charges [`ENTRY_SLOT_SIZE`] per slot and every admitted
/// record charges its estimated size. At least one record is always admitted, even one larger than the whole
/// budget, so the resident size never exceeds `max_memory` by more than one record. The source is left
/// positioned right after the last admitted record and is not closed.
pub fn read_max<T>(
    source: &mut dyn RecordSource<T>,
    buffer: &mut SegmentedBuffer<T>,
    max_memory: u64,
    first: Option<T>,
) -> Result<Vec<T>, SortError> {
    let mut memory = i64::try_from(max_memory).unwrap_or(i64::MAX);
    let mut segment = buffer.reset_and_start();
    let mut min_memory_needed = MIN_HEADROOM;
    let lookahead = first.is_some();

    if let Some(first) = first {
        let size = estimate(source, &first);
        min_memory_needed = cmp::max(ENTRY_SLOT_SIZE + size, MIN_HEADROOM);
        memory -= size;
        segment.push(first);
    }
    memory -= ENTRY_SLOT_SIZE * segment.capacity() as i64;

    // a lookahead record that used up the budget on its own forms the unit by itself
    let mut has_room = !(lookahead && memory < min_memory_needed);
    while has_room {
        let item = match source.pull_next()? {
            Some(item) => item,
            None => break,
        };
        let size = estimate(source, &item);
        min_memory_needed = cmp::max(min_memory_needed, size);

        if segment.is_full() {
            segment = buffer.append_completed_chunk(segment);
            memory -= ENTRY_SLOT_SIZE * segment.capacity() as i64;
        }
        segment.push(item);
        memory -= size;

        has_room = memory >= min_memory_needed;
    }

    let used = segment.len();
    let items = buffer
        .complete_and_clear_buffer(segment, used)
        .map_err(SortError::Buffer)?;

    return Ok(items);
}

fn estimate<T>(source: &dyn RecordSource<T>, item: &T) -> i64 {
    i64::try_from(source.estimate_size(item)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::read_max;
    use crate::buffer::SegmentedBuffer;
    use crate::record::{IterSource, RecordSource};

    fn source_of(items: Vec<u32>, size: usize) -> impl RecordSource<u32> {
        IterSource::new(items.into_iter().map(Ok::<u32, io::Error>), move |_: &u32| size)
    }

    #[test]
    fn test_fits_entirely() {
        let mut source = source_of(Vec::from_iter(0..10), 16);
        let mut buffer = SegmentedBuffer::new();

        let items = read_max(&mut source, &mut buffer, 1024 * 1024, None).unwrap();
        assert_eq!(items, Vec::from_iter(0..10));
        assert_eq!(source.pull_next().unwrap(), None);
    }

    #[test]
    fn test_oversized_record_is_admitted() {
        let mut source = source_of(vec![1, 2, 3], 1_000);
        let mut buffer = SegmentedBuffer::new();

        let items = read_max(&mut source, &mut buffer, 10, None).unwrap();
        assert_eq!(items, vec![1]);
        // the source is positioned right after the admitted record
        assert_eq!(source.pull_next().unwrap(), Some(2));
    }

    #[test]
    fn test_lookahead_record_comes_first() {
        let mut source = source_of(vec![7, 8, 9], 1_000);
        let mut buffer = SegmentedBuffer::new();

        let items = read_max(&mut source, &mut buffer, 10, Some(6)).unwrap();
        assert_eq!(items, vec![6]);
        assert_eq!(source.pull_next().unwrap(), Some(7));

        let items = read_max(&mut source, &mut buffer, 1024 * 1024, Some(7)).unwrap();
        assert_eq!(items, vec![7, 8, 9]);
        assert_eq!(source.pull_next().unwrap(), None);
    }

    #[test]
    fn test_empty_source() {
        let mut source = source_of(vec![], 1);
        let mut buffer = SegmentedBuffer::new();

        let items = read_max(&mut source, &mut buffer, 1024, None).unwrap();
        assert!(items.is_empty());
    }

    #[rstest]
    #[case(100_000, 100)]
    #[case(100_000, 3_000)]
    #[case(1_000_000, 24)]
    #[case(50_000, 60_000)]
    fn test_memory_bound(#[case] max_memory: u64, #[case] record_size: usize) {
        let total = 50_000;
        let mut source = source_of(Vec::from_iter(0..total), record_size);
        let mut buffer = SegmentedBuffer::new();

        let mut first = None;
        let mut seen = 0;
        loop {
            let items = read_max(&mut source, &mut buffer, max_memory, first.take()).unwrap();
            assert!(!items.is_empty());

            let resident = (items.len() * record_size) as u64;
            assert!(
                resident <= max_memory + record_size as u64,
                "resident={}, max_memory={}",
                resident,
                max_memory
            );
            seen += items.len();

            match source.pull_next().unwrap() {
                Some(item) => first = Some(item),
                None => break,
            }
        }
        assert_eq!(seen, total as usize);
    }

    #[test]
    fn test_segments_are_chained() {
        let mut source = source_of(Vec::from_iter(0..5_000), 8);
        let mut buffer = SegmentedBuffer::new();

        let items = read_max(&mut source, &mut buffer, 64 * 1024 * 1024, None).unwrap();
        assert_eq!(items, Vec::from_iter(0..5_000));
        // 1024 + 2048 slots were linked, the 2048 one is kept for the next pass
        assert_eq!(buffer.initial_capacity(), 2048);
    }
}
