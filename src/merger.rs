//! Tournament merger.
//!
//! Sorted sources are merged through a binary tree of [`PairwiseMerger`]s built by [`merge_sources`].
//! Nothing is materialized: every record is pulled lazily through the tree, so merging `n` sources costs
//! about log2(`n`) comparisons per record.

use std::cmp::Ordering;
use std::io;

use crate::record::RecordSource;

/// Merges two sorted sources into one sorted source.
///
/// When both heads compare equal the head of the first source is yielded first.
/// Both inputs are closed as soon as they are exhausted.
pub struct PairwiseMerger<T, F> {
    first: Box<dyn RecordSource<T>>,
    second: Box<dyn RecordSource<T>>,
    first_head: Option<T>,
    second_head: Option<T>,
    compare: F,
    closed: bool,
}

impl<T, F> PairwiseMerger<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    /// Creates a merger, reading the first record of both inputs.
    pub fn new(
        compare: F,
        mut first: Box<dyn RecordSource<T>>,
        mut second: Box<dyn RecordSource<T>>,
    ) -> io::Result<Self> {
        let first_head = first.pull_next()?;
        let second_head = second.pull_next()?;

        return Ok(PairwiseMerger {
            first,
            second,
            first_head,
            second_head,
            compare,
            closed: false,
        });
    }
}

impl<T, F> RecordSource<T> for PairwiseMerger<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn pull_next(&mut self) -> io::Result<Option<T>> {
        let take_first = match (&self.first_head, &self.second_head) {
            (None, None) => None,
            (Some(_), None) => Some(true),
            (None, Some(_)) => Some(false),
            (Some(first), Some(second)) => Some((self.compare)(first, second) != Ordering::Greater),
        };

        let take_first = match take_first {
            Some(take_first) => take_first,
            None => {
                self.close()?;
                return Ok(None);
            }
        };

        let result = if take_first {
            let next = self.first.pull_next()?;
            std::mem::replace(&mut self.first_head, next)
        } else {
            let next = self.second.pull_next()?;
            std::mem::replace(&mut self.second_head, next)
        };

        return Ok(result);
    }

    fn estimate_size(&self, item: &T) -> usize {
        self.first.estimate_size(item)
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            let first = self.first.close();
            let second = self.second.close();
            first.and(second)?;
        }
        Ok(())
    }
}

/// Source without records.
pub struct EmptySource;

impl<T> RecordSource<T> for EmptySource {
    fn pull_next(&mut self) -> io::Result<Option<T>> {
        Ok(None)
    }

    fn estimate_size(&self, _item: &T) -> usize {
        0
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Merges any number of sorted sources into a single lazily merged source.
///
/// Adjacent sources are paired into [`PairwiseMerger`]s (an odd last source is carried over as is) until at most
/// two remain. An empty input list gives an empty source.
pub fn merge_sources<T, F>(
    compare: F,
    mut sources: Vec<Box<dyn RecordSource<T>>>,
) -> io::Result<Box<dyn RecordSource<T>>>
where
    T: 'static,
    F: Fn(&T, &T) -> Ordering + Clone + 'static,
{
    while sources.len() > 2 {
        let mut paired = Vec::with_capacity(1 + (sources.len() >> 1));
        let mut inputs = sources.into_iter();

        while let Some(first) = inputs.next() {
            match inputs.next() {
                Some(second) => {
                    let merger = PairwiseMerger::new(compare.clone(), first, second)?;
                    paired.push(Box::new(merger) as Box<dyn RecordSource<T>>);
                }
                None => paired.push(first),
            }
        }
        sources = paired;
    }

    let mut inputs = sources.into_iter();
    let merged: Box<dyn RecordSource<T>> = match (inputs.next(), inputs.next()) {
        (None, _) => Box::new(EmptySource),
        (Some(only), None) => only,
        (Some(first), Some(second)) => Box::new(PairwiseMerger::new(compare, first, second)?),
    };

    return Ok(merged);
}
