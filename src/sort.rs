//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;
use std::vec;

use crate::buffer::{BufferConsistencyError, SegmentedBuffer};
use crate::chunk::SortedRun;
use crate::config::SortConfig;
use crate::merger::merge_sources;
use crate::presort::read_max;
use crate::record::{RecordSink, RecordSource, RecordStrategy};
use crate::state::{CancelCause, Phase, SortState};

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Sorter configuration is not usable.
    InvalidConfig(String),
    /// Temporary file creation error.
    TempFile(io::Error),
    /// Record source or sink I/O error.
    IO(io::Error),
    /// Sorting was cancelled with a cause.
    Cancelled(CancelCause),
    /// Buffered records got lost or duplicated.
    Buffer(BufferConsistencyError),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InvalidConfig(_) => None,
            SortError::TempFile(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::Cancelled(err) => Some(err.as_ref()),
            SortError::Buffer(err) => Some(err),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidConfig(msg) => write!(f, "invalid sorter configuration: {}", msg),
            SortError::TempFile(err) => write!(f, "temporary file not created: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::Cancelled(err) => write!(f, "sorting cancelled: {}", err),
            SortError::Buffer(err) => write!(f, "chunk buffer corrupted: {}", err),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::IO(err)
    }
}

/// How a sort invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOutcome {
    /// Every record was written to the sink.
    Completed,
    /// Sorting was cancelled without a cause; nothing was written.
    Cancelled,
}

impl SortOutcome {
    pub fn is_completed(&self) -> bool {
        *self == SortOutcome::Completed
    }
}

/// Number of merge rounds needed for `runs` sorted runs, the final merge included.
pub(crate) fn merge_round_count(runs: usize, merge_factor: usize) -> usize {
    let mut rounds = 1;
    let mut runs = runs;
    while runs > merge_factor {
        rounds += 1;
        runs = (runs + merge_factor - 1) / merge_factor;
    }

    return rounds;
}

/// External sorter.
///
/// Drives a sort from the input to the sorted output: presorting fills a memory-bounded buffer, sorts it and
/// writes it out as a sorted run; merging then combines at most `merge_factor` runs at a time until a single
/// final merge can stream the result. Inputs that fit in one buffer never touch the disk.
///
/// A sorter is not meant to be used by several threads at once. Use [`Sorter::state`] to observe progress or
/// to cancel a running sort from another thread.
pub struct Sorter<T, S>
where
    S: RecordStrategy<T>,
{
    /// Sorting parameters.
    config: SortConfig,
    /// Record order and run file encoding.
    strategy: Arc<S>,
    /// Progress and cancellation shared with observers.
    state: Arc<SortState>,
    /// Presort buffer, reused across invocations.
    buffer: SegmentedBuffer<T>,
    /// Sorted runs not consumed yet.
    runs: Vec<SortedRun>,

    /// Record type.
    item_type: PhantomData<T>,
}

impl<T, S> Sorter<T, S>
where
    T: 'static,
    S: RecordStrategy<T> + 'static,
{
    /// Creates a new sorter.
    ///
    /// # Arguments
    /// * `config` - Sorting parameters
    /// * `strategy` - Record order and encoding used for sorted runs
    pub fn new(config: SortConfig, strategy: S) -> Result<Self, SortError> {
        config.validate()?;
        log::info!(
            "initializing sorter (merge factor: {}, memory: {} bytes, temporary files: {:?})",
            config.merge_factor(),
            config.max_memory(),
            config.temp_provider()
        );

        return Ok(Sorter {
            config,
            strategy: Arc::new(strategy),
            state: Arc::new(SortState::new()),
            buffer: SegmentedBuffer::new(),
            runs: Vec::new(),
            item_type: PhantomData,
        });
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Shared progress and cancellation handle.
    pub fn state(&self) -> Arc<SortState> {
        Arc::clone(&self.state)
    }

    /// Sorts records read from `input` and writes them to `output`, both encoded by the sorter strategy.
    pub fn sort_stream<R, W>(&mut self, input: R, output: W) -> Result<SortOutcome, SortError>
    where
        R: Read + 'static,
        W: Write + 'static,
    {
        let (reader, writer) = match self.config.io_buffer_size() {
            Some(buf_size) => (
                io::BufReader::with_capacity(buf_size, input),
                io::BufWriter::with_capacity(buf_size, output),
            ),
            None => (io::BufReader::new(input), io::BufWriter::new(output)),
        };

        let mut source = self.strategy.source(Box::new(reader));
        let mut sink = self.strategy.sink(Box::new(writer));

        self.sort(&mut *source, &mut *sink)
    }

    /// Sorts records from `source` into `sink`.
    ///
    /// The source is closed once consumed. The sink is closed after the last record has been written;
    /// it is left untouched if the sort is cancelled.
    pub fn sort(
        &mut self,
        source: &mut dyn RecordSource<T>,
        sink: &mut dyn RecordSink<T>,
    ) -> Result<SortOutcome, SortError> {
        let sorted = match self.sort_iter(source)? {
            Some(sorted) => sorted,
            None => return Ok(SortOutcome::Cancelled),
        };

        for item in sorted {
            sink.push(item?)?;
        }
        sink.close()?;
        log::debug!("sorted data written");

        return Ok(SortOutcome::Completed);
    }

    /// Sorts records from `source`.
    /// Returns an iterator over the sorted records, or [`None`] if the sort was cancelled.
    ///
    /// Temporary files still needed by the iterator are owned by it and removed once it is exhausted or dropped.
    pub fn sort_iter(&mut self, source: &mut dyn RecordSource<T>) -> Result<Option<Sorted<T>>, SortError> {
        self.close();
        self.state.start();

        let result = self.run(source);

        if let Err(err) = source.close() {
            log::warn!("input closing error: {}", err);
        }
        if result.is_err() {
            self.discard_runs();
        }

        return result;
    }

    /// Deletes the sorted runs of an unfinished invocation.
    pub fn close(&mut self) {
        self.discard_runs();
    }

    fn run(&mut self, source: &mut dyn RecordSource<T>) -> Result<Option<Sorted<T>>, SortError> {
        log::debug!("pre-sorting input ...");
        let mut items = read_max(source, &mut self.buffer, self.config.max_memory(), None)?;
        if self.cancel_requested()? {
            return Ok(None);
        }
        self.sort_items(&mut items);

        let sorted = match source.pull_next()? {
            None => {
                source.close()?;
                log::debug!("input fits in memory ({} records), no merging needed", items.len());
                self.state.set_phase(Phase::Sorting);
                Sorted::in_memory(items)
            }
            Some(next) => {
                self.write_run(items)?;
                self.presort(source, next)?;
                source.close()?;
                self.state.set_phase(Phase::Sorting);
                log::debug!("pre-sorting done ({} runs)", self.runs.len());

                if self.cancel_requested()? {
                    return Ok(None);
                }
                let runs = self.merge()?;
                let merged = self.open_merged(&runs)?;
                Sorted::merged(merged, runs)
            }
        };

        if self.cancel_requested()? {
            return Ok(None);
        }
        self.state.set_phase(Phase::Complete);

        return Ok(Some(sorted));
    }

    fn presort(&mut self, source: &mut dyn RecordSource<T>, first: T) -> Result<(), SortError> {
        let mut next = first;
        loop {
            let mut items = read_max(source, &mut self.buffer, self.config.max_memory(), Some(next))?;
            self.sort_items(&mut items);
            self.write_run(items)?;

            match source.pull_next()? {
                Some(item) => next = item,
                None => return Ok(()),
            }
        }
    }

    fn sort_items(&self, items: &mut [T]) {
        log::debug!("sorting chunk data ({} records) ...", items.len());
        let strategy = &self.strategy;
        items.sort_by(|a, b| strategy.compare(a, b));
    }

    fn write_run(&mut self, items: Vec<T>) -> Result<(), SortError> {
        log::debug!("saving chunk data");
        let mut writer = SortedRun::create(
            self.config.temp_provider(),
            &*self.strategy,
            self.config.io_buffer_size(),
        )
        .map_err(SortError::TempFile)?;

        for item in items {
            writer.push(item)?;
        }
        self.runs.push(writer.finish()?);
        self.state.add_presort_run();

        return Ok(());
    }

    /// Runs intermediate merge rounds until at most `merge_factor` runs remain and hands them over.
    fn merge(&mut self) -> Result<Vec<SortedRun>, SortError> {
        let merge_factor = self.config.merge_factor();
        let rounds = merge_round_count(self.runs.len(), merge_factor);
        self.state.start_merging(rounds);
        log::debug!("merging {} runs in {} rounds", self.runs.len(), rounds);

        while self.runs.len() > merge_factor {
            let mut merged = Vec::with_capacity((self.runs.len() + merge_factor - 1) / merge_factor);
            while !self.runs.is_empty() {
                let group_size = merge_factor.min(self.runs.len());
                let group = Vec::from_iter(self.runs.drain(..group_size));
                merged.push(self.merge_group(group)?);
            }

            self.runs = merged;
            self.state.complete_merge_round();
            log::debug!(
                "merge round {}/{} done ({} runs left)",
                self.state.current_merge_round(),
                rounds,
                self.runs.len()
            );
        }

        return Ok(mem::take(&mut self.runs));
    }

    /// Merges a group of runs into a single new run and deletes the group.
    fn merge_group(&self, group: Vec<SortedRun>) -> Result<SortedRun, SortError> {
        let mut merged = self.open_merged(&group)?;
        let mut writer = SortedRun::create(
            self.config.temp_provider(),
            &*self.strategy,
            self.config.io_buffer_size(),
        )
        .map_err(SortError::TempFile)?;

        while let Some(item) = merged.pull_next()? {
            writer.push(item)?;
        }
        merged.close()?;
        let run = writer.finish()?;

        delete_runs(group);

        return Ok(run);
    }

    fn open_merged(&self, runs: &[SortedRun]) -> Result<Box<dyn RecordSource<T>>, SortError> {
        let mut sources = Vec::with_capacity(runs.len());
        for run in runs {
            sources.push(run.open(&*self.strategy, self.config.io_buffer_size())?);
        }

        let strategy = Arc::clone(&self.strategy);
        let merged = merge_sources(move |a: &T, b: &T| strategy.compare(a, b), sources)?;

        return Ok(merged);
    }

    /// Cancellation checkpoint. Cleans up and tells whether the sort has to stop without a result;
    /// fails with the captured cause if one was given.
    fn cancel_requested(&mut self) -> Result<bool, SortError> {
        let cause = match self.state.take_cancel_request() {
            Some(cause) => cause,
            None => return Ok(false),
        };

        log::info!("sorting cancelled");
        self.discard_runs();

        match cause {
            Some(cause) => Err(SortError::Cancelled(cause)),
            None => Ok(true),
        }
    }

    fn discard_runs(&mut self) {
        delete_runs(mem::take(&mut self.runs));
    }
}

fn delete_runs(runs: Vec<SortedRun>) {
    for run in runs {
        let path = run.path().to_path_buf();
        if let Err(err) = run.delete() {
            log::warn!("temporary file {} not deleted: {}", path.display(), err);
        }
    }
}

enum SortedInner<T> {
    Memory(vec::IntoIter<T>),
    Merged {
        reader: Box<dyn RecordSource<T>>,
        runs: Vec<SortedRun>,
    },
}

/// Sorted output of [`Sorter::sort_iter`].
pub struct Sorted<T> {
    inner: SortedInner<T>,
}

impl<T> Sorted<T> {
    fn in_memory(items: Vec<T>) -> Self {
        Sorted {
            inner: SortedInner::Memory(items.into_iter()),
        }
    }

    fn merged(reader: Box<dyn RecordSource<T>>, runs: Vec<SortedRun>) -> Self {
        Sorted {
            inner: SortedInner::Merged { reader, runs },
        }
    }

    fn release(&mut self) {
        let inner = mem::replace(&mut self.inner, SortedInner::Memory(Vec::new().into_iter()));
        if let SortedInner::Merged { mut reader, runs } = inner {
            if let Err(err) = reader.close() {
                log::warn!("sorted runs closing error: {}", err);
            }
            delete_runs(runs);
        }
    }
}

impl<T> Iterator for Sorted<T> {
    type Item = Result<T, SortError>;

    /// Returns the next record in sorted order.
    fn next(&mut self) -> Option<Self::Item> {
        let next = match &mut self.inner {
            SortedInner::Memory(items) => return items.next().map(Ok),
            SortedInner::Merged { reader, .. } => reader.pull_next(),
        };

        match next {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.release();
                None
            }
            Err(err) => {
                self.release();
                Some(Err(SortError::IO(err)))
            }
        }
    }
}

impl<T> Drop for Sorted<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Debug for Sorted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            SortedInner::Memory(items) => f.debug_struct("Sorted").field("in_memory", &items.len()).finish(),
            SortedInner::Merged { runs, .. } => f.debug_struct("Sorted").field("runs", &runs.len()).finish(),
        }
    }
}
