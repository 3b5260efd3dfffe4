//! Sorted runs stored in temporary files.

use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempPath;

use crate::record::{RecordCodec, RecordSink, RecordSource};
use crate::temp::TempResourceProvider;

/// Already sorted sequence of records backed by a temporary file.
/// The file is deleted by [`SortedRun::delete`] or, failing that, when the run is dropped.
#[derive(Debug)]
pub struct SortedRun {
    path: TempPath,
    records: usize,
}

impl SortedRun {
    /// Opens a writer for a new run backed by a file obtained from `provider`.
    pub fn create<T>(
        provider: &dyn TempResourceProvider,
        codec: &dyn RecordCodec<T>,
        buf_size: Option<usize>,
    ) -> io::Result<RunWriter<T>> {
        let tmp_file = provider.provide()?;
        let file = tmp_file.as_file().try_clone()?;
        let path = tmp_file.into_temp_path();

        let writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        return Ok(RunWriter {
            sink: codec.sink(Box::new(writer)),
            path,
            records: 0,
        });
    }

    /// Opens a source reading the run from the beginning.
    pub fn open<T>(&self, codec: &dyn RecordCodec<T>, buf_size: Option<usize>) -> io::Result<Box<dyn RecordSource<T>>> {
        let file = fs::File::open(&self.path)?;

        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        Ok(codec.source(Box::new(reader)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the run.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Removes the backing file.
    pub fn delete(self) -> io::Result<()> {
        self.path.close()
    }
}

/// Writes records into a new [`SortedRun`]. Dropping an unfinished writer removes its file.
pub struct RunWriter<T> {
    sink: Box<dyn RecordSink<T>>,
    path: TempPath,
    records: usize,
}

impl<T> RunWriter<T> {
    pub fn push(&mut self, item: T) -> io::Result<()> {
        self.sink.push(item)?;
        self.records += 1;
        Ok(())
    }

    pub fn finish(mut self) -> io::Result<SortedRun> {
        self.sink.close()?;

        return Ok(SortedRun {
            path: self.path,
            records: self.records,
        });
    }
}
