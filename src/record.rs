//! Record source/sink capabilities.

use std::cmp::Ordering;
use std::io;
use std::io::prelude::*;

/// Pull-based record input.
pub trait RecordSource<T> {
    /// Reads the next record. Returns [`None`] once the input is exhausted.
    fn pull_next(&mut self) -> io::Result<Option<T>>;

    /// Estimates the resident memory taken by `item`, in bytes.
    fn estimate_size(&self, item: &T) -> usize;

    /// Releases the underlying resources. Must be safe to call several times.
    /// Implementations release their resources on their own once the end of input is reached.
    fn close(&mut self) -> io::Result<()>;
}

/// Push-based record output.
pub trait RecordSink<T> {
    fn push(&mut self, item: T) -> io::Result<()>;

    /// Flushes and releases the underlying output.
    fn close(&mut self) -> io::Result<()>;
}

/// Binds record sources and sinks to a byte-level transport.
pub trait RecordCodec<T> {
    fn source(&self, input: Box<dyn BufRead>) -> Box<dyn RecordSource<T>>;

    fn sink(&self, output: Box<dyn Write>) -> Box<dyn RecordSink<T>>;
}

/// A codec together with the order the sorter should produce.
pub trait RecordStrategy<T>: RecordCodec<T> {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

impl<T, R: RecordSource<T> + ?Sized> RecordSource<T> for Box<R> {
    fn pull_next(&mut self) -> io::Result<Option<T>> {
        (**self).pull_next()
    }

    fn estimate_size(&self, item: &T) -> usize {
        (**self).estimate_size(item)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T, W: RecordSink<T> + ?Sized> RecordSink<T> for Box<W> {
    fn push(&mut self, item: T) -> io::Result<()> {
        (**self).push(item)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Source over an iterator of fallible items with a caller-supplied size estimator.
pub struct IterSource<I, F> {
    inner: Option<I>,
    estimator: F,
}

impl<T, I, F> IterSource<I, F>
where
    I: Iterator<Item = io::Result<T>>,
    F: Fn(&T) -> usize,
{
    pub fn new(input: impl IntoIterator<IntoIter = I>, estimator: F) -> Self {
        IterSource {
            inner: Some(input.into_iter()),
            estimator,
        }
    }
}

impl<T, I, F> RecordSource<T> for IterSource<I, F>
where
    I: Iterator<Item = io::Result<T>>,
    F: Fn(&T) -> usize,
{
    fn pull_next(&mut self) -> io::Result<Option<T>> {
        let next = match self.inner.as_mut() {
            Some(inner) => inner.next().transpose()?,
            None => None,
        };
        if next.is_none() {
            self.inner = None;
        }

        return Ok(next);
    }

    fn estimate_size(&self, item: &T) -> usize {
        (self.estimator)(item)
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Sink collecting records into memory.
#[derive(Debug)]
pub struct VecSink<T> {
    items: Vec<T>,
    closed: bool,
}

impl<T> VecSink<T> {
    pub fn new() -> Self {
        VecSink {
            items: Vec::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

impl<T> Default for VecSink<T> {
    fn default() -> Self {
        VecSink::new()
    }
}

impl<T> RecordSink<T> for VecSink<T> {
    fn push(&mut self, item: T) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "push into a closed sink"));
        }
        self.items.push(item);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind};

    use super::{IterSource, RecordSink, RecordSource, VecSink};

    #[test]
    fn test_iter_source() {
        let mut source = IterSource::new(vec![Ok(1), Ok(2)], |_: &i32| 4);

        assert_eq!(source.estimate_size(&1), 4);
        assert_eq!(source.pull_next().unwrap(), Some(1));
        assert_eq!(source.pull_next().unwrap(), Some(2));
        assert_eq!(source.pull_next().unwrap(), None);
        assert_eq!(source.pull_next().unwrap(), None);
        source.close().unwrap();
        source.close().unwrap();
    }

    #[test]
    fn test_iter_source_error() {
        let input: Vec<io::Result<i32>> = vec![Err(io::Error::new(ErrorKind::Other, "test error"))];
        let mut source = IterSource::new(input, |_: &i32| 4);

        let err = source.pull_next().unwrap_err();
        assert_eq!(err.to_string(), "test error");
    }

    #[test]
    fn test_vec_sink() {
        let mut sink = VecSink::new();
        sink.push("a").unwrap();
        sink.close().unwrap();

        assert!(sink.push("b").is_err());
        assert!(sink.is_closed());
        assert_eq!(sink.into_inner(), vec!["a"]);
    }
}
