//! Record strategies: codecs binding records to byte streams, and the orders to sort them by.

use std::cmp::Ordering;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::mem;

use crate::record::{RecordCodec, RecordSink, RecordSource, RecordStrategy};

/// Heap-backed records carry a vector header besides their payload.
const VEC_HEADER_SIZE: usize = mem::size_of::<Vec<u8>>();

fn estimate_heap_size(payload: usize) -> usize {
    // payload rounded up to 8-byte alignment
    VEC_HEADER_SIZE + ((payload + 7) & !7)
}

fn strip_line_ending(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

fn closed_sink_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "record sink is closed")
}

/// Raw byte lines ordered by unsigned lexicographic byte comparison.
/// A line that is a prefix of another sorts first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteLines;

/// Reads `\n` (or `\r\n`) terminated lines as raw bytes.
pub struct ByteLineSource {
    reader: Option<Box<dyn BufRead>>,
}

impl RecordSource<Vec<u8>> for ByteLineSource {
    fn pull_next(&mut self) -> io::Result<Option<Vec<u8>>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line)? == 0 {
            self.reader = None;
            return Ok(None);
        }
        strip_line_ending(&mut line);

        return Ok(Some(line));
    }

    fn estimate_size(&self, item: &Vec<u8>) -> usize {
        estimate_heap_size(item.len())
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }
}

/// Writes raw byte lines, each followed by `\n`.
pub struct ByteLineSink {
    writer: Option<Box<dyn Write>>,
}

impl RecordSink<Vec<u8>> for ByteLineSink {
    fn push(&mut self, item: Vec<u8>) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed_sink_error)?;
        writer.write_all(&item)?;
        writer.write_all(b"\n")
    }

    fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl RecordCodec<Vec<u8>> for ByteLines {
    fn source(&self, input: Box<dyn BufRead>) -> Box<dyn RecordSource<Vec<u8>>> {
        Box::new(ByteLineSource { reader: Some(input) })
    }

    fn sink(&self, output: Box<dyn Write>) -> Box<dyn RecordSink<Vec<u8>>> {
        Box::new(ByteLineSink { writer: Some(output) })
    }
}

impl RecordStrategy<Vec<u8>> for ByteLines {
    fn compare(&self, a: &Vec<u8>, b: &Vec<u8>) -> Ordering {
        a.as_slice().cmp(b.as_slice())
    }
}

/// UTF-8 text lines. Only a codec: other strategies build their order on top of it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLines;

/// Reads UTF-8 lines. Invalid UTF-8 is reported as [`io::ErrorKind::InvalidData`].
pub struct TextLineSource {
    reader: Option<Box<dyn BufRead>>,
}

impl RecordSource<String> for TextLineSource {
    fn pull_next(&mut self) -> io::Result<Option<String>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line)? == 0 {
            self.reader = None;
            return Ok(None);
        }
        strip_line_ending(&mut line);

        String::from_utf8(line)
            .map(Some)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn estimate_size(&self, item: &String) -> usize {
        estimate_heap_size(item.len())
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }
}

/// Writes UTF-8 lines, each followed by `\n`.
pub struct TextLineSink {
    writer: Option<Box<dyn Write>>,
}

impl RecordSink<String> for TextLineSink {
    fn push(&mut self, item: String) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed_sink_error)?;
        writer.write_all(item.as_bytes())?;
        writer.write_all(b"\n")
    }

    fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl RecordCodec<String> for TextLines {
    fn source(&self, input: Box<dyn BufRead>) -> Box<dyn RecordSource<String>> {
        Box::new(TextLineSource { reader: Some(input) })
    }

    fn sink(&self, output: Box<dyn Write>) -> Box<dyn RecordSink<String>> {
        Box::new(TextLineSink { writer: Some(output) })
    }
}

/// Minimal number of tab-separated fields of a comparable ranked record.
pub const RANKED_MIN_FIELDS: usize = 4;

/// Tab-separated ranked word records (`word\tfrequency\t...`), highest frequency first.
///
/// Records with fewer than [`RANKED_MIN_FIELDS`] fields, or whose frequency is not a number, are not comparable
/// and sort after every comparable record. Records with equal keys keep no particular relative order.
#[derive(Debug, Default, Clone, Copy)]
pub struct RankedRecords;

impl RankedRecords {
    /// Extracts the sort key (the second field) of a record.
    pub fn rank(record: &str) -> Option<f64> {
        let mut fields = record.split('\t');
        let rank = fields.nth(1)?;
        if fields.count() + 2 < RANKED_MIN_FIELDS {
            return None;
        }

        rank.trim().parse::<f64>().ok().filter(|value| !value.is_nan())
    }
}

impl RecordCodec<String> for RankedRecords {
    fn source(&self, input: Box<dyn BufRead>) -> Box<dyn RecordSource<String>> {
        TextLines.source(input)
    }

    fn sink(&self, output: Box<dyn Write>) -> Box<dyn RecordSink<String>> {
        TextLines.sink(output)
    }
}

impl RecordStrategy<String> for RankedRecords {
    fn compare(&self, a: &String, b: &String) -> Ordering {
        match (RankedRecords::rank(a), RankedRecords::rank(b)) {
            (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// RMP (Rust MessagePack) records: any `serde` type, stored as MessagePack.
/// For more information see https://msgpack.org/.
pub struct RmpRecords<T, F = fn(&T, &T) -> Ordering> {
    compare: F,
    estimator: fn(&T) -> usize,
}

impl<T: Ord> RmpRecords<T> {
    /// Orders records by [`Ord`] and estimates their size as `size_of::<T>()`.
    pub fn new() -> Self {
        RmpRecords {
            compare: T::cmp,
            estimator: |_| mem::size_of::<T>(),
        }
    }
}

impl<T: Ord> Default for RmpRecords<T> {
    fn default() -> Self {
        RmpRecords::new()
    }
}

#[cfg(feature = "memory-limit")]
impl<T: Ord + deepsize::DeepSizeOf> RmpRecords<T> {
    /// Orders records by [`Ord`] and estimates their size with [`deepsize::DeepSizeOf`].
    pub fn deep_sized() -> Self {
        RmpRecords {
            compare: T::cmp,
            estimator: |item| item.deep_size_of(),
        }
    }
}

impl<T, F> RmpRecords<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    /// Replaces the record order.
    pub fn with_compare<G>(self, compare: G) -> RmpRecords<T, G>
    where
        G: Fn(&T, &T) -> Ordering,
    {
        RmpRecords {
            compare,
            estimator: self.estimator,
        }
    }

    /// Replaces the record size estimator.
    pub fn with_estimator(mut self, estimator: fn(&T) -> usize) -> Self {
        self.estimator = estimator;
        return self;
    }
}

pub struct RmpSource<T> {
    reader: Option<Box<dyn BufRead>>,
    estimator: fn(&T) -> usize,
}

impl<T> RecordSource<T> for RmpSource<T>
where
    T: serde::de::DeserializeOwned,
{
    fn pull_next(&mut self) -> io::Result<Option<T>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        if reader.fill_buf()?.is_empty() {
            self.reader = None;
            return Ok(None);
        }

        match rmp_serde::decode::from_read(reader) {
            Ok(item) => Ok(Some(item)),
            Err(err) => Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        }
    }

    fn estimate_size(&self, item: &T) -> usize {
        (self.estimator)(item)
    }

    fn close(&mut self) -> io::Result<()> {
        self.reader = None;
        Ok(())
    }
}

pub struct RmpSink<T> {
    writer: Option<Box<dyn Write>>,
    item_type: PhantomData<T>,
}

impl<T> RecordSink<T> for RmpSink<T>
where
    T: serde::ser::Serialize,
{
    fn push(&mut self, item: T) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed_sink_error)?;
        rmp_serde::encode::write(writer, &item).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<T, F> RecordCodec<T> for RmpRecords<T, F>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned + 'static,
{
    fn source(&self, input: Box<dyn BufRead>) -> Box<dyn RecordSource<T>> {
        Box::new(RmpSource {
            reader: Some(input),
            estimator: self.estimator,
        })
    }

    fn sink(&self, output: Box<dyn Write>) -> Box<dyn RecordSink<T>> {
        Box::new(RmpSink {
            writer: Some(output),
            item_type: PhantomData,
        })
    }
}

impl<T, F> RecordStrategy<T> for RmpRecords<T, F>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned + 'static,
    F: Fn(&T, &T) -> Ordering,
{
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.compare)(a, b)
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::io::{self, Cursor};

    use rstest::*;

    use super::{ByteLines, RankedRecords, RmpRecords, TextLines};
    use crate::record::{RecordCodec, RecordSource, RecordStrategy};

    fn read_all<T>(mut source: Box<dyn RecordSource<T>>) -> io::Result<Vec<T>> {
        let mut result = Vec::new();
        while let Some(item) = source.pull_next()? {
            result.push(item);
        }
        Ok(result)
    }

    fn write_all<T>(codec: &dyn RecordCodec<T>, items: Vec<T>) -> Vec<u8> {
        let buffer = SharedBuffer::default();
        let mut sink = codec.sink(Box::new(buffer.clone()));
        for item in items {
            sink.push(item).unwrap();
        }
        sink.close().unwrap();
        let data = buffer.0.borrow().clone();
        data
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    #[case(b"pear\napple\nbanana\n".to_vec(), vec![b"pear".to_vec(), b"apple".to_vec(), b"banana".to_vec()])]
    #[case(b"a\r\nb".to_vec(), vec![b"a".to_vec(), b"b".to_vec()])]
    #[case(b"\n\n".to_vec(), vec![vec![], vec![]])]
    #[case(vec![], vec![])]
    fn test_byte_lines_source(#[case] input: Vec<u8>, #[case] expected: Vec<Vec<u8>>) {
        let source = ByteLines.source(Box::new(Cursor::new(input)));
        assert_eq!(read_all(source).unwrap(), expected);
    }

    #[test]
    fn test_byte_lines_sink() {
        let data = write_all(&ByteLines, vec![b"x".to_vec(), vec![0xff, 0x00]]);
        assert_eq!(data, vec![b'x', b'\n', 0xff, 0x00, b'\n']);
    }

    #[rstest]
    #[case(b"apple".to_vec(), b"banana".to_vec(), Ordering::Less)]
    #[case(b"app".to_vec(), b"apple".to_vec(), Ordering::Less)]
    #[case(vec![0x7f], vec![0x80], Ordering::Less)]
    #[case(vec![0xff], b"z".to_vec(), Ordering::Greater)]
    #[case(b"same".to_vec(), b"same".to_vec(), Ordering::Equal)]
    fn test_byte_lines_order(#[case] a: Vec<u8>, #[case] b: Vec<u8>, #[case] expected: Ordering) {
        assert_eq!(ByteLines.compare(&a, &b), expected);
    }

    #[test]
    fn test_text_lines_rejects_invalid_utf8() {
        let mut source = TextLines.source(Box::new(Cursor::new(vec![b'o', b'k', b'\n', 0xff, b'\n'])));

        assert_eq!(source.pull_next().unwrap(), Some("ok".to_string()));
        let err = source.pull_next().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_text_lines_estimate() {
        let source = TextLines.source(Box::new(Cursor::new(Vec::new())));
        assert_eq!(source.estimate_size(&"".to_string()), 24);
        assert_eq!(source.estimate_size(&"12345".to_string()), 32);
        assert_eq!(source.estimate_size(&"12345678".to_string()), 32);
    }

    #[rstest]
    #[case("w1\t5\tx\ty", Some(5.0))]
    #[case("w1\t2.5\tx\ty\tz", Some(2.5))]
    #[case("w1\t5\tx", None)]
    #[case("w1", None)]
    #[case("w1\tmany\tx\ty", None)]
    #[case("w1\tNaN\tx\ty", None)]
    fn test_ranked_key(#[case] record: &str, #[case] expected: Option<f64>) {
        assert_eq!(RankedRecords::rank(record), expected);
    }

    #[rstest]
    #[case("w1\t5\tx\ty", "w2\t9\tx\ty", Ordering::Greater)]
    #[case("w2\t9\tx\ty", "w1\t5\tx\ty", Ordering::Less)]
    #[case("w1\t5\tx\ty", "w2\t5\tx\ty", Ordering::Equal)]
    #[case("short\t100", "w1\t5\tx\ty", Ordering::Greater)]
    #[case("w1\t5\tx\ty", "short\t100", Ordering::Less)]
    #[case("short", "other", Ordering::Equal)]
    fn test_ranked_order(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(RankedRecords.compare(&a.to_string(), &b.to_string()), expected);
    }

    #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
    struct Person {
        surname: String,
        age: u8,
    }

    #[test]
    fn test_rmp_records() {
        let codec = RmpRecords::<Person>::new();
        let saved = vec![
            Person {
                surname: "Doe".into(),
                age: 30,
            },
            Person {
                surname: "Roe".into(),
                age: 7,
            },
        ];

        let data = write_all(&codec, saved);
        let restored = read_all(codec.source(Box::new(Cursor::new(data)))).unwrap();

        assert_eq!(restored.len(), 2);
        assert_eq!(restored[1].surname, "Roe");
        assert_eq!(codec.compare(&restored[0], &restored[1]), Ordering::Less);
    }

    #[test]
    fn test_rmp_records_custom_order() {
        let codec = RmpRecords::<u32>::new()
            .with_compare(|a: &u32, b: &u32| b.cmp(a))
            .with_estimator(|_| 100);

        assert_eq!(codec.compare(&1, &2), Ordering::Greater);
        let source = codec.source(Box::new(Cursor::new(Vec::new())));
        assert_eq!(source.estimate_size(&1), 100);
    }

    #[cfg(feature = "memory-limit")]
    #[test]
    fn test_rmp_records_deep_sized() {
        let codec = RmpRecords::<String>::deep_sized();
        let source = codec.source(Box::new(Cursor::new(Vec::new())));

        // the estimate covers the heap allocation besides the inline header
        let record = "12345".to_string();
        assert_eq!(source.estimate_size(&record), std::mem::size_of::<String>() + record.capacity());
        assert_eq!(codec.compare(&"a".to_string(), &"b".to_string()), Ordering::Less);
    }

    #[test]
    fn test_rmp_truncated_input() {
        let mut data = write_all(&RmpRecords::<String>::new(), vec!["truncated".to_string()]);
        data.truncate(4);

        let err = read_all(RmpRecords::<String>::new().source(Box::new(Cursor::new(data)))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
