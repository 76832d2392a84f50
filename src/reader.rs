use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use log::{debug, warn};

use crate::annotation::decode_block;
use crate::error::{EdfError, Result};
use crate::header::{self, MAIN_HEADER_SIZE};
use crate::record::{DataRecord, RecordLayout};
use crate::types::{Annotation, EdfHeader};
use crate::EDFLIB_TIME_DIMENSION;

/// EDF/EDF+/BDF/BDF+ file reader
///
/// The reader owns its file handle, so several readers may be opened on the
/// same path and used from different threads.
///
/// # Examples
///
/// ```rust
/// use edfcodec::EdfReader;
///
/// # // Generate test file (hidden from docs)
/// # let dir = tempfile::tempdir()?;
/// # let path = dir.path().join("recording.edf");
/// # edfcodec::doctest_utils::create_simple_test_file(&path)?;
/// #
/// let mut reader = EdfReader::open(&path)?;
///
/// let header = reader.header();
/// println!("Duration: {:.1} seconds", header.file_duration() as f64 / 10_000_000.0);
/// println!("Signals: {}", header.signals.len());
///
/// // First second of the first signal
/// let samples = reader.read_channel(0, 0..256)?;
/// assert_eq!(samples.len(), 256);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct EdfReader {
    file: BufReader<File>,
    header: EdfHeader,
    layout: RecordLayout,
    /// Records available for reading
    record_count: usize,
    /// 顺序读取的下一个数据记录
    next_record: usize,
    /// 当前每个信号的样本位置指针
    sample_positions: Vec<usize>,
    starttime_subsecond: i64,
    record_buf: Vec<u8>,
}

impl EdfReader {
    /// Opens a file and parses its header.
    ///
    /// The file may be shorter than its header claims; the missing records
    /// fail with `EdfError::RecordSizeMismatch` when they are read.
    ///
    /// # Errors
    ///
    /// * `EdfError::FileNotFound` - the file cannot be opened
    /// * `EdfError::MalformedHeader` - the header block is invalid
    /// * `EdfError::Io` - reading the header failed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .map_err(|e| EdfError::FileNotFound(format!("{}: {}", path.as_ref().display(), e)))?;
        let file_len = file.metadata()?.len();
        let mut file = BufReader::new(file);

        let mut header_bytes = vec![0u8; MAIN_HEADER_SIZE];
        read_header_bytes(&mut file, &mut header_bytes)?;
        let header_size = header::declared_header_size(&header_bytes)?;
        header_bytes.resize(header_size, 0);
        read_header_bytes(&mut file, &mut header_bytes[MAIN_HEADER_SIZE..])?;
        let header = header::parse(&header_bytes)?;

        let layout = RecordLayout::new(&header);
        let record_size = layout.record_size() as u64;
        let data_len = file_len.saturating_sub(header_size as u64);
        let record_count = if header.datarecords_in_file < 0 {
            let derived = data_len / record_size;
            warn!(
                "{}: record count not set, using {} records from file size",
                path.as_ref().display(),
                derived
            );
            derived as usize
        } else {
            let declared = header.datarecords_in_file as u64;
            match declared.checked_mul(record_size) {
                Some(expected) if expected == data_len => {}
                expected => warn!(
                    "{}: header declares {} records ({:?} bytes) but {} data bytes are present",
                    path.as_ref().display(),
                    declared,
                    expected,
                    data_len
                ),
            }
            usize::try_from(declared).unwrap_or(usize::MAX)
        };

        let mut reader = EdfReader {
            file,
            sample_positions: vec![0; header.signals.len()],
            record_buf: vec![0; layout.record_size()],
            header,
            layout,
            record_count,
            next_record: 0,
            starttime_subsecond: 0,
        };

        if reader.header.file_type.is_plus() && reader.record_count > 0 {
            match reader.read_record(0) {
                Ok(record) => {
                    reader.starttime_subsecond =
                        record.onset.unwrap_or(0).rem_euclid(EDFLIB_TIME_DIMENSION);
                }
                Err(e) => debug!("no sub-second start time: {}", e),
            }
            reader.next_record = 0;
        }

        debug!(
            "opened {}: {:?}, {} signals, {} records of {} bytes",
            path.as_ref().display(),
            reader.header.file_type,
            reader.header.signals.len(),
            reader.record_count,
            reader.layout.record_size()
        );
        Ok(reader)
    }

    /// Gets a reference to the file header information
    ///
    /// The signal list includes annotation channels; see
    /// [`EdfHeader::data_signal_indices`].
    pub fn header(&self) -> &EdfHeader {
        &self.header
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Number of records that can be read.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Fraction of a second between the header start time and the first
    /// sample, in 100 ns units (EDF+/BDF+ only).
    pub fn starttime_subsecond(&self) -> i64 {
        self.starttime_subsecond
    }

    /// Total samples of one signal across all records.
    pub fn samples_in_file(&self, signal: usize) -> Result<usize> {
        let layout = self.layout.data_channel(signal)?;
        Ok(layout.samples_per_record * self.record_count)
    }

    /// Loads record `index` into the record buffer.
    fn load_record(&mut self, index: usize) -> Result<()> {
        if index >= self.record_count {
            return Err(EdfError::OutOfRange {
                index,
                limit: self.record_count,
            });
        }
        let offset = (index as u64)
            .saturating_mul(self.record_buf.len() as u64)
            .saturating_add(self.header.header_size() as u64);
        self.file.seek(SeekFrom::Start(offset))?;
        let filled = fill_buffer(&mut self.file, &mut self.record_buf)?;
        if filled != self.record_buf.len() {
            return Err(EdfError::RecordSizeMismatch {
                record: index,
                expected: self.record_buf.len(),
                actual: filled,
            });
        }
        Ok(())
    }

    /// Reads and decodes one record by index, moving the sequential cursor
    /// past it.
    ///
    /// # Errors
    ///
    /// * `EdfError::OutOfRange` - `index` is not below [`record_count`](Self::record_count)
    /// * `EdfError::RecordSizeMismatch` - the file ends inside the record
    pub fn read_record(&mut self, index: usize) -> Result<DataRecord> {
        self.load_record(index)?;
        let mut record = self.layout.decode_record(&self.record_buf, index)?;

        if let Some(&first) = self.header.annotation_signal_indices().first() {
            if let Some(bytes) = self.layout.annotation_bytes(&self.record_buf, first) {
                record.onset = decode_block(bytes, index, true).record_onset;
            }
        }

        self.next_record = index + 1;
        Ok(record)
    }

    /// Reads the record at the sequential cursor.
    ///
    /// Fails with `EdfError::OutOfRange` once every record has been read.
    pub fn read_next(&mut self) -> Result<DataRecord> {
        let index = self.next_record;
        self.read_record(index)
    }

    /// Moves the sequential cursor back to the first record.
    pub fn rewind_records(&mut self) {
        self.next_record = 0;
    }

    /// Iterates over all records from the first, stopping after the last.
    pub fn records(&mut self) -> Records<'_> {
        Records { reader: self, next: 0 }
    }

    /// Reads the physical samples `range` of one signal, counted from the
    /// start of the file.
    ///
    /// An empty range yields an empty vector.
    ///
    /// # Errors
    ///
    /// * `EdfError::InvalidSignalIndex` - no such signal, or an annotation channel
    /// * `EdfError::OutOfRange` - `range.end` is past the last sample
    /// * `EdfError::RecordSizeMismatch` - a record in the range is truncated
    pub fn read_channel(&mut self, signal: usize, range: Range<usize>) -> Result<Vec<f64>> {
        let scaling = self.layout.data_channel(signal)?.scaling;
        let digital = self.read_digital_range(signal, range)?;
        Ok(digital.into_iter().map(|d| scaling.to_physical(d)).collect())
    }

    fn read_digital_range(&mut self, signal: usize, range: Range<usize>) -> Result<Vec<i32>> {
        let spr = self.layout.data_channel(signal)?.samples_per_record;
        let total = spr * self.record_count;
        if range.start > range.end {
            return Err(EdfError::InvalidFormat(format!(
                "sample range {}..{} is reversed",
                range.start, range.end
            )));
        }
        if range.end > total {
            return Err(EdfError::OutOfRange {
                index: range.end,
                limit: total,
            });
        }

        let mut samples = Vec::with_capacity(range.len());
        let mut pos = range.start;
        while pos < range.end {
            let record = pos / spr;
            let first = pos % spr;
            let last = (range.end - record * spr).min(spr);
            self.load_record(record)?;
            let digital =
                self.layout
                    .decode_digital(&self.record_buf, record, signal, first..last)?;
            samples.extend(digital);
            pos = (record + 1) * spr;
        }
        Ok(samples)
    }

    /// Reads physical value samples from the specified signal
    ///
    /// Reading starts at the signal's sample position (see [`seek`](Self::seek))
    /// and advances it. Near the end of the file fewer than `count` samples
    /// are returned.
    pub fn read_physical_samples(&mut self, signal: usize, count: usize) -> Result<Vec<f64>> {
        let scaling = self.layout.data_channel(signal)?.scaling;
        let digital = self.read_digital_samples(signal, count)?;
        Ok(digital.into_iter().map(|d| scaling.to_physical(d)).collect())
    }

    /// Reads digital value samples from the specified signal
    ///
    /// Digital values are the raw integers stored in the file (16-bit for
    /// EDF, 24-bit for BDF) before conversion to physical units.
    pub fn read_digital_samples(&mut self, signal: usize, count: usize) -> Result<Vec<i32>> {
        let total = self.samples_in_file(signal)?;
        let start = self.sample_positions[signal];
        let end = start.saturating_add(count).min(total);
        if start >= end {
            return Ok(Vec::new());
        }
        let samples = self.read_digital_range(signal, start..end)?;
        self.sample_positions[signal] = end;
        Ok(samples)
    }

    /// 设置指定信号的样本位置
    pub fn seek(&mut self, signal: usize, position: usize) -> Result<usize> {
        let total = self.samples_in_file(signal)?;
        let new_position = position.min(total);
        self.sample_positions[signal] = new_position;
        Ok(new_position)
    }

    /// 获取指定信号的当前样本位置
    pub fn tell(&self, signal: usize) -> Result<usize> {
        self.layout.data_channel(signal)?;
        Ok(self.sample_positions[signal])
    }

    /// 将指定信号的位置重置到开头
    pub fn rewind(&mut self, signal: usize) -> Result<()> {
        self.seek(signal, 0)?;
        Ok(())
    }

    /// Lazily decodes the annotations of every record.
    ///
    /// Each call starts again from the first record. A malformed TAL is
    /// yielded as `EdfError::AnnotationParse` and iteration continues; an
    /// I/O or record size error is yielded once and ends iteration.
    pub fn annotations(&mut self) -> AnnotationIter<'_> {
        let channels = self.header.annotation_signal_indices();
        AnnotationIter {
            done: channels.is_empty(),
            reader: self,
            channels,
            record: 0,
            pending: VecDeque::new(),
        }
    }

    /// Decodes every annotation in the file.
    ///
    /// Malformed TALs are collected in [`AnnotationList::errors`]; only
    /// record-level failures are returned as `Err`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use edfcodec::EdfReader;
    ///
    /// # let dir = tempfile::tempdir()?;
    /// # let path = dir.path().join("annotated.edf");
    /// # edfcodec::doctest_utils::create_annotated_test_file(&path)?;
    /// let mut reader = EdfReader::open(&path)?;
    /// let list = reader.read_annotations()?;
    ///
    /// for annotation in &list.annotations {
    ///     println!("{:.2}s: {}", annotation.onset_seconds(), annotation.description());
    /// }
    /// assert!(list.errors.is_empty());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn read_annotations(&mut self) -> Result<AnnotationList> {
        let mut list = AnnotationList::default();
        for item in self.annotations() {
            match item {
                Ok(annotation) => list.annotations.push(annotation),
                Err(e) if e.is_recoverable() => list.errors.push(e),
                Err(e) => return Err(e),
            }
        }
        Ok(list)
    }
}

/// Annotations of a whole file plus the TALs that could not be parsed.
#[derive(Debug, Default)]
pub struct AnnotationList {
    pub annotations: Vec<Annotation>,
    pub errors: Vec<EdfError>,
}

/// Sequential record iterator returned by [`EdfReader::records`].
pub struct Records<'a> {
    reader: &'a mut EdfReader,
    next: usize,
}

impl Iterator for Records<'_> {
    type Item = Result<DataRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.reader.record_count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.reader.read_record(index))
    }
}

/// Lazy annotation iterator returned by [`EdfReader::annotations`].
pub struct AnnotationIter<'a> {
    reader: &'a mut EdfReader,
    channels: Vec<usize>,
    record: usize,
    pending: VecDeque<Result<Annotation>>,
    done: bool,
}

impl Iterator for AnnotationIter<'_> {
    type Item = Result<Annotation>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.done || self.record >= self.reader.record_count {
                return None;
            }

            let record = self.record;
            self.record += 1;
            if let Err(e) = self.reader.load_record(record) {
                self.done = true;
                return Some(Err(e));
            }

            for (k, &channel) in self.channels.iter().enumerate() {
                let layout = &self.reader.layout;
                let Some(bytes) = layout.annotation_bytes(&self.reader.record_buf, channel) else {
                    continue;
                };
                let block = decode_block(bytes, record, k == 0);
                self.pending.extend(block.annotations.into_iter().map(Ok));
                self.pending.extend(block.errors.into_iter().map(Err));
            }
        }
    }
}

fn read_header_bytes(file: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    let filled = fill_buffer(file, buf)?;
    if filled != buf.len() {
        return Err(EdfError::MalformedHeader(format!(
            "file ends after {} of {} header bytes",
            filled,
            buf.len()
        )));
    }
    Ok(())
}

/// Reads until `buf` is full or the input ends; returns the bytes read.
fn fill_buffer(input: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_buffer_reports_short_input() {
        let mut input: &[u8] = &[1, 2, 3];
        let mut buf = [0u8; 5];
        assert_eq!(fill_buffer(&mut input, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        match EdfReader::open(dir.path().join("nonexistent.edf")) {
            Err(EdfError::FileNotFound(msg)) => assert!(msg.contains("nonexistent.edf")),
            Err(e) => panic!("expected FileNotFound, got {}", e),
            Ok(_) => panic!("expected FileNotFound"),
        }
    }

    #[test]
    fn test_open_short_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.edf");
        std::fs::write(&path, b"0       truncated").unwrap();
        assert!(matches!(EdfReader::open(&path), Err(EdfError::MalformedHeader(_))));
    }
}
