use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, trace, warn};

use crate::annotation::{encode_block, encode_tal, encode_time_keeping, validate};
use crate::error::{EdfError, Result};
use crate::header::{self, RECORD_COUNT_OFFSET};
use crate::record::{RangePolicy, RecordLayout};
use crate::types::{Annotation, EdfHeader, SignalParam};
use crate::{EDFLIB_ANNOTATION_BYTES, EDFLIB_TIME_DIMENSION};

/// Smallest time-keeping annotation channel a writer accepts, in bytes.
///
/// Leaves room for the record time stamps of long recordings.
pub const MIN_ANNOTATION_BYTES: usize = 16;

/// Settings of a write session that are not part of the file header.
///
/// # Examples
///
/// ```rust
/// use edfcodec::{RangePolicy, WriterOptions};
///
/// let options = WriterOptions::default()
///     .range_policy(RangePolicy::Clamp)
///     .annotation_bytes_per_record(240);
/// assert_eq!(options.annotation_bytes_per_record, 240);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Handling of physical samples outside a channel's physical range
    pub range_policy: RangePolicy,
    /// Width of the annotation channel added to EDF+/BDF+ headers without one
    pub annotation_bytes_per_record: usize,
    /// 子秒开始时间 (100纳秒为单位), written into the first time-keeping TAL
    pub subsecond_start: i64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            range_policy: RangePolicy::Reject,
            annotation_bytes_per_record: EDFLIB_ANNOTATION_BYTES,
            subsecond_start: 0,
        }
    }
}

impl WriterOptions {
    pub fn range_policy(mut self, policy: RangePolicy) -> Self {
        self.range_policy = policy;
        self
    }

    pub fn annotation_bytes_per_record(mut self, bytes: usize) -> Self {
        self.annotation_bytes_per_record = bytes;
        self
    }

    pub fn subsecond_start(mut self, ticks: i64) -> Self {
        self.subsecond_start = ticks;
        self
    }
}

/// Streaming EDF/EDF+/BDF/BDF+ writer
///
/// Samples are buffered per channel and a data record is written as soon as
/// every data channel holds a full record. The header goes out first with a
/// record count of `-1`; [`close`](Self::close) patches the real count.
///
/// Channel indices are header indices, so for a header whose annotation
/// channel comes first the first data channel is `1`.
///
/// # Examples
///
/// ```rust
/// use edfcodec::{EdfHeader, EdfWriter, FileType, SignalParam};
///
/// # let dir = tempfile::tempdir()?;
/// # let path = dir.path().join("output.edf");
/// let mut header = EdfHeader::new(FileType::EdfPlus);
/// header.add_signal(SignalParam {
///     label: "EEG Fp1".to_string(),
///     physical_dimension: "uV".to_string(),
///     physical_min: -200.0,
///     physical_max: 200.0,
///     digital_min: -32768,
///     digital_max: 32767,
///     samples_per_record: 256,
///     ..Default::default()
/// });
///
/// let mut writer = EdfWriter::create(&path, header)?;
/// for second in 0..4 {
///     let samples: Vec<f64> = (0..256)
///         .map(|i| 50.0 * (2.0 * std::f64::consts::PI * 10.0 * i as f64 / 256.0).sin())
///         .collect();
///     writer.write_samples(0, &samples)?;
///     if second == 1 {
///         writer.write_annotation(edfcodec::Annotation::new(1.5, None, "Eyes closed"))?;
///     }
/// }
/// assert_eq!(writer.records_written(), 4);
/// writer.close()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct EdfWriter {
    file: BufWriter<File>,
    header: EdfHeader,
    layout: RecordLayout,
    options: WriterOptions,
    data_channels: Vec<usize>,
    annotation_channels: Vec<usize>,
    /// 每个信号的待写数字样本, indexed like `header.signals`
    buffers: Vec<Vec<i32>>,
    // 注释队列
    pending: VecDeque<Annotation>,
    records_written: usize,
    finished: bool,
}

impl EdfWriter {
    /// Creates a file with default [`WriterOptions`].
    pub fn create<P: AsRef<Path>>(path: P, header: EdfHeader) -> Result<Self> {
        Self::create_with_options(path, header, WriterOptions::default())
    }

    /// Creates a file and writes its header.
    ///
    /// EDF+ and BDF+ headers without an annotation channel get one appended,
    /// `options.annotation_bytes_per_record` bytes wide. The header is
    /// validated before the file is touched.
    ///
    /// # Errors
    ///
    /// * `EdfError::InvalidHeader` - the header cannot be serialized, has no
    ///   data channel, its first annotation channel is narrower than
    ///   [`MIN_ANNOTATION_BYTES`], or the sub-second start is not below one second
    /// * `EdfError::FileNotFound` - the file cannot be created
    pub fn create_with_options<P: AsRef<Path>>(
        path: P,
        mut header: EdfHeader,
        options: WriterOptions,
    ) -> Result<Self> {
        if !(0..EDFLIB_TIME_DIMENSION).contains(&options.subsecond_start) {
            return Err(EdfError::InvalidHeader(format!(
                "sub-second start {} must be within 0..{}",
                options.subsecond_start, EDFLIB_TIME_DIMENSION
            )));
        }
        if header.file_type.is_plus() && header.annotation_signal_indices().is_empty() {
            header.add_signal(SignalParam::annotation(
                header.file_type,
                options.annotation_bytes_per_record,
            ));
        }
        if header.data_signal_indices().is_empty() {
            return Err(EdfError::InvalidHeader("header has no data signals".to_string()));
        }
        if let Some(&channel) = header.annotation_signal_indices().first() {
            let width =
                header.signals[channel].samples_per_record * header.file_type.bytes_per_sample();
            let needed = encode_time_keeping(options.subsecond_start)
                .len()
                .max(MIN_ANNOTATION_BYTES);
            if width < needed {
                return Err(EdfError::InvalidHeader(format!(
                    "annotation channel {} is {} bytes per record, at least {} are needed",
                    channel, width, needed
                )));
            }
        }
        header.datarecords_in_file = -1;
        let header_bytes = header::serialize(&header)?;

        let file = File::create(&path)
            .map_err(|e| EdfError::FileNotFound(format!("{}: {}", path.as_ref().display(), e)))?;
        let mut file = BufWriter::new(file);
        file.write_all(&header_bytes)?;

        let layout = RecordLayout::new(&header);
        debug!(
            "created {}: {:?}, {} signals, {} bytes per record",
            path.as_ref().display(),
            header.file_type,
            header.signals.len(),
            layout.record_size()
        );

        Ok(EdfWriter {
            file,
            data_channels: header.data_signal_indices(),
            annotation_channels: header.annotation_signal_indices(),
            buffers: vec![Vec::new(); header.signals.len()],
            header,
            layout,
            options,
            pending: VecDeque::new(),
            records_written: 0,
            finished: false,
        })
    }

    /// The header as written, including an added annotation channel.
    ///
    /// `datarecords_in_file` stays `-1` until the writer is closed.
    pub fn header(&self) -> &EdfHeader {
        &self.header
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Annotations queued but not yet placed in a record.
    pub fn pending_annotations(&self) -> usize {
        self.pending.len()
    }

    /// Buffers one physical sample for a data channel.
    pub fn write_sample(&mut self, signal: usize, value: f64) -> Result<()> {
        self.write_samples(signal, &[value])
    }

    /// Buffers physical samples for one data channel.
    ///
    /// The whole slice is converted before anything is buffered: if one
    /// value is rejected, none are kept and the writer stays usable.
    ///
    /// # Errors
    ///
    /// * `EdfError::InvalidSignalIndex` - no such channel, or an annotation channel
    /// * `EdfError::PhysicalRange` - a value is outside the physical range
    ///   (or NaN) under [`RangePolicy::Reject`]
    pub fn write_samples(&mut self, signal: usize, samples: &[f64]) -> Result<()> {
        let scaling = self.layout.data_channel(signal)?.scaling;
        let policy = self.options.range_policy;
        let digital = samples
            .iter()
            .map(|&value| scaling.to_digital(value, policy, signal))
            .collect::<Result<Vec<i32>>>()?;

        self.buffers[signal].extend(digital);
        self.flush_ready_records()
    }

    /// Buffers one full record: one slice per data channel, in header order.
    ///
    /// Nothing is buffered when a slice has the wrong length or a value is
    /// rejected.
    pub fn write_record(&mut self, samples: &[Vec<f64>]) -> Result<()> {
        if samples.len() != self.data_channels.len() {
            return Err(EdfError::InvalidFormat(format!(
                "expected samples for {} data signals, got {}",
                self.data_channels.len(),
                samples.len()
            )));
        }

        let policy = self.options.range_policy;
        let mut converted = Vec::with_capacity(samples.len());
        for (&signal, values) in self.data_channels.iter().zip(samples) {
            let channel = self.layout.data_channel(signal)?;
            if values.len() != channel.samples_per_record {
                return Err(EdfError::InvalidFormat(format!(
                    "Signal {} expected {} samples per record, got {}",
                    signal,
                    channel.samples_per_record,
                    values.len()
                )));
            }
            let digital = values
                .iter()
                .map(|&value| channel.scaling.to_digital(value, policy, signal))
                .collect::<Result<Vec<i32>>>()?;
            converted.push((signal, digital));
        }

        for (signal, digital) in converted {
            self.buffers[signal].extend(digital);
        }
        self.flush_ready_records()
    }

    /// Queues an annotation for the next records written.
    ///
    /// Onsets are relative to the header start time. Queued annotations are
    /// packed in order into the annotation channels of each record as it is
    /// written.
    ///
    /// # Errors
    ///
    /// * `EdfError::InvalidFormat` - not an EDF+/BDF+ file, empty text,
    ///   negative duration, or text containing TAL delimiters
    /// * `EdfError::AnnotationOverflow` - the annotation can never fit in an
    ///   annotation channel
    pub fn write_annotation(&mut self, annotation: Annotation) -> Result<()> {
        if !self.header.file_type.is_plus() {
            return Err(EdfError::InvalidFormat(format!(
                "{:?} files cannot hold annotations",
                self.header.file_type
            )));
        }
        validate(&annotation)?;

        let needed = encode_tal(&annotation).len();
        let time_keeping = encode_time_keeping(self.record_onset(self.records_written)).len();
        let available = self
            .annotation_channels
            .iter()
            .enumerate()
            .map(|(k, &channel)| {
                let width = self.layout.channel_bytes(channel);
                if k == 0 {
                    width.saturating_sub(time_keeping)
                } else {
                    width
                }
            })
            .max()
            .unwrap_or(0);
        if needed > available {
            return Err(EdfError::AnnotationOverflow { needed, available });
        }

        trace!("queued annotation at {} ({} bytes)", annotation.onset, needed);
        self.pending.push_back(annotation);
        Ok(())
    }

    /// Start of record `index` relative to the header start time.
    fn record_onset(&self, index: usize) -> i64 {
        index as i64 * self.header.datarecord_duration + self.options.subsecond_start
    }

    fn record_ready(&self) -> bool {
        self.data_channels.iter().all(|&signal| {
            self.buffers[signal].len() >= self.layout.channels()[signal].samples_per_record
        })
    }

    fn flush_ready_records(&mut self) -> Result<()> {
        while self.record_ready() {
            self.write_next_record()?;
        }
        Ok(())
    }

    fn write_next_record(&mut self) -> Result<()> {
        let index = self.records_written;
        let onset = self.record_onset(index);

        // 按通道顺序填充注释: 第一个通道先放时间戳
        let mut blocks = Vec::with_capacity(self.annotation_channels.len());
        for (k, &channel) in self.annotation_channels.iter().enumerate() {
            let width = self.layout.channel_bytes(channel);
            let record_onset = (k == 0).then_some(onset);
            let mut used = record_onset.map(|t| encode_time_keeping(t).len()).unwrap_or(0);
            if used > width {
                return Err(EdfError::AnnotationOverflow {
                    needed: used,
                    available: width,
                });
            }

            let mut take = 0;
            for annotation in self.pending.iter() {
                let len = encode_tal(annotation).len();
                if used + len > width {
                    break;
                }
                used += len;
                take += 1;
            }
            let annotations: Vec<Annotation> = self.pending.drain(..take).collect();
            blocks.push(encode_block(record_onset, &annotations, width)?);
        }

        let buf = {
            let digital: Vec<&[i32]> = self
                .data_channels
                .iter()
                .map(|&signal| {
                    let spr = self.layout.channels()[signal].samples_per_record;
                    &self.buffers[signal][..spr]
                })
                .collect();
            let annotations: Vec<&[u8]> = blocks.iter().map(Vec::as_slice).collect();
            self.layout.encode_record(index, &digital, &annotations)?
        };
        self.file.write_all(&buf)?;

        for &signal in &self.data_channels {
            let spr = self.layout.channels()[signal].samples_per_record;
            self.buffers[signal].drain(..spr);
        }
        self.records_written += 1;
        trace!("wrote record {}", index);
        Ok(())
    }

    /// Finishes the file and closes it.
    ///
    /// The header's record count is patched to the number of complete
    /// records on disk before any error is reported, so the file is always
    /// readable afterwards.
    ///
    /// # Errors
    ///
    /// * `EdfError::IncompleteRecord` - a channel still buffers a partial
    ///   record; those samples are discarded
    /// * `EdfError::AnnotationOverflow` - queued annotations never found room
    ///   in a record and were dropped
    /// * `EdfError::Io` - flushing or patching the header failed
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let count = header::record_count_field(self.records_written as i64)?;
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(RECORD_COUNT_OFFSET))?;
        self.file.write_all(&count)?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.flush()?;
        self.header.datarecords_in_file = self.records_written as i64;
        debug!("patched record count to {}", self.records_written);

        for &signal in &self.data_channels {
            let buffered = self.buffers[signal].len();
            if buffered > 0 {
                return Err(EdfError::IncompleteRecord {
                    signal,
                    buffered,
                    samples_per_record: self.layout.channels()[signal].samples_per_record,
                });
            }
        }

        if !self.pending.is_empty() {
            let needed = self.pending.iter().map(|a| encode_tal(a).len()).sum();
            warn!("{} annotations were never written", self.pending.len());
            return Err(EdfError::AnnotationOverflow {
                needed,
                available: 0,
            });
        }
        Ok(())
    }
}

impl Drop for EdfWriter {
    fn drop(&mut self) {
        if !self.finished {
            warn!("EdfWriter dropped without close, finalizing");
            if let Err(e) = self.finish() {
                warn!("finalizing dropped writer: {}", e);
            }
        }
    }
}
