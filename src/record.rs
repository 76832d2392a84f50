//! Per-record sample (de)interleaving and integer/physical scaling.

use std::ops::Range;

use log::trace;

use crate::error::{EdfError, Result};
use crate::types::{EdfHeader, FileType, SignalParam};

/// Stored width of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    /// EDF: 16-bit two's complement, little-endian
    Bits16,
    /// BDF: 24-bit two's complement, little-endian
    Bits24,
}

impl SampleWidth {
    pub fn for_file_type(file_type: FileType) -> Self {
        if file_type.is_bdf() {
            SampleWidth::Bits24
        } else {
            SampleWidth::Bits16
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            SampleWidth::Bits16 => 2,
            SampleWidth::Bits24 => 3,
        }
    }

    /// Decodes one sample from the start of `bytes`.
    pub fn read(self, bytes: &[u8]) -> i32 {
        match self {
            SampleWidth::Bits16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i32,
            SampleWidth::Bits24 => {
                let raw = bytes[0] as i32 | (bytes[1] as i32) << 8 | (bytes[2] as i32) << 16;
                // sign-extend bit 23
                (raw << 8) >> 8
            }
        }
    }

    pub fn write(self, value: i32, out: &mut Vec<u8>) {
        let bytes = value.to_le_bytes();
        out.extend_from_slice(&bytes[..self.bytes()]);
    }
}

/// What to do with a physical sample outside the channel's physical range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangePolicy {
    /// Fail the write with `EdfError::PhysicalRange`
    #[default]
    Reject,
    /// Store the nearest representable value
    Clamp,
}

/// Linear digital/physical conversion of one channel, computed once per file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    physical_min: f64,
    physical_max: f64,
    digital_min: i32,
    digital_max: i32,
    gain: f64,
    offset: f64,
}

impl Scaling {
    pub fn new(signal: &SignalParam) -> Self {
        let gain = (signal.physical_max - signal.physical_min)
            / (signal.digital_max as f64 - signal.digital_min as f64);
        Scaling {
            physical_min: signal.physical_min,
            physical_max: signal.physical_max,
            digital_min: signal.digital_min,
            digital_max: signal.digital_max,
            gain,
            offset: signal.physical_min - gain * signal.digital_min as f64,
        }
    }

    /// Physical units per digital step; also the quantization error bound.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Physical value of digital zero.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Digital values outside the digital range saturate at the physical bounds.
    pub fn to_physical(&self, digital: i32) -> f64 {
        if digital <= self.digital_min {
            self.physical_min
        } else if digital >= self.digital_max {
            self.physical_max
        } else {
            self.physical_min + (digital as f64 - self.digital_min as f64) * self.gain
        }
    }

    pub fn to_digital(&self, physical: f64, policy: RangePolicy, signal: usize) -> Result<i32> {
        let in_range = physical >= self.physical_min && physical <= self.physical_max;
        let physical = match policy {
            _ if in_range => physical,
            RangePolicy::Clamp if !physical.is_nan() => {
                physical.clamp(self.physical_min, self.physical_max)
            }
            _ => {
                return Err(EdfError::PhysicalRange {
                    signal,
                    value: physical,
                    min: self.physical_min,
                    max: self.physical_max,
                })
            }
        };

        let steps = ((physical - self.physical_min) / self.gain).round();
        let digital = self.digital_min as f64 + steps;
        Ok(digital.clamp(self.digital_min as f64, self.digital_max as f64) as i32)
    }
}

/// Placement of one channel inside a record.
#[derive(Debug, Clone)]
pub struct ChannelLayout {
    /// 信号在数据记录中的字节偏移
    pub offset: usize,
    pub samples_per_record: usize,
    pub is_annotation: bool,
    pub scaling: Scaling,
}

impl ChannelLayout {
    fn byte_range(&self, width: SampleWidth) -> Range<usize> {
        self.offset..self.offset + self.samples_per_record * width.bytes()
    }
}

/// Decoded contents of one channel of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Samples(Vec<f64>),
    /// Raw TAL bytes of an annotation channel
    Annotations(Vec<u8>),
}

/// One decoded data record.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub index: usize,
    /// Start time from the record's time-keeping annotation (EDF+/BDF+ only)
    pub onset: Option<i64>,
    pub channels: Vec<ChannelData>,
}

impl DataRecord {
    pub fn samples(&self, channel: usize) -> Option<&[f64]> {
        match self.channels.get(channel)? {
            ChannelData::Samples(samples) => Some(samples),
            ChannelData::Annotations(_) => None,
        }
    }
}

/// Fixed byte layout shared by every record of a file.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    width: SampleWidth,
    channels: Vec<ChannelLayout>,
    record_size: usize,
}

impl RecordLayout {
    pub fn new(header: &EdfHeader) -> Self {
        let width = SampleWidth::for_file_type(header.file_type);
        let mut offset = 0;
        let channels = header
            .signals
            .iter()
            .map(|signal| {
                let channel = ChannelLayout {
                    offset,
                    samples_per_record: signal.samples_per_record,
                    is_annotation: signal.is_annotation(),
                    scaling: Scaling::new(signal),
                };
                offset += signal.samples_per_record * width.bytes();
                channel
            })
            .collect();

        RecordLayout {
            width,
            channels,
            record_size: offset,
        }
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn width(&self) -> SampleWidth {
        self.width
    }

    pub fn channels(&self) -> &[ChannelLayout] {
        &self.channels
    }

    /// Layout of a data (non-annotation) channel.
    pub fn data_channel(&self, channel: usize) -> Result<&ChannelLayout> {
        self.channels
            .get(channel)
            .filter(|c| !c.is_annotation)
            .ok_or(EdfError::InvalidSignalIndex(channel))
    }

    fn check_len(&self, buf: &[u8], record: usize) -> Result<()> {
        if buf.len() != self.record_size {
            return Err(EdfError::RecordSizeMismatch {
                record,
                expected: self.record_size,
                actual: buf.len(),
            });
        }
        Ok(())
    }

    pub fn decode_record(&self, buf: &[u8], record: usize) -> Result<DataRecord> {
        self.check_len(buf, record)?;
        let channels = self
            .channels
            .iter()
            .map(|channel| {
                let bytes = &buf[channel.byte_range(self.width)];
                if channel.is_annotation {
                    ChannelData::Annotations(bytes.to_vec())
                } else {
                    ChannelData::Samples(
                        bytes
                            .chunks_exact(self.width.bytes())
                            .map(|b| channel.scaling.to_physical(self.width.read(b)))
                            .collect(),
                    )
                }
            })
            .collect();

        Ok(DataRecord {
            index: record,
            onset: None,
            channels,
        })
    }

    /// Raw digital samples `range` (indices within the record) of one channel.
    pub fn decode_digital(
        &self,
        buf: &[u8],
        record: usize,
        channel: usize,
        range: Range<usize>,
    ) -> Result<Vec<i32>> {
        self.check_len(buf, record)?;
        let layout = self.data_channel(channel)?;
        if range.start > range.end || range.end > layout.samples_per_record {
            return Err(EdfError::OutOfRange {
                index: range.end,
                limit: layout.samples_per_record,
            });
        }
        let bps = self.width.bytes();
        let start = layout.offset + range.start * bps;
        let end = layout.offset + range.end * bps;
        Ok(buf[start..end]
            .chunks_exact(bps)
            .map(|b| self.width.read(b))
            .collect())
    }

    /// Physical samples `range` (indices within the record) of one channel.
    pub fn decode_channel(
        &self,
        buf: &[u8],
        record: usize,
        channel: usize,
        range: Range<usize>,
    ) -> Result<Vec<f64>> {
        let scaling = self.data_channel(channel)?.scaling;
        let digital = self.decode_digital(buf, record, channel, range)?;
        Ok(digital.into_iter().map(|d| scaling.to_physical(d)).collect())
    }

    /// Bytes of an annotation channel within a record buffer.
    pub fn annotation_bytes<'a>(&self, buf: &'a [u8], channel: usize) -> Option<&'a [u8]> {
        let layout = self.channels.get(channel).filter(|c| c.is_annotation)?;
        buf.get(layout.byte_range(self.width))
    }

    /// Width in bytes of a channel's block.
    pub fn channel_bytes(&self, channel: usize) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.samples_per_record * self.width.bytes())
            .unwrap_or(0)
    }

    /// Builds one record from digital samples of every data channel and the
    /// TAL blocks of every annotation channel, both in header order.
    pub fn encode_record(
        &self,
        record: usize,
        digital: &[&[i32]],
        annotations: &[&[u8]],
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.record_size);
        let mut data = digital.iter();
        let mut blocks = annotations.iter();

        for (index, channel) in self.channels.iter().enumerate() {
            let bytes = channel.samples_per_record * self.width.bytes();
            if channel.is_annotation {
                let block = blocks.next().copied().unwrap_or(&[]);
                if block.len() > bytes {
                    return Err(EdfError::AnnotationOverflow {
                        needed: block.len(),
                        available: bytes,
                    });
                }
                buf.extend_from_slice(block);
                buf.resize(buf.len() + bytes - block.len(), 0);
            } else {
                let samples = data.next().copied().unwrap_or(&[]);
                if samples.len() != channel.samples_per_record {
                    return Err(EdfError::InvalidFormat(format!(
                        "signal {} expected {} samples per record, got {}",
                        index,
                        channel.samples_per_record,
                        samples.len()
                    )));
                }
                for &value in samples {
                    self.width.write(value, &mut buf);
                }
            }
        }

        self.check_len(&buf, record)?;
        trace!("encoded record {} ({} bytes)", record, buf.len());
        Ok(buf)
    }
}
