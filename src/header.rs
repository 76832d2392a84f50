//! Fixed-width ASCII (de)serialization of the header block.
//!
//! The first 256 bytes hold the file-level fields. They are followed by
//! 256 bytes per signal, stored column-major: all labels, then all
//! transducers, and so on. Every field is described by a [`SignalField`]
//! entry carrying its width and its encode/decode functions.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use log::debug;

use crate::error::{EdfError, Result};
use crate::types::{EdfHeader, FileType, RecordingInfo, SignalParam, SourceText};
use crate::utils::{
    format_edf_time, format_number, header_bytes, is_integer_number, is_number, parse_edf_time,
};
use crate::EDFLIB_MAXSIGNALS;

/// Byte offset of the number-of-records field, patched when a writer closes.
pub const RECORD_COUNT_OFFSET: u64 = 236;

/// Size of the file-level part of the header
pub const MAIN_HEADER_SIZE: usize = 256;

/// One column of the signal header block.
pub struct SignalField {
    pub name: &'static str,
    pub width: usize,
    /// Numeric columns remember their on-disk spelling
    numeric: bool,
    encode: fn(&SignalParam) -> Option<String>,
    decode: fn(&mut SignalParam, &str) -> std::result::Result<(), String>,
}

impl SignalField {
    const fn text(
        name: &'static str,
        width: usize,
        encode: fn(&SignalParam) -> Option<String>,
        decode: fn(&mut SignalParam, &str) -> std::result::Result<(), String>,
    ) -> Self {
        SignalField {
            name,
            width,
            numeric: false,
            encode,
            decode,
        }
    }

    const fn number(
        name: &'static str,
        encode: fn(&SignalParam) -> Option<String>,
        decode: fn(&mut SignalParam, &str) -> std::result::Result<(), String>,
    ) -> Self {
        SignalField {
            name,
            width: 8,
            numeric: true,
            encode,
            decode,
        }
    }

    /// Text written for `signal`: the recorded spelling while it still
    /// denotes the current value, the canonical form otherwise.
    fn spell(&self, signal: &SignalParam) -> Option<String> {
        let canonical = (self.encode)(signal);
        if !self.numeric {
            return canonical;
        }
        let recorded = signal.source.get(self.name).filter(|text| {
            let mut probe = SignalParam::default();
            (self.decode)(&mut probe, text).is_ok() && (self.encode)(&probe) == canonical
        });
        match recorded {
            Some(text) => Some(text.to_string()),
            None => canonical,
        }
    }
}

/// Signal header columns in on-disk order; widths add up to 256.
pub const SIGNAL_FIELDS: [SignalField; 10] = [
    SignalField::text("label", 16, enc_label, dec_label),
    SignalField::text("transducer", 80, enc_transducer, dec_transducer),
    SignalField::text("physical dimension", 8, enc_dimension, dec_dimension),
    SignalField::number("physical minimum", enc_physical_min, dec_physical_min),
    SignalField::number("physical maximum", enc_physical_max, dec_physical_max),
    SignalField::number("digital minimum", enc_digital_min, dec_digital_min),
    SignalField::number("digital maximum", enc_digital_max, dec_digital_max),
    SignalField::text("prefiltering", 80, enc_prefilter, dec_prefilter),
    SignalField::number("samples per record", enc_samples, dec_samples),
    SignalField::text("reserved", 32, enc_reserved, dec_reserved),
];

fn enc_label(s: &SignalParam) -> Option<String> {
    Some(s.label.clone())
}

fn enc_transducer(s: &SignalParam) -> Option<String> {
    Some(s.transducer.clone())
}

fn enc_dimension(s: &SignalParam) -> Option<String> {
    Some(s.physical_dimension.clone())
}

fn enc_physical_min(s: &SignalParam) -> Option<String> {
    format_number(s.physical_min, 8)
}

fn enc_physical_max(s: &SignalParam) -> Option<String> {
    format_number(s.physical_max, 8)
}

fn enc_digital_min(s: &SignalParam) -> Option<String> {
    Some(s.digital_min.to_string())
}

fn enc_digital_max(s: &SignalParam) -> Option<String> {
    Some(s.digital_max.to_string())
}

fn enc_prefilter(s: &SignalParam) -> Option<String> {
    Some(s.prefilter.clone())
}

fn enc_samples(s: &SignalParam) -> Option<String> {
    Some(s.samples_per_record.to_string())
}

fn enc_reserved(s: &SignalParam) -> Option<String> {
    Some(s.reserved.clone())
}

/// Drops the space padding of a field. Other trailing bytes are content.
fn unpad(v: &str) -> &str {
    v.trim_end_matches(' ')
}

fn dec_label(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.label = unpad(v).to_string();
    Ok(())
}

fn dec_transducer(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.transducer = unpad(v).to_string();
    Ok(())
}

fn dec_dimension(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.physical_dimension = unpad(v).to_string();
    Ok(())
}

fn dec_physical_min(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.physical_min = parse_float(v)?;
    Ok(())
}

fn dec_physical_max(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.physical_max = parse_float(v)?;
    Ok(())
}

fn dec_digital_min(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.digital_min = parse_int(v)?;
    Ok(())
}

fn dec_digital_max(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.digital_max = parse_int(v)?;
    Ok(())
}

fn dec_prefilter(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.prefilter = unpad(v).to_string();
    Ok(())
}

fn dec_samples(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    let n: i64 = parse_int(v)?;
    s.samples_per_record =
        usize::try_from(n).map_err(|_| format!("'{}' is negative", v.trim()))?;
    Ok(())
}

fn dec_reserved(s: &mut SignalParam, v: &str) -> std::result::Result<(), String> {
    s.reserved = unpad(v).to_string();
    Ok(())
}

fn parse_int<T: std::str::FromStr>(v: &str) -> std::result::Result<T, String> {
    if !is_integer_number(v) {
        return Err(format!("'{}' is not an integer", v.trim()));
    }
    v.trim()
        .trim_start_matches('+')
        .parse()
        .map_err(|_| format!("'{}' is out of range", v.trim()))
}

fn parse_float(v: &str) -> std::result::Result<f64, String> {
    if !is_number(v) {
        return Err(format!("'{}' is not a number", v.trim()));
    }
    v.trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", v.trim()))
}

/// Recorded spelling of a file-level field if `same` accepts it, else `canonical`.
fn spelling<'a>(
    source: &'a SourceText,
    name: &str,
    canonical: &'a str,
    same: impl Fn(&str) -> bool,
) -> &'a str {
    source.get(name).filter(|text| same(text)).unwrap_or(canonical)
}

fn malformed(msg: impl Into<String>) -> EdfError {
    EdfError::MalformedHeader(msg.into())
}

fn invalid(msg: impl Into<String>) -> EdfError {
    EdfError::InvalidHeader(msg.into())
}

/// Cursor over the fixed-width fields of a header buffer.
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        FieldReader { bytes, pos: 0 }
    }

    fn raw(&mut self, width: usize) -> &'a [u8] {
        let field = &self.bytes[self.pos..self.pos + width];
        self.pos += width;
        field
    }

    /// 按 Latin-1 逐字节解码, 不丢失信息
    fn text(&mut self, width: usize) -> String {
        self.raw(width).iter().map(|&b| char::from(b)).collect()
    }
}

/// Collects space-padded fields, refusing anything that would need truncation.
struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    fn with_capacity(capacity: usize) -> Self {
        FieldWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn text(&mut self, name: &str, value: &str, width: usize) -> Result<()> {
        let bytes = header_bytes(value).ok_or_else(|| {
            invalid(format!(
                "{} '{}' contains characters a header cannot hold",
                name, value
            ))
        })?;
        if bytes.len() > width {
            return Err(invalid(format!(
                "{} '{}' is {} bytes, the field holds {}",
                name,
                value,
                bytes.len(),
                width
            )));
        }
        self.buf.extend_from_slice(&bytes);
        self.buf.resize(self.buf.len() + width - bytes.len(), b' ');
        Ok(())
    }
}

/// Reads the header size declared in the fixed 256-byte block.
///
/// The declared size must equal `256 + 256 * signals`.
pub fn declared_header_size(main: &[u8]) -> Result<usize> {
    if main.len() < MAIN_HEADER_SIZE {
        return Err(malformed(format!("header block is {} bytes, expected 256", main.len())));
    }
    let signal_count: usize = parse_int(&String::from_utf8_lossy(&main[252..256]))
        .map_err(|e| malformed(format!("number of signals: {}", e)))?;
    if signal_count < 1 || signal_count > EDFLIB_MAXSIGNALS {
        return Err(malformed(format!("invalid number of signals: {}", signal_count)));
    }
    let header_size: usize = parse_int(&String::from_utf8_lossy(&main[184..192]))
        .map_err(|e| malformed(format!("header size: {}", e)))?;
    let expected = (signal_count + 1) * 256;
    if header_size != expected {
        return Err(malformed(format!(
            "header size field says {} bytes, {} signals need {}",
            header_size, signal_count, expected
        )));
    }
    Ok(header_size)
}

/// Parses a complete header block.
pub fn parse(bytes: &[u8]) -> Result<EdfHeader> {
    let header_size = declared_header_size(bytes)?;
    if bytes.len() < header_size {
        return Err(malformed(format!(
            "header is {} bytes, expected {}",
            bytes.len(),
            header_size
        )));
    }
    let signal_count = header_size / 256 - 1;
    let mut fields = FieldReader::new(&bytes[..header_size]);

    let version = fields.raw(8);
    let is_bdf = if version == &FileType::Bdf.version_field()[..] {
        true
    } else if version[0] == b'0' && version[1..].iter().all(|&b| b == b' ') {
        false
    } else {
        return Err(malformed(format!(
            "unknown version field {:?}",
            String::from_utf8_lossy(version)
        )));
    };

    let patient_id = unpad(&fields.text(80)).to_string();
    let recording_id = unpad(&fields.text(80)).to_string();
    let date_str = fields.text(8);
    let time_str = fields.text(8);
    let size_str = fields.text(8); // checked above
    let reserved = unpad(&fields.text(44)).to_string();
    let records_str = fields.text(8);
    let duration_str = fields.text(8);
    let count_str = fields.text(4); // checked above

    let mut source = SourceText::default();
    source.record("header size", unpad(&size_str));
    source.record("number of data records", unpad(&records_str));
    source.record("data record duration", unpad(&duration_str));
    source.record("number of signals", unpad(&count_str));

    let file_type = match (is_bdf, reserved.as_str()) {
        (false, r) if r.starts_with("EDF+C") || r.starts_with("EDF+D") => FileType::EdfPlus,
        (false, _) => FileType::Edf,
        (true, r) if r.starts_with("BDF+C") || r.starts_with("BDF+D") => FileType::BdfPlus,
        (true, _) => FileType::Bdf,
    };

    let mut start = parse_datetime(&date_str, &time_str)?;
    if file_type.is_plus() {
        // The recording field carries the four-digit year.
        if let Some(date) = RecordingInfo::parse(&recording_id).and_then(|r| r.startdate) {
            if date.year() % 100 == start.year() % 100 {
                if let Some(full) = start.with_year(date.year()) {
                    start = full;
                }
            }
        }
    }

    let datarecords_in_file: i64 = parse_int(&records_str)
        .map_err(|e| malformed(format!("number of data records: {}", e)))?;
    let datarecord_duration = parse_edf_time(&duration_str)
        .filter(|d| *d >= 0)
        .ok_or_else(|| malformed(format!("data record duration '{}'", duration_str.trim())))?;

    let mut signals = vec![SignalParam::default(); signal_count];
    for field in SIGNAL_FIELDS.iter() {
        for (i, signal) in signals.iter_mut().enumerate() {
            let value = fields.text(field.width);
            (field.decode)(signal, &value)
                .map_err(|e| malformed(format!("signal {} {}: {}", i, field.name, e)))?;
            if field.numeric {
                signal.source.record(field.name, unpad(&value));
            }
        }
    }

    let header = EdfHeader {
        file_type,
        patient_id,
        recording_id,
        start,
        reserved,
        datarecords_in_file,
        datarecord_duration,
        signals,
        source,
    };
    header.check().map_err(EdfError::MalformedHeader)?;

    debug!(
        "parsed {:?} header: {} signals, {} records of {} s",
        header.file_type,
        signal_count,
        header.datarecords_in_file,
        format_edf_time(header.datarecord_duration)
    );
    Ok(header)
}

/// 解析日期时间 "dd.mm.yy" "hh.mm.ss"
fn parse_datetime(date_str: &str, time_str: &str) -> Result<NaiveDateTime> {
    let split = |s: &str| -> Option<(u32, u32, u32)> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.len() != 2) {
            return None;
        }
        Some((
            parts[0].parse().ok()?,
            parts[1].parse().ok()?,
            parts[2].parse().ok()?,
        ))
    };

    let (day, month, yy) =
        split(date_str).ok_or_else(|| malformed(format!("start date '{}'", date_str)))?;
    let year = if yy >= 85 { 1900 + yy } else { 2000 + yy };
    let date = NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| malformed(format!("start date '{}'", date_str)))?;

    let (hour, minute, second) =
        split(time_str).ok_or_else(|| malformed(format!("start time '{}'", time_str)))?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| malformed(format!("start time '{}'", time_str)))?;

    Ok(date.and_time(time))
}

/// Serializes a header into exactly `header.header_size()` bytes.
pub fn serialize(header: &EdfHeader) -> Result<Vec<u8>> {
    header.check().map_err(EdfError::InvalidHeader)?;

    let mut out = FieldWriter::with_capacity(header.header_size());
    out.buf.extend_from_slice(&header.file_type.version_field());
    out.text("patient identification", &header.patient_id, 80)?;
    out.text("recording identification", &header.recording_id, 80)?;

    let start = header.start;
    if !(1985..=2084).contains(&start.year()) {
        return Err(invalid(format!(
            "start year {} is outside 1985..=2084",
            start.year()
        )));
    }
    let date = format!("{:02}.{:02}.{:02}", start.day(), start.month(), start.year() % 100);
    out.text("start date", &date, 8)?;
    let time = format!("{:02}.{:02}.{:02}", start.hour(), start.minute(), start.second());
    out.text("start time", &time, 8)?;

    let source = &header.source;
    let size = header.header_size().to_string();
    let size = spelling(source, "header size", &size, |t| {
        parse_int::<usize>(t) == Ok(header.header_size())
    });
    out.text("header size", size, 8)?;
    out.text("reserved", &header.reserved, 44)?;
    let records = header.datarecords_in_file.to_string();
    let records = spelling(source, "number of data records", &records, |t| {
        parse_int::<i64>(t) == Ok(header.datarecords_in_file)
    });
    out.text("number of data records", records, 8)?;
    let duration = format_edf_time(header.datarecord_duration);
    let duration = spelling(source, "data record duration", &duration, |t| {
        parse_edf_time(t) == Some(header.datarecord_duration)
    });
    out.text("data record duration", duration, 8)?;
    let count = header.signals.len().to_string();
    let count = spelling(source, "number of signals", &count, |t| {
        parse_int::<usize>(t) == Ok(header.signals.len())
    });
    out.text("number of signals", count, 4)?;

    for field in SIGNAL_FIELDS.iter() {
        for (i, signal) in header.signals.iter().enumerate() {
            let value = field.spell(signal).ok_or_else(|| {
                invalid(format!(
                    "signal {} {} does not fit in {} bytes",
                    i, field.name, field.width
                ))
            })?;
            out.text(&format!("signal {} {}", i, field.name), &value, field.width)?;
        }
    }

    debug_assert_eq!(out.buf.len(), header.header_size());
    debug!(
        "serialized {:?} header: {} bytes, {} signals",
        header.file_type,
        out.buf.len(),
        header.signals.len()
    );
    Ok(out.buf)
}

/// The 8 bytes written at [`RECORD_COUNT_OFFSET`] when a file is finalized.
pub fn record_count_field(records: i64) -> Result<[u8; 8]> {
    let text = format!("{:<8}", records);
    if text.len() != 8 {
        return Err(invalid(format!("record count {} does not fit in 8 bytes", records)));
    }
    let mut field = [b' '; 8];
    field.copy_from_slice(text.as_bytes());
    Ok(field)
}
