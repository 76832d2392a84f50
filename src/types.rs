use chrono::{Datelike, NaiveDate, NaiveDateTime};

use crate::error::Result;
use crate::record::Scaling;
use crate::{EDFLIB_MAXSIGNALS, EDFLIB_TIME_DIMENSION};

/// The four members of the EDF family handled by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Edf,
    EdfPlus,
    Bdf,
    BdfPlus,
}

impl FileType {
    /// Width of one stored sample: 2 bytes for EDF, 3 for BDF.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            FileType::Edf | FileType::EdfPlus => 2,
            FileType::Bdf | FileType::BdfPlus => 3,
        }
    }

    /// Whether records carry an annotation (TAL) channel.
    pub fn is_plus(&self) -> bool {
        matches!(self, FileType::EdfPlus | FileType::BdfPlus)
    }

    pub fn is_bdf(&self) -> bool {
        matches!(self, FileType::Bdf | FileType::BdfPlus)
    }

    /// Smallest and largest digital value the sample width can store.
    pub fn digital_limits(&self) -> (i32, i32) {
        if self.is_bdf() {
            (-8_388_608, 8_388_607)
        } else {
            (i16::MIN as i32, i16::MAX as i32)
        }
    }

    /// The 8-byte version field that opens the file.
    pub fn version_field(&self) -> [u8; 8] {
        if self.is_bdf() {
            *b"\xffBIOSEMI"
        } else {
            *b"0       "
        }
    }

    /// Marker written into the 44-byte reserved field for new files.
    pub fn default_reserved(&self) -> &'static str {
        match self {
            FileType::Edf => "",
            FileType::EdfPlus => "EDF+C",
            FileType::Bdf => "24BIT",
            FileType::BdfPlus => "BDF+C",
        }
    }

    /// Label that marks a channel as the annotation channel.
    pub fn annotation_label(&self) -> &'static str {
        if self.is_bdf() {
            "BDF Annotations"
        } else {
            "EDF Annotations"
        }
    }
}

/// Per-signal metadata (one channel descriptor of the signal header block)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalParam {
    pub label: String,
    pub transducer: String,
    pub physical_dimension: String,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i32,
    pub digital_max: i32,
    pub prefilter: String,
    pub samples_per_record: usize,
    pub reserved: String,
    /// Numeric fields as spelled in the file this descriptor was read from
    pub source: SourceText,
}

/// On-disk spelling of numeric header fields, keyed by field name.
///
/// Serializing writes a recorded spelling back as long as it still denotes
/// the current value, so `-200.0` stays `-200.0` instead of becoming `-200`.
/// It never takes part in comparisons.
#[derive(Debug, Clone, Default)]
pub struct SourceText {
    fields: Vec<(&'static str, String)>,
}

impl SourceText {
    pub(crate) fn record(&mut self, name: &'static str, text: &str) {
        self.fields.retain(|(n, _)| *n != name);
        self.fields.push((name, text.to_string()));
    }

    /// Recorded spelling of a field, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, text)| text.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl PartialEq for SourceText {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl SignalParam {
    /// Builds the descriptor of an annotation channel that is `bytes` wide per record.
    ///
    /// The width is rounded up to whole samples of the file type.
    pub fn annotation(file_type: FileType, bytes: usize) -> Self {
        let bps = file_type.bytes_per_sample();
        let (digital_min, digital_max) = file_type.digital_limits();
        SignalParam {
            label: file_type.annotation_label().to_string(),
            physical_min: -1.0,
            physical_max: 1.0,
            digital_min,
            digital_max,
            samples_per_record: (bytes + bps - 1) / bps,
            ..Default::default()
        }
    }

    /// 是否为注释信号
    pub fn is_annotation(&self) -> bool {
        let label = self.label.trim_end();
        label == "EDF Annotations" || label == "BDF Annotations"
    }

    /// 计算物理值转换参数
    pub fn bit_value(&self) -> f64 {
        (self.physical_max - self.physical_min) / (self.digital_max - self.digital_min) as f64
    }

    /// 计算偏移量
    pub fn offset(&self) -> f64 {
        Scaling::new(self).offset()
    }

    /// 将数字值转换为物理值
    pub fn to_physical(&self, digital_value: i32) -> f64 {
        Scaling::new(self).to_physical(digital_value)
    }

    /// 将物理值转换为数字值, 超出物理范围时报错
    pub fn to_digital(&self, physical_value: f64) -> Result<i32> {
        Scaling::new(self).to_digital(physical_value, Default::default(), 0)
    }

    /// Checks the invariants that make scaling well defined.
    ///
    /// Annotation channels only need a positive sample count.
    pub(crate) fn check(&self, file_type: FileType) -> std::result::Result<(), String> {
        if self.samples_per_record == 0 {
            return Err(format!("signal '{}' has zero samples per record", self.label));
        }
        if self.is_annotation() {
            return Ok(());
        }
        if !self.physical_min.is_finite() || !self.physical_max.is_finite() {
            return Err(format!("signal '{}' has a non-finite physical range", self.label));
        }
        if self.physical_min >= self.physical_max {
            return Err(format!(
                "signal '{}': physical minimum {} is not below maximum {}",
                self.label, self.physical_min, self.physical_max
            ));
        }
        if self.digital_min >= self.digital_max {
            return Err(format!(
                "signal '{}': digital minimum {} is not below maximum {}",
                self.label, self.digital_min, self.digital_max
            ));
        }
        let (lo, hi) = file_type.digital_limits();
        if self.digital_min < lo || self.digital_max > hi {
            return Err(format!(
                "signal '{}': digital range [{}, {}] exceeds [{}, {}]",
                self.label, self.digital_min, self.digital_max, lo, hi
            ));
        }
        Ok(())
    }
}

/// A time-stamped annotation. Times are in units of 100 ns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Onset relative to the start of the recording
    pub onset: i64,
    pub duration: Option<i64>,
    pub texts: Vec<String>,
}

impl Annotation {
    pub fn new(onset_seconds: f64, duration_seconds: Option<f64>, text: &str) -> Self {
        Annotation {
            onset: seconds_to_ticks(onset_seconds),
            duration: duration_seconds.map(seconds_to_ticks),
            texts: vec![text.to_string()],
        }
    }

    pub fn onset_seconds(&self) -> f64 {
        self.onset as f64 / EDFLIB_TIME_DIMENSION as f64
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration.map(|d| d as f64 / EDFLIB_TIME_DIMENSION as f64)
    }

    /// First text of the annotation, or an empty string.
    pub fn description(&self) -> &str {
        self.texts.first().map(String::as_str).unwrap_or("")
    }
}

fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * EDFLIB_TIME_DIMENSION as f64).round() as i64
}

/// EDF+ patient identification subfields
///
/// Stored as `code sex birthdate name additional`, `X` marking an unknown
/// subfield and `_` replacing spaces inside a subfield.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientInfo {
    pub code: String,
    pub sex: String,
    pub birthdate: Option<NaiveDate>,
    pub name: String,
    pub additional: String,
}

impl PatientInfo {
    pub fn parse(field: &str) -> Self {
        let parts: Vec<&str> = field.split_whitespace().collect();
        let sub = |i: usize| -> String {
            match parts.get(i) {
                Some(&"X") | None => String::new(),
                Some(s) => s.to_string(),
            }
        };

        PatientInfo {
            code: sub(0),
            sex: sub(1),
            birthdate: parts.get(2).and_then(|s| parse_edfplus_date(s)),
            name: sub(3),
            additional: parts.get(4..).map(|s| s.join(" ")).unwrap_or_default(),
        }
    }

    pub fn to_field(&self) -> String {
        let birthdate = self
            .birthdate
            .map(format_edfplus_date)
            .unwrap_or_else(|| "X".to_string());
        let mut field = format!(
            "{} {} {} {}",
            subfield(&self.code),
            subfield(&self.sex),
            birthdate,
            subfield(&self.name)
        );
        if !self.additional.is_empty() {
            field.push(' ');
            field.push_str(&self.additional);
        }
        field
    }
}

/// EDF+ recording identification subfields
///
/// Stored as `Startdate dd-MMM-yyyy admincode technician equipment additional`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingInfo {
    pub startdate: Option<NaiveDate>,
    pub admin_code: String,
    pub technician: String,
    pub equipment: String,
    pub additional: String,
}

impl RecordingInfo {
    /// Returns `None` when the field does not open with `Startdate`.
    pub fn parse(field: &str) -> Option<Self> {
        let parts: Vec<&str> = field.split_whitespace().collect();
        if parts.first() != Some(&"Startdate") {
            return None;
        }
        let sub = |i: usize| -> String {
            match parts.get(i) {
                Some(&"X") | None => String::new(),
                Some(s) => s.to_string(),
            }
        };

        Some(RecordingInfo {
            startdate: parts.get(1).and_then(|s| parse_edfplus_date(s)),
            admin_code: sub(2),
            technician: sub(3),
            equipment: sub(4),
            additional: parts.get(5..).map(|s| s.join(" ")).unwrap_or_default(),
        })
    }

    pub fn to_field(&self) -> String {
        let startdate = self
            .startdate
            .map(format_edfplus_date)
            .unwrap_or_else(|| "X".to_string());
        let mut field = format!(
            "Startdate {} {} {} {}",
            startdate,
            subfield(&self.admin_code),
            subfield(&self.technician),
            subfield(&self.equipment)
        );
        if !self.additional.is_empty() {
            field.push(' ');
            field.push_str(&self.additional);
        }
        field
    }
}

fn subfield(value: &str) -> String {
    if value.trim().is_empty() {
        "X".to_string()
    } else {
        value.trim().replace(' ', "_")
    }
}

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Parses `dd-MMM-yyyy`.
fn parse_edfplus_date(s: &str) -> Option<NaiveDate> {
    let mut parts = s.split('-');
    let day: u32 = parts.next()?.parse().ok()?;
    let month = parts.next()?.to_ascii_uppercase();
    let month = MONTHS.iter().position(|m| *m == month)? as u32 + 1;
    let year_str = parts.next()?;
    if year_str.len() != 4 || parts.next().is_some() {
        return None;
    }
    let year: i32 = year_str.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn format_edfplus_date(date: NaiveDate) -> String {
    format!(
        "{:02}-{}-{:04}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

/// File header: file-level fields plus one descriptor per channel,
/// annotation channels included, in on-disk order.
#[derive(Debug, Clone, PartialEq)]
pub struct EdfHeader {
    pub file_type: FileType,
    /// Raw 80-byte patient field (see [`PatientInfo`] for EDF+)
    pub patient_id: String,
    /// Raw 80-byte recording field (see [`RecordingInfo`] for EDF+)
    pub recording_id: String,
    pub start: NaiveDateTime,
    pub reserved: String,
    /// `-1` while a writer has not finalized the file
    pub datarecords_in_file: i64,
    /// 数据记录持续时间（100纳秒为单位）
    pub datarecord_duration: i64,
    pub signals: Vec<SignalParam>,
    /// File-level numeric fields as spelled on disk
    pub source: SourceText,
}

impl EdfHeader {
    /// An empty header with anonymized identification fields, starting
    /// 01.01.1985 00:00:00 with one-second records.
    pub fn new(file_type: FileType) -> Self {
        let start = NaiveDate::from_ymd_opt(1985, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        let (patient_id, recording_id) = if file_type.is_plus() {
            (
                PatientInfo::default().to_field(),
                RecordingInfo {
                    startdate: Some(start.date()),
                    ..Default::default()
                }
                .to_field(),
            )
        } else {
            (String::new(), String::new())
        };

        EdfHeader {
            file_type,
            patient_id,
            recording_id,
            start,
            reserved: file_type.default_reserved().to_string(),
            datarecords_in_file: -1,
            datarecord_duration: EDFLIB_TIME_DIMENSION,
            signals: Vec::new(),
            source: SourceText::default(),
        }
    }

    pub fn add_signal(&mut self, signal: SignalParam) -> &mut Self {
        self.signals.push(signal);
        self
    }

    /// Sets the start date-time, keeping the EDF+ recording startdate in step.
    pub fn set_start(&mut self, start: NaiveDateTime) -> &mut Self {
        self.start = start;
        if self.file_type.is_plus() {
            if let Some(mut info) = RecordingInfo::parse(&self.recording_id) {
                info.startdate = Some(start.date());
                self.recording_id = info.to_field();
            }
        }
        self
    }

    pub fn set_patient(&mut self, patient: &PatientInfo) -> &mut Self {
        self.patient_id = patient.to_field();
        self
    }

    pub fn set_recording(&mut self, recording: &RecordingInfo) -> &mut Self {
        self.recording_id = recording.to_field();
        self
    }

    pub fn set_datarecord_duration(&mut self, seconds: f64) -> &mut Self {
        self.datarecord_duration = seconds_to_ticks(seconds);
        self
    }

    /// EDF+ view of the patient field
    pub fn patient(&self) -> PatientInfo {
        PatientInfo::parse(&self.patient_id)
    }

    /// EDF+ view of the recording field
    pub fn recording(&self) -> Option<RecordingInfo> {
        RecordingInfo::parse(&self.recording_id)
    }

    pub fn header_size(&self) -> usize {
        (self.signals.len() + 1) * 256
    }

    /// Bytes in one data record.
    pub fn record_size(&self) -> usize {
        self.signals
            .iter()
            .map(|s| s.samples_per_record * self.file_type.bytes_per_sample())
            .sum()
    }

    pub fn data_signal_indices(&self) -> Vec<usize> {
        self.signals
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_annotation())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn annotation_signal_indices(&self) -> Vec<usize> {
        self.signals
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_annotation())
            .map(|(i, _)| i)
            .collect()
    }

    /// 文件持续时间（100纳秒为单位）
    pub fn file_duration(&self) -> i64 {
        self.datarecords_in_file
            .max(0)
            .saturating_mul(self.datarecord_duration)
    }

    pub fn datarecord_duration_seconds(&self) -> f64 {
        self.datarecord_duration as f64 / EDFLIB_TIME_DIMENSION as f64
    }

    /// Samples per second of a signal.
    pub fn sample_frequency(&self, signal: usize) -> Option<f64> {
        let spr = self.signals.get(signal)?.samples_per_record as f64;
        if self.datarecord_duration <= 0 {
            return None;
        }
        Some(spr / self.datarecord_duration_seconds())
    }

    /// Semantic checks shared by parsing and writing.
    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        if self.signals.is_empty() || self.signals.len() > EDFLIB_MAXSIGNALS {
            return Err(format!(
                "number of signals must be 1..={}, got {}",
                EDFLIB_MAXSIGNALS,
                self.signals.len()
            ));
        }
        if self.datarecord_duration < 0 {
            return Err("negative data record duration".to_string());
        }
        if self.datarecords_in_file < -1 {
            return Err(format!("invalid record count {}", self.datarecords_in_file));
        }
        for signal in &self.signals {
            signal.check(self.file_type)?;
        }
        Ok(())
    }
}
