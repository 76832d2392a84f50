use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EdfError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Header bytes read from a file could not be parsed.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// A caller-supplied header cannot be written as-is.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid argument: {0}")]
    InvalidFormat(String),

    #[error("Signal index {0} out of range or not a data signal")]
    InvalidSignalIndex(usize),

    #[error("Record {record}: expected {expected} bytes, got {actual}")]
    RecordSizeMismatch {
        record: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Signal {signal}: physical value {value} outside [{min}, {max}]")]
    PhysicalRange {
        signal: usize,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Annotation in record {record} at byte {offset}: {reason}")]
    AnnotationParse {
        record: usize,
        offset: usize,
        reason: String,
    },

    #[error("Annotation needs {needed} bytes but the annotation channel holds {available}")]
    AnnotationOverflow { needed: usize, available: usize },

    #[error("Index {index} out of range (limit {limit})")]
    OutOfRange { index: usize, limit: usize },

    #[error("Signal {signal} has {buffered} buffered samples, not a full record of {samples_per_record}")]
    IncompleteRecord {
        signal: usize,
        buffered: usize,
        samples_per_record: usize,
    },
}

impl EdfError {
    /// Errors that only affect a single annotation; the record stream stays readable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EdfError::AnnotationParse { .. })
    }
}

pub type Result<T> = std::result::Result<T, EdfError>;
