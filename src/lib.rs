//! # EDF/EDF+/BDF/BDF+ codec for Rust
//!
//! A pure Rust library for reading and writing European Data Format files
//! (EDF, EDF+) and their 24-bit BioSemi variants (BDF, BDF+).
//!
//! The crate is layered: [`header`] turns the fixed-width ASCII header block
//! into an [`EdfHeader`] and back, [`record`] (de)interleaves the samples of
//! one data record and scales them, [`annotation`] handles the Time-stamped
//! Annotation Lists of EDF+/BDF+, and [`EdfReader`] / [`EdfWriter`] stream
//! whole files on top of them.
//!
//! ## Quick Start
//!
//! ### Writing a file
//!
//! ```rust
//! use edfcodec::{Annotation, EdfHeader, FileType, SignalParam, WriterOptions};
//!
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("test_output.edf");
//! let mut header = EdfHeader::new(FileType::EdfPlus);
//! header.add_signal(SignalParam {
//!     label: "EEG Fp1".to_string(),
//!     transducer: "AgAgCl cup electrodes".to_string(),
//!     physical_dimension: "uV".to_string(),
//!     physical_min: -200.0,
//!     physical_max: 200.0,
//!     digital_min: -2048,
//!     digital_max: 2047,
//!     prefilter: "HP:0.1Hz LP:70Hz".to_string(),
//!     samples_per_record: 256,
//!     ..Default::default()
//! });
//!
//! let mut writer = edfcodec::open_for_write(&path, header, WriterOptions::default())?;
//! writer.write_annotation(Annotation::new(0.5, Some(1.0), "Eyes open"))?;
//! for _ in 0..10 {
//!     writer.write_samples(0, &[10.0; 256])?;
//! }
//! writer.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Reading a file
//!
//! ```rust
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("test_data.edf");
//! # edfcodec::doctest_utils::create_multi_channel_test_file(&path)?;
//! let mut reader = edfcodec::open_for_read(&path)?;
//!
//! let header = reader.header();
//! println!("Number of signals: {}", header.signals.len());
//! println!("File duration: {:.2} seconds",
//!     header.file_duration() as f64 / edfcodec::EDFLIB_TIME_DIMENSION as f64);
//!
//! // First 100 samples of signal 0
//! let samples = reader.read_channel(0, 0..100)?;
//! assert_eq!(samples.len(), 100);
//!
//! let annotations = reader.read_annotations()?;
//! for annotation in &annotations.annotations {
//!     println!("{:.3}s {}", annotation.onset_seconds(), annotation.description());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Physical vs Digital Values
//!
//! Samples are stored as 16-bit (EDF) or 24-bit (BDF) integers. Each signal
//! maps its digital range linearly onto its physical range:
//!
//! ```rust
//! use edfcodec::SignalParam;
//!
//! let signal = SignalParam {
//!     label: "Test Signal".to_string(),
//!     physical_max: 100.0,
//!     physical_min: -100.0,
//!     digital_max: 32767,
//!     digital_min: -32768,
//!     samples_per_record: 256,
//!     ..Default::default()
//! };
//!
//! let physical_value = signal.to_physical(16384);
//! assert!((physical_value - 50.0).abs() < 0.1);
//!
//! let digital_value = signal.to_digital(25.0)?;
//! assert!((digital_value - 8192).abs() <= 1);
//!
//! // Writing outside the physical range fails unless clamping is requested
//! assert!(signal.to_digital(100.5).is_err());
//! # Ok::<(), edfcodec::EdfError>(())
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger.

pub mod annotation;
pub mod error;
pub mod header;
pub mod reader;
pub mod record;
pub mod types;
pub mod utils;
pub mod writer;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

use std::path::Path;

// Re-export main types for convenience
pub use error::{EdfError, Result};
pub use reader::{AnnotationIter, AnnotationList, EdfReader, Records};
pub use record::{ChannelData, DataRecord, RangePolicy, RecordLayout, SampleWidth, Scaling};
pub use types::{
    Annotation, EdfHeader, FileType, PatientInfo, RecordingInfo, SignalParam, SourceText,
};
pub use writer::{EdfWriter, WriterOptions};

// Important constants
pub const EDFLIB_TIME_DIMENSION: i64 = 10_000_000; // 100 nanoseconds unit
pub const EDFLIB_MAXSIGNALS: usize = 4096;
/// Default width of an annotation channel in bytes per record
pub const EDFLIB_ANNOTATION_BYTES: usize = 120;

/// Opens a file for reading. Same as [`EdfReader::open`].
pub fn open_for_read<P: AsRef<Path>>(path: P) -> Result<EdfReader> {
    EdfReader::open(path)
}

/// Creates a file and writes its header. Same as
/// [`EdfWriter::create_with_options`].
pub fn open_for_write<P: AsRef<Path>>(
    path: P,
    header: EdfHeader,
    options: WriterOptions,
) -> Result<EdfWriter> {
    EdfWriter::create_with_options(path, header, options)
}

/// Library version
///
/// ```rust
/// let version = edfcodec::version();
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
