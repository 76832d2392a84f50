// Internal utilities for documentation tests
// This file contains helper functions to generate test files for doctests

use crate::{Annotation, EdfHeader, EdfWriter, FileType, PatientInfo, Result, SignalParam};
use chrono::NaiveDate;
use std::path::Path;

fn eeg_signal(label: &str, samples_per_record: usize) -> SignalParam {
    SignalParam {
        label: label.to_string(),
        transducer: "AgAgCl cup electrodes".to_string(),
        physical_dimension: "uV".to_string(),
        physical_min: -200.0,
        physical_max: 200.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: "HP:0.1Hz LP:70Hz".to_string(),
        samples_per_record,
        ..Default::default()
    }
}

fn sine(frequency: f64, amplitude: f64, rate: usize, second: usize) -> Vec<f64> {
    (0..rate)
        .map(|i| {
            let t = second as f64 + i as f64 / rate as f64;
            amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Creates a simple test EDF+ file for documentation examples
///
/// One 256 Hz EEG signal, one record of a 10 Hz sine wave.
pub fn create_simple_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut header = EdfHeader::new(FileType::EdfPlus);
    header.set_patient(&PatientInfo {
        code: "DOC001".to_string(),
        sex: "M".to_string(),
        birthdate: NaiveDate::from_ymd_opt(1990, 1, 1),
        name: "Test Patient".to_string(),
        ..Default::default()
    });
    header.add_signal(eeg_signal("EEG Fp1", 256));

    let mut writer = EdfWriter::create(&path, header)?;
    writer.write_samples(0, &sine(10.0, 50.0, 256, 0))?;
    writer.close()
}

/// Creates a multi-channel test EDF+ file for documentation examples
///
/// EEG at 256 Hz and respiration at 32 Hz, five records.
pub fn create_multi_channel_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut header = EdfHeader::new(FileType::EdfPlus);
    header.add_signal(eeg_signal("EEG C3", 256));
    header.add_signal(SignalParam {
        label: "Resp".to_string(),
        transducer: "Thermistor".to_string(),
        physical_dimension: "mV".to_string(),
        physical_min: -10.0,
        physical_max: 10.0,
        digital_min: -32768,
        digital_max: 32767,
        samples_per_record: 32,
        ..Default::default()
    });

    let mut writer = EdfWriter::create(&path, header)?;
    writer.write_annotation(Annotation::new(1.0, None, "Recording start"))?;
    for second in 0..5 {
        writer.write_record(&[sine(10.0, 50.0, 256, second), sine(0.25, 5.0, 32, second)])?;
    }
    writer.close()
}

/// Creates a test file with annotations for documentation examples
pub fn create_annotated_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut header = EdfHeader::new(FileType::EdfPlus);
    header.add_signal(eeg_signal("EEG Fp1", 256));

    let mut writer = EdfWriter::create(&path, header)?;
    writer.write_annotation(Annotation::new(0.5, Some(1.0), "Eyes closed"))?;
    writer.write_annotation(Annotation::new(2.25, None, "Spike"))?;
    for second in 0..3 {
        writer.write_samples(0, &sine(10.0, 50.0, 256, second))?;
    }
    writer.close()
}
