use chrono::NaiveDate;
use edfcodec::header;
use edfcodec::{
    EdfError, EdfHeader, EdfReader, EdfWriter, FileType, PatientInfo, RecordingInfo, SignalParam,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// 创建测试信号的辅助函数
fn create_test_eeg_signal() -> SignalParam {
    SignalParam {
        label: "EEG Fp1".to_string(),
        transducer: "AgAgCl electrodes".to_string(),
        physical_dimension: "uV".to_string(),
        physical_min: -200.0,
        physical_max: 200.0,
        digital_min: -2048,
        digital_max: 2047,
        prefilter: "HP:0.1Hz LP:70Hz".to_string(),
        samples_per_record: 256,
        ..Default::default()
    }
}

fn create_test_ecg_signal() -> SignalParam {
    SignalParam {
        label: "ECG Lead II".to_string(),
        transducer: "Chest electrodes".to_string(),
        physical_dimension: "mV".to_string(),
        physical_min: -5.0,
        physical_max: 5.0,
        digital_min: -32768,
        digital_max: 32767,
        prefilter: "HP:0.1Hz LP:100Hz".to_string(),
        samples_per_record: 256,
        ..Default::default()
    }
}

fn scratch(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    (dir, path)
}

fn header_with(file_type: FileType, signals: Vec<SignalParam>) -> EdfHeader {
    let mut header = EdfHeader::new(file_type);
    for signal in signals {
        header.add_signal(signal);
    }
    header
}

fn sine_second(second: usize, rate: usize, freq: f64, amplitude: f64) -> Vec<f64> {
    (0..rate)
        .map(|i| {
            let t = (second * rate + i) as f64 / rate as f64;
            amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()
        })
        .collect()
}

fn raw_header(path: &Path) -> Vec<u8> {
    let bytes = fs::read(path).unwrap();
    let size = header::declared_header_size(&bytes).unwrap();
    bytes[..size].to_vec()
}

#[test]
fn test_single_channel_round_trip_within_one_step() {
    let (_dir, path) = scratch("round_trip.edf");

    let mut samples = vec![0.0, 100.0, -100.0];
    samples.resize(256, 0.0);
    {
        let header = header_with(FileType::Edf, vec![create_test_eeg_signal()]);
        let mut writer = EdfWriter::create(&path, header).unwrap();
        writer.write_samples(0, &samples).unwrap();
        writer.close().unwrap();
    }

    let mut reader = EdfReader::open(&path).unwrap();
    let step = reader.layout().channels()[0].scaling.gain();
    assert!((step - 400.0 / 4095.0).abs() < 1e-12);

    let back = reader.read_channel(0, 0..3).unwrap();
    for (written, read) in [0.0, 100.0, -100.0].iter().zip(&back) {
        assert!(
            (written - read).abs() <= step,
            "wrote {}, read {}, step {}",
            written,
            read,
            step
        );
    }
    assert_eq!(reader.header().datarecords_in_file, 1);
}

#[test]
fn test_physical_limits_round_trip_exactly() {
    let (_dir, path) = scratch("limits.edf");
    let mut signal = create_test_eeg_signal();
    signal.physical_min = -0.1;
    signal.physical_max = 0.3;
    signal.samples_per_record = 2;

    {
        let header = header_with(FileType::Edf, vec![signal]);
        let mut writer = EdfWriter::create(&path, header).unwrap();

        let above = f64::from_bits(0.3f64.to_bits() + 1);
        let below = f64::from_bits((-0.1f64).to_bits() + 1);
        for value in [above, below] {
            assert!(matches!(
                writer.write_sample(0, value),
                Err(EdfError::PhysicalRange { signal: 0, .. })
            ));
        }

        writer.write_samples(0, &[-0.1, 0.3]).unwrap();
        writer.close().unwrap();
    }

    let mut reader = EdfReader::open(&path).unwrap();
    assert_eq!(reader.read_channel(0, 0..2).unwrap(), vec![-0.1, 0.3]);
}

#[test]
fn test_truncated_file_reports_record_size_mismatch() {
    let (_dir, path) = scratch("truncated.edf");
    {
        let header = header_with(FileType::Edf, vec![create_test_eeg_signal()]);
        let mut writer = EdfWriter::create(&path, header).unwrap();
        writer.write_samples(0, &sine_second(0, 256, 10.0, 50.0)).unwrap();
        writer.write_samples(0, &sine_second(1, 256, 10.0, 50.0)).unwrap();
        writer.close().unwrap();
    }

    // 截断到头部加半个记录
    let header_size = raw_header(&path).len() as u64;
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(header_size + 256).unwrap();
    drop(file);

    let mut reader = EdfReader::open(&path).unwrap();
    assert_eq!(reader.header().signals[0].label, "EEG Fp1");
    assert_eq!(reader.header().datarecords_in_file, 2);

    match reader.read_record(0) {
        Err(EdfError::RecordSizeMismatch { record, expected, actual }) => {
            assert_eq!(record, 0);
            assert_eq!(expected, 512);
            assert_eq!(actual, 256);
        }
        other => panic!("expected RecordSizeMismatch, got {:?}", other.map(|r| r.index)),
    }
    assert!(matches!(
        reader.read_channel(0, 0..10),
        Err(EdfError::RecordSizeMismatch { record: 0, .. })
    ));
}

#[test]
fn test_close_with_partial_record() {
    let (_dir, path) = scratch("partial.edf");
    {
        let header = header_with(FileType::Edf, vec![create_test_eeg_signal()]);
        let mut writer = EdfWriter::create(&path, header).unwrap();
        writer.write_samples(0, &vec![1.0; 384]).unwrap();
        assert_eq!(writer.records_written(), 1);

        match writer.close() {
            Err(EdfError::IncompleteRecord { signal, buffered, samples_per_record }) => {
                assert_eq!(signal, 0);
                assert_eq!(buffered, 128);
                assert_eq!(samples_per_record, 256);
            }
            other => panic!("expected IncompleteRecord, got {:?}", other),
        }
    }

    let header_size = raw_header(&path).len() as u64;
    assert_eq!(fs::metadata(&path).unwrap().len(), header_size + 512);

    let mut reader = EdfReader::open(&path).unwrap();
    assert_eq!(reader.header().datarecords_in_file, 1);
    assert_eq!(reader.record_count(), 1);
    assert_eq!(reader.read_channel(0, 0..256).unwrap().len(), 256);
}

#[test]
fn test_header_idempotence_from_file() {
    let (_dir, path) = scratch("idempotent.edf");
    {
        let mut header = header_with(
            FileType::EdfPlus,
            vec![create_test_eeg_signal(), create_test_ecg_signal()],
        );
        header.set_patient(&PatientInfo {
            code: "P001".to_string(),
            sex: "F".to_string(),
            birthdate: NaiveDate::from_ymd_opt(1971, 3, 2),
            name: "Jane Doe".to_string(),
            additional: String::new(),
        });
        header.set_recording(&RecordingInfo {
            startdate: None,
            admin_code: "ADM-7".to_string(),
            technician: "tech".to_string(),
            equipment: "amp 3".to_string(),
            additional: String::new(),
        });
        let start = NaiveDate::from_ymd_opt(2023, 5, 17)
            .and_then(|d| d.and_hms_opt(10, 20, 30))
            .unwrap();
        header.set_start(start);

        let mut writer = EdfWriter::create(&path, header).unwrap();
        writer
            .write_record(&[sine_second(0, 256, 10.0, 50.0), sine_second(0, 256, 1.0, 2.0)])
            .unwrap();
        writer.close().unwrap();
    }

    let bytes = raw_header(&path);
    let parsed = header::parse(&bytes).unwrap();
    assert_eq!(header::serialize(&parsed).unwrap(), bytes);

    assert_eq!(parsed.start.to_string(), "2023-05-17 10:20:30");
    let patient = parsed.patient();
    assert_eq!(patient.name, "Jane_Doe");
    assert_eq!(patient.birthdate, NaiveDate::from_ymd_opt(1971, 3, 2));
    let recording = parsed.recording().unwrap();
    assert_eq!(recording.startdate, NaiveDate::from_ymd_opt(2023, 5, 17));
    assert_eq!(recording.equipment, "amp_3");
}

#[test]
fn test_header_from_another_writer_round_trips() {
    let (_dir, path) = scratch("foreign.edf");
    {
        let header = header_with(FileType::Edf, vec![create_test_eeg_signal()]);
        let mut writer = EdfWriter::create(&path, header).unwrap();
        writer.write_samples(0, &sine_second(0, 256, 10.0, 50.0)).unwrap();
        writer.close().unwrap();
    }

    // 其他软件常见的写法: 补零小数, 显式正号, Latin-1 单位
    let mut bytes = fs::read(&path).unwrap();
    for (at, text) in [
        (244, &b"1.000000"[..]),
        (352, &b"\xb5V      "[..]),
        (360, &b"-200.0  "[..]),
        (368, &b"+200.000"[..]),
        (472, &b" 256    "[..]),
    ] {
        bytes[at..at + text.len()].copy_from_slice(text);
    }
    fs::write(&path, &bytes).unwrap();

    let mut reader = EdfReader::open(&path).unwrap();
    let parsed = reader.header().clone();
    assert_eq!(parsed.signals[0].physical_dimension, "\u{b5}V");
    assert_eq!(parsed.signals[0].physical_max, 200.0);
    assert_eq!(header::serialize(&parsed).unwrap(), raw_header(&path));
    assert_eq!(reader.read_channel(0, 0..256).unwrap().len(), 256);

    // 读到的头部可以直接用于写新文件
    let (_copy_dir, copy) = scratch("copy.edf");
    {
        let mut writer = EdfWriter::create(&copy, parsed).unwrap();
        writer.write_samples(0, &sine_second(0, 256, 10.0, 50.0)).unwrap();
        writer.close().unwrap();
    }
    let copied = raw_header(&copy);
    assert_eq!(&copied[352..368], &bytes[352..368]);
    assert_eq!(&copied[244..252], b"1.000000");
}

#[test]
fn test_multi_channel_recording() {
    let (_dir, path) = scratch("multi.edf");
    let mut resp = create_test_ecg_signal();
    resp.label = "Resp".to_string();
    resp.samples_per_record = 32;

    {
        let header = header_with(FileType::EdfPlus, vec![create_test_eeg_signal(), resp]);
        let mut writer = EdfWriter::create(&path, header).unwrap();
        for second in 0..10 {
            writer
                .write_record(&[
                    sine_second(second, 256, 10.0, 50.0),
                    sine_second(second, 32, 0.25, 4.0),
                ])
                .unwrap();
        }
        writer.close().unwrap();
    }

    let mut reader = EdfReader::open(&path).unwrap();
    let header = reader.header();
    assert_eq!(header.file_type, FileType::EdfPlus);
    assert_eq!(header.signals.len(), 3);
    assert_eq!(header.data_signal_indices(), vec![0, 1]);
    assert_eq!(header.sample_frequency(0), Some(256.0));
    assert_eq!(header.sample_frequency(1), Some(32.0));
    assert_eq!(header.file_duration(), 10 * 10_000_000);

    // 跨记录读取
    let eeg_step = reader.layout().channels()[0].scaling.gain();
    let eeg = reader.read_channel(0, 250..520).unwrap();
    let expected: Vec<f64> = (0..3)
        .flat_map(|s| sine_second(s, 256, 10.0, 50.0))
        .collect();
    assert_eq!(eeg.len(), 270);
    for (read, want) in eeg.iter().zip(&expected[250..520]) {
        assert!((read - want).abs() <= eeg_step);
    }

    let resp_step = reader.layout().channels()[1].scaling.gain();
    let resp = reader.read_channel(1, 0..320).unwrap();
    assert_eq!(resp.len(), 320);
    let expected: Vec<f64> = (0..10).flat_map(|s| sine_second(s, 32, 0.25, 4.0)).collect();
    for (read, want) in resp.iter().zip(&expected) {
        assert!((read - want).abs() <= resp_step);
    }

    assert!(matches!(reader.read_channel(2, 0..1), Err(EdfError::InvalidSignalIndex(2))));
    assert!(matches!(reader.read_channel(5, 0..1), Err(EdfError::InvalidSignalIndex(5))));
    assert!(matches!(
        reader.read_channel(1, 0..321),
        Err(EdfError::OutOfRange { index: 321, limit: 320 })
    ));
    assert!(reader.read_channel(0, 100..100).unwrap().is_empty());
}

#[test]
fn test_bdf_round_trip() {
    let (_dir, path) = scratch("biosemi.bdf");
    let signal = SignalParam {
        label: "A1".to_string(),
        physical_dimension: "uV".to_string(),
        physical_min: -262144.0,
        physical_max: 262143.0,
        digital_min: -8_388_608,
        digital_max: 8_388_607,
        samples_per_record: 512,
        ..Default::default()
    };
    let values: Vec<f64> = (0..512).map(|i| (i as f64 - 256.0) * 1000.5).collect();

    {
        let header = header_with(FileType::Bdf, vec![signal]);
        let mut writer = EdfWriter::create(&path, header).unwrap();
        writer.write_samples(0, &values).unwrap();
        writer.close().unwrap();
    }

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..8], b"\xffBIOSEMI");
    assert_eq!(&bytes[192..197], b"24BIT");
    assert_eq!(bytes.len(), 512 + 512 * 3);

    let mut reader = EdfReader::open(&path).unwrap();
    assert_eq!(reader.header().file_type, FileType::Bdf);
    let step = reader.layout().channels()[0].scaling.gain();
    let back = reader.read_channel(0, 0..512).unwrap();
    for (written, read) in values.iter().zip(&back) {
        assert!((written - read).abs() <= step);
    }

    let digital = reader.read_digital_samples(0, 2).unwrap();
    assert_eq!(digital.len(), 2);
    assert!(digital[0] < 0);
}

#[test]
fn test_bdf_plus_header_markers() {
    let (_dir, path) = scratch("biosemi_plus.bdf");
    let mut signal = create_test_eeg_signal();
    signal.digital_min = -8_388_608;
    signal.digital_max = 8_388_607;
    {
        let header = header_with(FileType::BdfPlus, vec![signal]);
        let mut writer = EdfWriter::create(&path, header).unwrap();
        writer.write_samples(0, &[1.0; 256]).unwrap();
        writer.close().unwrap();
    }

    let reader = EdfReader::open(&path).unwrap();
    let header = reader.header();
    assert_eq!(header.file_type, FileType::BdfPlus);
    assert!(header.reserved.starts_with("BDF+C"));
    assert_eq!(header.signals[1].label, "BDF Annotations");
    assert_eq!(header.signals[1].samples_per_record, 40);
}

#[test]
fn test_digital_vs_physical_values() {
    let (_dir, path) = scratch("digital.edf");
    let mut signal = create_test_ecg_signal();
    signal.samples_per_record = 5;
    let known = [-5.0, -2.5, 0.0, 2.5, 5.0];

    {
        let mut writer = EdfWriter::create(&path, header_with(FileType::Edf, vec![signal.clone()]))
            .unwrap();
        writer.write_samples(0, &known).unwrap();
        writer.close().unwrap();
    }

    let mut reader = EdfReader::open(&path).unwrap();
    let digital = reader.read_digital_samples(0, 5).unwrap();
    reader.rewind(0).unwrap();
    let physical = reader.read_physical_samples(0, 5).unwrap();

    assert_eq!(digital[0], -32768);
    assert_eq!(digital[4], 32767);
    for ((&d, &p), &want) in digital.iter().zip(&physical).zip(&known) {
        assert_eq!(signal.to_physical(d), p);
        assert!((p - want).abs() <= signal.bit_value());
    }
}

#[test]
fn test_invalid_headers_are_rejected_before_writing() {
    let (_dir, path) = scratch("invalid.edf");

    let mut long_label = create_test_eeg_signal();
    long_label.label = "A label that is far too long".to_string();
    assert!(matches!(
        EdfWriter::create(&path, header_with(FileType::Edf, vec![long_label])),
        Err(EdfError::InvalidHeader(_))
    ));

    let mut wide = create_test_eeg_signal();
    wide.digital_max = 40000;
    assert!(matches!(
        EdfWriter::create(&path, header_with(FileType::Edf, vec![wide])),
        Err(EdfError::InvalidHeader(_))
    ));

    let mut header = header_with(FileType::Edf, vec![create_test_eeg_signal()]);
    header.set_start(
        NaiveDate::from_ymd_opt(2090, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap(),
    );
    assert!(matches!(
        EdfWriter::create(&path, header),
        Err(EdfError::InvalidHeader(_))
    ));

    assert!(!path.exists());
}

#[test]
fn test_open_rejects_garbage() {
    let (_dir, path) = scratch("garbage.edf");
    fs::write(&path, vec![b'x'; 600]).unwrap();
    assert!(matches!(EdfReader::open(&path), Err(EdfError::MalformedHeader(_))));

    assert!(matches!(
        EdfReader::open(path.with_file_name("missing.edf")),
        Err(EdfError::FileNotFound(_))
    ));
}
