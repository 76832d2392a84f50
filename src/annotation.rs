//! Time-stamped Annotation Lists (TALs) carried by the annotation channel.
//!
//! One TAL is `+onset[0x15 duration]0x14 text 0x14 [text 0x14 ...] 0x00`.
//! The first TAL of every record holds no text and gives the record's start
//! time. Unused bytes at the end of a block are `0x00`.

use crate::error::{EdfError, Result};
use crate::types::Annotation;
use crate::utils::{format_edf_time, parse_edf_time};

const TAL_DURATION: u8 = 0x15;
const TAL_TEXT: u8 = 0x14;
const TAL_END: u8 = 0x00;

/// Everything found in one annotation block.
#[derive(Debug, Default)]
pub struct AnnotationBlock {
    /// Onset of the record, from its time-keeping TAL
    pub record_onset: Option<i64>,
    pub annotations: Vec<Annotation>,
    /// One `EdfError::AnnotationParse` per malformed TAL
    pub errors: Vec<EdfError>,
}

/// Decodes the annotation bytes of one record.
///
/// `time_keeping` marks the first annotation channel, whose first TAL is the
/// record's time stamp. A malformed TAL is reported in `errors` and scanning
/// resumes after its terminator; a TAL without terminator ends the block.
pub fn decode_block(bytes: &[u8], record: usize, time_keeping: bool) -> AnnotationBlock {
    let mut block = AnnotationBlock::default();
    let mut pos = 0;
    let mut first = time_keeping;

    while pos < bytes.len() && bytes[pos] != TAL_END {
        let Some(len) = bytes[pos..].iter().position(|&b| b == TAL_END) else {
            block.errors.push(parse_error(record, pos, "TAL is missing its 0x00 terminator"));
            break;
        };

        match parse_tal(&bytes[pos..pos + len]) {
            Ok((onset, duration, texts)) => {
                if first && texts.is_empty() {
                    block.record_onset = Some(onset);
                } else if !texts.is_empty() {
                    block.annotations.push(Annotation { onset, duration, texts });
                }
            }
            Err(reason) => block.errors.push(parse_error(record, pos, reason)),
        }

        first = false;
        pos += len + 1;
    }

    block
}

fn parse_error(record: usize, offset: usize, reason: impl Into<String>) -> EdfError {
    EdfError::AnnotationParse {
        record,
        offset,
        reason: reason.into(),
    }
}

type Tal = (i64, Option<i64>, Vec<String>);

fn parse_tal(tal: &[u8]) -> std::result::Result<Tal, String> {
    let text_start = tal
        .iter()
        .position(|&b| b == TAL_TEXT)
        .ok_or("TAL has no 0x14 after its onset")?;
    let (time, rest) = (&tal[..text_start], &tal[text_start + 1..]);

    let (onset_bytes, duration_bytes) = match time.iter().position(|&b| b == TAL_DURATION) {
        Some(i) => (&time[..i], Some(&time[i + 1..])),
        None => (time, None),
    };

    if !matches!(onset_bytes.first(), Some(b'+') | Some(b'-')) {
        return Err("onset must start with '+' or '-'".to_string());
    }
    let onset = std::str::from_utf8(onset_bytes)
        .ok()
        .and_then(parse_edf_time)
        .ok_or_else(|| format!("non-numeric onset {:?}", String::from_utf8_lossy(onset_bytes)))?;

    let duration = match duration_bytes {
        Some(d) => Some(
            std::str::from_utf8(d)
                .ok()
                .filter(|s| !s.starts_with(['+', '-']))
                .and_then(parse_edf_time)
                .ok_or_else(|| format!("non-numeric duration {:?}", String::from_utf8_lossy(d)))?,
        ),
        None => None,
    };

    let texts = match rest.split_last() {
        None => Vec::new(),
        Some((&TAL_TEXT, body)) => body
            .split(|&b| b == TAL_TEXT)
            .filter(|t| !t.is_empty())
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .collect(),
        Some(_) => return Err("annotation text is not closed by 0x14".to_string()),
    };

    Ok((onset, duration, texts))
}

fn push_time(out: &mut Vec<u8>, ticks: i64) {
    if ticks >= 0 {
        out.push(b'+');
    }
    out.extend_from_slice(format_edf_time(ticks).as_bytes());
}

/// TAL bytes of a record's time stamp.
pub fn encode_time_keeping(record_onset: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    push_time(&mut out, record_onset);
    out.extend_from_slice(&[TAL_TEXT, TAL_TEXT, TAL_END]);
    out
}

/// TAL bytes of one annotation, terminator included.
pub fn encode_tal(annotation: &Annotation) -> Vec<u8> {
    let mut out = Vec::new();
    push_time(&mut out, annotation.onset);
    if let Some(duration) = annotation.duration {
        out.push(TAL_DURATION);
        out.extend_from_slice(format_edf_time(duration).as_bytes());
    }
    out.push(TAL_TEXT);
    for text in &annotation.texts {
        out.extend_from_slice(text.as_bytes());
        out.push(TAL_TEXT);
    }
    out.push(TAL_END);
    out
}

/// Checks that an annotation can be represented as a TAL.
pub fn validate(annotation: &Annotation) -> Result<()> {
    if annotation.texts.is_empty() || annotation.texts.iter().all(|t| t.is_empty()) {
        return Err(EdfError::InvalidFormat(
            "Annotation description cannot be empty".to_string(),
        ));
    }
    if let Some(duration) = annotation.duration {
        if duration < 0 {
            return Err(EdfError::InvalidFormat(
                "Annotation duration cannot be negative".to_string(),
            ));
        }
    }
    if annotation
        .texts
        .iter()
        .any(|t| t.bytes().any(|b| b == TAL_END || b == TAL_TEXT || b == TAL_DURATION))
    {
        return Err(EdfError::InvalidFormat(
            "Annotation text cannot contain 0x00, 0x14 or 0x15".to_string(),
        ));
    }
    Ok(())
}

/// Packs an optional time stamp and annotations into a block of exactly `width` bytes.
pub fn encode_block(
    record_onset: Option<i64>,
    annotations: &[Annotation],
    width: usize,
) -> Result<Vec<u8>> {
    let mut out = record_onset.map(encode_time_keeping).unwrap_or_default();
    for annotation in annotations {
        out.extend_from_slice(&encode_tal(annotation));
    }
    if out.len() > width {
        return Err(EdfError::AnnotationOverflow {
            needed: out.len(),
            available: width,
        });
    }
    out.resize(width, TAL_END);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_time_keeping_and_annotations() {
        let bytes = b"+1.5\x14\x14\x00+1.75\x150.5\x14Eyes closed\x14\x00+2\x14A\x14B\x14\x00\x00\x00";
        let block = decode_block(bytes, 0, true);
        assert!(block.errors.is_empty());
        assert_eq!(block.record_onset, Some(15_000_000));
        assert_eq!(block.annotations.len(), 2);
        assert_eq!(block.annotations[0].onset, 17_500_000);
        assert_eq!(block.annotations[0].duration, Some(5_000_000));
        assert_eq!(block.annotations[0].texts, vec!["Eyes closed".to_string()]);
        assert_eq!(block.annotations[1].texts, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_decode_negative_onset() {
        let block = decode_block(b"+0\x14\x14\x00-0.5\x14Before start\x14\x00", 0, true);
        assert_eq!(block.annotations[0].onset, -5_000_000);
    }

    #[test]
    fn test_decode_missing_terminator_keeps_earlier_annotations() {
        let bytes = b"+0\x14\x14\x00+0.2\x14Good\x14\x00+0.4\x14Cut off";
        let block = decode_block(bytes, 3, true);
        assert_eq!(block.annotations.len(), 1);
        assert_eq!(block.annotations[0].description(), "Good");
        assert_eq!(block.errors.len(), 1);
        assert!(matches!(
            block.errors[0],
            EdfError::AnnotationParse { record: 3, offset: 16, .. }
        ));
    }

    #[test]
    fn test_decode_skips_bad_onset_and_continues() {
        let bytes = b"+0\x14\x14\x00+x.y\x14Bad\x14\x00+1\x14Good\x14\x00";
        let block = decode_block(bytes, 0, true);
        assert_eq!(block.errors.len(), 1);
        assert!(block.errors[0].is_recoverable());
        assert_eq!(block.annotations.len(), 1);
        assert_eq!(block.annotations[0].onset, 10_000_000);
    }

    #[test]
    fn test_decode_overflowing_onset_is_reported() {
        let bytes = b"+0\x14\x14\x00+922337203685.9999999\x14X\x14\x00\
+99999999999999999999\x14Y\x14\x00+1.123456789\x14Z\x14\x00";
        let block = decode_block(bytes, 2, true);
        assert_eq!(block.record_onset, Some(0));
        assert_eq!(block.errors.len(), 2);
        assert!(block
            .errors
            .iter()
            .all(|e| matches!(e, EdfError::AnnotationParse { record: 2, .. })));
        assert_eq!(block.annotations.len(), 1);
        assert_eq!(block.annotations[0].description(), "Z");
        assert_eq!(block.annotations[0].onset, 11_234_567);
    }

    #[test]
    fn test_non_time_keeping_channel() {
        let block = decode_block(b"+3\x14Spike\x14\x00", 0, false);
        assert_eq!(block.record_onset, None);
        assert_eq!(block.annotations.len(), 1);
    }

    #[test]
    fn test_encode_tal_format() {
        let tal = encode_tal(&Annotation::new(2.5, Some(1.0), "Artifact"));
        assert_eq!(tal, b"+2.5\x151\x14Artifact\x14\x00");
        assert_eq!(encode_time_keeping(0), b"+0\x14\x14\x00");
        assert_eq!(encode_time_keeping(-1), b"-0.0000001\x14\x14\x00");
    }

    #[test]
    fn test_encode_block_overflow() {
        let annotations = vec![Annotation::new(0.0, None, "A rather long description")];
        let block = encode_block(Some(0), &annotations, 64).unwrap();
        assert_eq!(block.len(), 64);
        let decoded = decode_block(&block, 0, true);
        assert_eq!(decoded.annotations, annotations);

        match encode_block(Some(0), &annotations, 16) {
            Err(EdfError::AnnotationOverflow { needed, available }) => {
                assert_eq!(available, 16);
                assert!(needed > 16);
            }
            other => panic!("expected AnnotationOverflow, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_delimiters() {
        assert!(validate(&Annotation::new(0.0, None, "ok")).is_ok());
        assert!(validate(&Annotation::new(0.0, None, "")).is_err());
        assert!(validate(&Annotation::new(0.0, None, "bad\x14text")).is_err());
        assert!(validate(&Annotation::new(0.0, Some(-1.0), "neg")).is_err());
    }
}
