//! Parsing of upload payloads
//!
//! Handles the three shapes devices send: a single object, a JSON array, and
//! newline-delimited JSON.

use crate::error::ComputeError;
use crate::schema::upload::{UploadRecord, ValidationError};
use serde::Deserialize;

/// Parser for device upload payloads
pub struct UploadParser;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<UploadRecord>),
    One(Box<UploadRecord>),
}

impl UploadParser {
    /// Parse a JSON array of uploads
    pub fn parse_array(json: &str) -> Result<Vec<UploadRecord>, ComputeError> {
        let uploads: Vec<UploadRecord> = serde_json::from_str(json)?;
        Ok(uploads)
    }

    /// Parse either a single upload object or an array of uploads
    pub fn parse_batch(json: &str) -> Result<Vec<UploadRecord>, ComputeError> {
        match serde_json::from_str::<OneOrMany>(json) {
            Ok(OneOrMany::Many(uploads)) => Ok(uploads),
            Ok(OneOrMany::One(upload)) => Ok(vec![*upload]),
            Err(e) => Err(ComputeError::ParseError(e.to_string())),
        }
    }

    /// Parse NDJSON (newline-delimited JSON), one upload per line
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<UploadRecord>, ComputeError> {
        let mut uploads = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<UploadRecord>(trimmed) {
                Ok(upload) => uploads.push(upload),
                Err(e) => {
                    return Err(ComputeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(uploads)
    }

    /// Validate a batch, returning only the failures
    pub fn validate_batch(uploads: &[UploadRecord]) -> Vec<ValidationResult> {
        uploads
            .iter()
            .enumerate()
            .filter_map(|(index, upload)| {
                upload.validate().err().map(|error| ValidationResult {
                    index,
                    uuid: upload.uuid.map(|u| u.to_string()),
                    error,
                })
            })
            .collect()
    }
}

/// A failed validation within a batch
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub index: usize,
    pub uuid: Option<String>,
    pub error: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"{"timestamp": "2016-11-08 12:00:00", "lat": 48.2, "lon": 16.3, "measurement_avg": 50.0, "measurement_max": 60.0}"#;
    const NO_FIX: &str = r#"{"timestamp": "2016-11-08 12:01:00", "measurement_avg": 50.0, "measurement_max": 60.0}"#;

    #[test]
    fn test_parse_array() {
        let json = format!("[{GOOD}, {NO_FIX}]");
        let uploads = UploadParser::parse_array(&json).unwrap();
        assert_eq!(uploads.len(), 2);
    }

    #[test]
    fn test_parse_batch_single_object() {
        let uploads = UploadParser::parse_batch(GOOD).unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].lat, Some(48.2));
    }

    #[test]
    fn test_parse_batch_array() {
        let json = format!("[{GOOD}, {GOOD}]");
        assert_eq!(UploadParser::parse_batch(&json).unwrap().len(), 2);
        assert!(UploadParser::parse_batch("42").is_err());
    }

    #[test]
    fn test_parse_ndjson_skips_blank_lines() {
        let ndjson = format!("{GOOD}\n\n{NO_FIX}\n");
        let uploads = UploadParser::parse_ndjson(&ndjson).unwrap();
        assert_eq!(uploads.len(), 2);
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let ndjson = format!("{GOOD}\nnot json\n");
        match UploadParser::parse_ndjson(&ndjson) {
            Err(ComputeError::ParseError(msg)) => assert!(msg.contains("line 2")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_batch() {
        let json = format!("[{GOOD}, {NO_FIX}, {GOOD}]");
        let uploads = UploadParser::parse_array(&json).unwrap();
        let failures = UploadParser::validate_batch(&uploads);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].error, ValidationError::MissingLocation);
    }
}
