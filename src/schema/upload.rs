//! Upload payload definition
//!
//! Devices report location and measurements as optional fields (a recording
//! without a GPS fix is still uploaded). Only complete, in-range measurements
//! become [`NewRecord`]s.

use crate::types::MicSource;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Timestamp layout used by devices that do not send RFC 3339
pub const DEVICE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One measurement as uploaded by a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Identifier generated on the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Measurement time, RFC 3339 or `YYYY-MM-DD HH:MM:SS` in UTC
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_avg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_max: Option<f64>,
    #[serde(default)]
    pub mic_source: MicSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub misc_data: Option<serde_json::Value>,
}

/// A validated measurement ready to be inserted into a store
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub uuid: Option<Uuid>,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub measurement_avg: f64,
    pub measurement_max: f64,
    pub mic_source: MicSource,
    pub process_result: Option<String>,
    pub device_state: Option<String>,
    pub misc_data: Option<serde_json::Value>,
}

impl UploadRecord {
    /// Check that the upload carries a usable location and measurements
    pub fn validate(&self) -> Result<(), ValidationError> {
        let (lat, lon) = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err(ValidationError::MissingLocation),
        };
        if !(lat.is_finite() && (-90.0..=90.0).contains(&lat)) {
            return Err(ValidationError::LatitudeOutOfRange(lat));
        }
        if !(lon.is_finite() && (-180.0..=180.0).contains(&lon)) {
            return Err(ValidationError::LongitudeOutOfRange(lon));
        }

        for (name, value) in [
            ("measurement_avg", self.measurement_avg),
            ("measurement_max", self.measurement_max),
        ] {
            match value {
                None => return Err(ValidationError::MissingMeasurement(name)),
                Some(v) if !v.is_finite() => return Err(ValidationError::NonFiniteMeasurement(name)),
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Validate and convert into an insertable record
    pub fn into_new_record(self) -> Result<NewRecord, ValidationError> {
        self.validate()?;
        match (self.lat, self.lon, self.measurement_avg, self.measurement_max) {
            (Some(lat), Some(lon), Some(measurement_avg), Some(measurement_max)) => Ok(NewRecord {
                uuid: self.uuid,
                device_name: self.device_name.unwrap_or_default(),
                timestamp: self.timestamp,
                lat,
                lon,
                measurement_avg,
                measurement_max,
                mic_source: self.mic_source,
                process_result: self.process_result,
                device_state: self.device_state,
                misc_data: self.misc_data,
            }),
            _ => Err(ValidationError::MissingLocation),
        }
    }
}

/// Validation errors for uploaded measurements
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Measurement has no location")]
    MissingLocation,

    #[error("Latitude out of range: {0}")]
    LatitudeOutOfRange(f64),

    #[error("Longitude out of range: {0}")]
    LongitudeOutOfRange(f64),

    #[error("Missing measurement: {0}")]
    MissingMeasurement(&'static str),

    #[error("Measurement is not a finite number: {0}")]
    NonFiniteMeasurement(&'static str),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Parse an RFC 3339 timestamp, or a naive device timestamp taken as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, DEVICE_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn upload_json() -> &'static str {
        r#"{
            "uuid": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "device_name": "Nexus 5",
            "timestamp": "2016-11-08 12:32:00",
            "lat": 48.2082,
            "lon": 16.3738,
            "measurement_avg": 54.2,
            "measurement_max": 71.9,
            "mic_source": "headset"
        }"#
    }

    #[test]
    fn test_deserialize_device_timestamp() {
        let upload: UploadRecord = serde_json::from_str(upload_json()).unwrap();
        assert_eq!(
            upload.timestamp,
            Utc.with_ymd_and_hms(2016, 11, 8, 12, 32, 0).unwrap()
        );
        assert_eq!(upload.mic_source, MicSource::Headset);
        assert!(upload.uuid.is_some());
    }

    #[test]
    fn test_deserialize_rfc3339_with_offset() {
        let ts = parse_timestamp("2016-11-08T13:32:00+01:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2016, 11, 8, 12, 32, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_defaults() {
        let upload: UploadRecord =
            serde_json::from_str(r#"{"timestamp": "2016-11-08T12:00:00Z"}"#).unwrap();
        assert_eq!(upload.mic_source, MicSource::Internal);
        assert!(upload.lat.is_none());
        assert_eq!(upload.validate(), Err(ValidationError::MissingLocation));
    }

    #[test]
    fn test_into_new_record() {
        let upload: UploadRecord = serde_json::from_str(upload_json()).unwrap();
        let record = upload.into_new_record().unwrap();
        assert_eq!(record.device_name, "Nexus 5");
        assert_eq!(record.measurement_avg, 54.2);
        assert_eq!(record.lat, 48.2082);
    }

    #[test]
    fn test_validation_failures() {
        let mut upload: UploadRecord = serde_json::from_str(upload_json()).unwrap();

        upload.lat = Some(91.0);
        assert_eq!(upload.validate(), Err(ValidationError::LatitudeOutOfRange(91.0)));

        upload.lat = Some(48.0);
        upload.lon = Some(-180.5);
        assert_eq!(upload.validate(), Err(ValidationError::LongitudeOutOfRange(-180.5)));

        upload.lon = Some(16.0);
        upload.measurement_max = None;
        assert_eq!(
            upload.validate(),
            Err(ValidationError::MissingMeasurement("measurement_max"))
        );

        upload.measurement_max = Some(f64::NAN);
        assert_eq!(
            upload.validate(),
            Err(ValidationError::NonFiniteMeasurement("measurement_max"))
        );
    }

    #[test]
    fn test_missing_device_name_becomes_empty() {
        let mut upload: UploadRecord = serde_json::from_str(upload_json()).unwrap();
        upload.device_name = None;
        assert_eq!(upload.into_new_record().unwrap().device_name, "");
    }
}
