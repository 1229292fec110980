//! Core types for the noise mapper
//!
//! This module defines the data structures that flow through the aggregation
//! core: stored measurement records, coordinates, and the transient views the
//! core attaches derived attributes to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A (latitude, longitude) pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Microphone the measurement was taken with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicSource {
    #[default]
    Internal,
    Headset,
}

impl MicSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MicSource::Internal => "internal",
            MicSource::Headset => "headset",
        }
    }
}

/// Selects one of a record's numeric measurement fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementField {
    /// Average level over the recording window
    #[default]
    Avg,
    /// Peak level over the recording window
    Max,
}

impl MeasurementField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementField::Avg => "avg",
            MeasurementField::Max => "max",
        }
    }

    /// Read this field from a record
    pub fn value_of(&self, record: &Record) -> f64 {
        match self {
            MeasurementField::Avg => record.measurement_avg,
            MeasurementField::Max => record.measurement_max,
        }
    }
}

/// A stored noise measurement, owned by the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier
    pub id: u64,
    /// Identifier generated by the uploading device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    /// Device the measurement came from
    pub device_name: String,
    /// When the measurement was taken (UTC)
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Average level
    pub measurement_avg: f64,
    /// Peak level
    pub measurement_max: f64,
    pub mic_source: MicSource,
    /// When the store accepted the record
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub misc_data: Option<serde_json::Value>,
}

impl Record {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

/// Read-only view of a record with the attributes derived at query time.
///
/// The underlying record is borrowed; nothing written here reaches the store.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView<'a> {
    #[serde(flatten)]
    pub record: &'a Record,
    /// Signed deviation from the device baseline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    /// Contribution weight within the record's cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl<'a> RecordView<'a> {
    pub fn new(record: &'a Record) -> Self {
        Self {
            record,
            deviation: None,
            weight: None,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        self.record.coordinate()
    }
}
