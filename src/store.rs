//! Record storage
//!
//! The aggregation core never talks to persistence directly. It consumes
//! records through the [`RecordStore`] seam, which accepts validated uploads
//! and answers filtered queries. [`InMemoryStore`] is the reference
//! implementation used by the CLI and the tests.

use crate::error::ComputeError;
use crate::schema::{NewRecord, UploadRecord};
use crate::types::{MicSource, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inclusive latitude/longitude bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Query predicates; an unset predicate matches everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// Device names to include
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<BTreeSet<String>>,
    /// Inclusive lower bound on the measurement time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the measurement time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    /// Microphone sources to include
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BTreeSet<MicSource>>,
}

impl RecordFilter {
    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = Some(devices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_time_range(mut self, from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.until = until;
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = MicSource>) -> Self {
        self.sources = Some(sources.into_iter().collect());
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(bbox) = &self.bbox {
            if !bbox.contains(record.lat, record.lon) {
                return false;
            }
        }
        if let Some(devices) = &self.devices {
            if !devices.contains(&record.device_name) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.timestamp < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.timestamp >= until {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.contains(&record.mic_source) {
                return false;
            }
        }
        true
    }
}

/// Storage collaborator consumed by the pipeline
pub trait RecordStore {
    /// Persist a validated record and return its id
    fn insert(&mut self, record: NewRecord) -> Result<u64, ComputeError>;

    /// Validate a raw upload and persist it
    fn insert_upload(&mut self, upload: UploadRecord) -> Result<u64, ComputeError> {
        self.insert(upload.into_new_record()?)
    }

    /// All live records matching the filter, in insertion order
    fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, ComputeError>;

    /// Hide a record from future queries
    fn delete(&mut self, id: u64) -> Result<(), ComputeError>;

    /// Distinct device names of live records, sorted
    fn device_names(&self) -> Result<Vec<String>, ComputeError>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: Record,
    is_deleted: bool,
}

/// In-memory store with soft delete
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Vec<StoredRecord>,
    next_id: u64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|s| !s.is_deleted).map(|s| &s.record)
    }
}

impl RecordStore for InMemoryStore {
    fn insert(&mut self, new: NewRecord) -> Result<u64, ComputeError> {
        self.next_id += 1;
        let id = self.next_id;
        self.records.push(StoredRecord {
            record: Record {
                id,
                uuid: new.uuid,
                device_name: new.device_name,
                timestamp: new.timestamp,
                lat: new.lat,
                lon: new.lon,
                measurement_avg: new.measurement_avg,
                measurement_max: new.measurement_max,
                mic_source: new.mic_source,
                uploaded_at: Utc::now(),
                process_result: new.process_result,
                device_state: new.device_state,
                misc_data: new.misc_data,
            },
            is_deleted: false,
        });
        Ok(id)
    }

    fn query(&self, filter: &RecordFilter) -> Result<Vec<Record>, ComputeError> {
        Ok(self.live().filter(|r| filter.matches(r)).cloned().collect())
    }

    fn delete(&mut self, id: u64) -> Result<(), ComputeError> {
        let stored = self
            .records
            .iter_mut()
            .find(|s| s.record.id == id && !s.is_deleted)
            .ok_or(ComputeError::RecordNotFound(id))?;
        stored.is_deleted = true;
        Ok(())
    }

    fn device_names(&self) -> Result<Vec<String>, ComputeError> {
        let names: BTreeSet<&str> = self.live().map(|r| r.device_name.as_str()).collect();
        Ok(names.into_iter().map(String::from).collect())
    }
}
