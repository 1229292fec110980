//! Response encoding
//!
//! Clusters and their member records are encoded through [`OutputValue`], a
//! closed set of output shapes with one formatting rule each: timestamps as
//! `YYYY-MM-DD HH:MM:SS`, decimals as fixed-point strings, records as ordered
//! objects.

use crate::cluster::Cluster;
use crate::types::{Record, RecordView};
use crate::{PRODUCER_NAME, VERSION};
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Timestamp layout in responses
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A value in an encoded response
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    /// Fixed-point decimal, emitted as a string
    Decimal { value: f64, places: u32 },
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<OutputValue>),
    /// Object with fields in insertion order
    Record(Vec<(String, OutputValue)>),
}

impl OutputValue {
    pub fn record() -> RecordBuilder {
        RecordBuilder(Vec::new())
    }

    /// Look up a field of a `Record` value
    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        match self {
            OutputValue::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl<T: Into<OutputValue>> From<Option<T>> for OutputValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(OutputValue::Null, Into::into)
    }
}

impl From<f64> for OutputValue {
    fn from(v: f64) -> Self {
        OutputValue::Number(v)
    }
}

impl From<u64> for OutputValue {
    fn from(v: u64) -> Self {
        OutputValue::Integer(v as i64)
    }
}

impl From<usize> for OutputValue {
    fn from(v: usize) -> Self {
        OutputValue::Integer(v as i64)
    }
}

impl From<&str> for OutputValue {
    fn from(v: &str) -> Self {
        OutputValue::Text(v.to_string())
    }
}

impl From<String> for OutputValue {
    fn from(v: String) -> Self {
        OutputValue::Text(v)
    }
}

/// Free-form device payloads keep their shape; numbers stay integral when they are
impl From<&serde_json::Value> for OutputValue {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => OutputValue::Null,
            serde_json::Value::Bool(b) => OutputValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => OutputValue::Integer(i),
                None => n.as_f64().map_or(OutputValue::Null, OutputValue::Number),
            },
            serde_json::Value::String(s) => OutputValue::Text(s.clone()),
            serde_json::Value::Array(items) => OutputValue::List(items.iter().map(Into::into).collect()),
            serde_json::Value::Object(fields) => {
                OutputValue::Record(fields.iter().map(|(k, v)| (k.clone(), v.into())).collect())
            }
        }
    }
}

impl From<DateTime<Utc>> for OutputValue {
    fn from(v: DateTime<Utc>) -> Self {
        OutputValue::Timestamp(v)
    }
}

/// Builder for `OutputValue::Record`
pub struct RecordBuilder(Vec<(String, OutputValue)>);

impl RecordBuilder {
    pub fn field(mut self, name: &str, value: impl Into<OutputValue>) -> Self {
        self.0.push((name.to_string(), value.into()));
        self
    }

    /// Add the field only when a value is present
    pub fn field_opt<T: Into<OutputValue>>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    pub fn build(self) -> OutputValue {
        OutputValue::Record(self.0)
    }
}

impl Serialize for OutputValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OutputValue::Null => serializer.serialize_none(),
            OutputValue::Bool(b) => serializer.serialize_bool(*b),
            OutputValue::Integer(i) => serializer.serialize_i64(*i),
            OutputValue::Number(n) => serializer.serialize_f64(*n),
            OutputValue::Decimal { value, places } => {
                serializer.collect_str(&format_args!("{:.*}", *places as usize, value))
            }
            OutputValue::Text(s) => serializer.serialize_str(s),
            OutputValue::Timestamp(ts) => serializer.collect_str(&ts.format(TIMESTAMP_FORMAT)),
            OutputValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            OutputValue::Record(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

/// Producer metadata attached to every response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Encoded clustering result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterResponse {
    pub producer: Producer,
    pub computed_at: OutputValue,
    /// Number of records that went into the clusters
    pub record_count: usize,
    pub clusters: Vec<OutputValue>,
}

/// Encoder for cluster responses
pub struct ClusterEncoder {
    instance_id: String,
    decimal_places: Option<u32>,
}

impl Default for ClusterEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            decimal_places: None,
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self {
            instance_id,
            decimal_places: None,
        }
    }

    /// Emit aggregated and display values as fixed-point decimals
    pub fn with_decimal_places(mut self, places: Option<u32>) -> Self {
        self.decimal_places = places;
        self
    }

    fn number(&self, value: f64) -> OutputValue {
        match self.decimal_places {
            Some(places) => OutputValue::Decimal { value, places },
            None => OutputValue::Number(value),
        }
    }

    /// Encode a stored record
    pub fn encode_record(&self, record: &Record) -> RecordBuilder {
        OutputValue::record()
            .field("id", record.id)
            .field_opt("uuid", record.uuid.map(|u| u.to_string()))
            .field("device_name", record.device_name.as_str())
            .field("timestamp", record.timestamp)
            .field("lat", record.lat)
            .field("lon", record.lon)
            .field("measurement_avg", record.measurement_avg)
            .field("measurement_max", record.measurement_max)
            .field("mic_source", record.mic_source.as_str())
            .field("uploaded_at", record.uploaded_at)
            .field_opt("process_result", record.process_result.clone())
            .field_opt("device_state", record.device_state.clone())
            .field_opt("misc_data", record.misc_data.as_ref())
    }

    /// Encode a record view with its derived attributes
    pub fn encode_view(&self, view: &RecordView<'_>) -> OutputValue {
        self.encode_record(view.record)
            .field_opt("deviation", view.deviation)
            .field_opt("weight", view.weight)
            .build()
    }

    /// Encode one cluster; members appear under `original` when retained
    pub fn encode_cluster(&self, cluster: &Cluster<RecordView<'_>>) -> OutputValue {
        let builder = OutputValue::record()
            .field("lat", cluster.key.lat)
            .field("lon", cluster.key.lon)
            .field("value", self.number(cluster.value))
            .field("count", cluster.count)
            .field_opt("display", cluster.display.map(|d| self.number(d)));

        match &cluster.members {
            Some(members) => builder
                .field(
                    "original",
                    OutputValue::List(members.iter().map(|m| self.encode_view(m)).collect()),
                )
                .build(),
            None => builder.build(),
        }
    }

    /// Encode a full clustering result
    pub fn encode(&self, clusters: &[Cluster<RecordView<'_>>]) -> ClusterResponse {
        ClusterResponse {
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at: OutputValue::Timestamp(Utc::now()),
            record_count: clusters.iter().map(|c| c.count).sum(),
            clusters: clusters.iter().map(|c| self.encode_cluster(c)).collect(),
        }
    }
}

impl ClusterResponse {
    /// Encode to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Encode to pretty-printed JSON string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
