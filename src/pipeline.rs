//! Pipeline orchestration
//!
//! This module provides the operations the transport boundary calls:
//! clustering a record set, rescaling clusters for display, and the full
//! query → annotate → cluster → rescale → encode flow against a record store.

use crate::aggregator::{ArithmeticMean, InverseDistanceWeightedMean, Sample};
use crate::baseline::annotate_deviation;
use crate::cluster::{cluster, Cluster, ClusterOptions, GroupingMode, Linkage};
use crate::config::MapperConfig;
use crate::encoder::{ClusterEncoder, ClusterResponse};
use crate::error::ComputeError;
use crate::range::{map_values, RangeOutcome};
use crate::store::{RecordFilter, RecordStore};
use crate::types::{MeasurementField, Record, RecordView};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which value of a record is aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "field")]
pub enum ValueSource {
    /// The raw measurement field
    Field(MeasurementField),
    /// Deviation of the field from the record's device baseline
    Deviation(MeasurementField),
}

impl Default for ValueSource {
    fn default() -> Self {
        ValueSource::Field(MeasurementField::default())
    }
}

impl ValueSource {
    pub fn field(&self) -> MeasurementField {
        match self {
            ValueSource::Field(f) | ValueSource::Deviation(f) => *f,
        }
    }

    /// The value this source reads from a view.
    ///
    /// Deviation sources need a view annotated by
    /// [`annotate_deviation`]; an unannotated view is an error.
    pub fn value_of(&self, view: &RecordView<'_>) -> Result<f64, ComputeError> {
        match self {
            ValueSource::Field(f) => Ok(f.value_of(view.record)),
            ValueSource::Deviation(_) => view
                .deviation
                .ok_or(ComputeError::MissingDeviation(view.record.id)),
        }
    }
}

/// Aggregator variant applied per cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    Mean,
    InverseDistance,
}

impl AggregationMethod {
    /// Raw fields are averaged; deviations are weighted towards the centroid
    pub fn default_for(source: ValueSource) -> Self {
        match source {
            ValueSource::Field(_) => AggregationMethod::Mean,
            ValueSource::Deviation(_) => AggregationMethod::InverseDistance,
        }
    }
}

/// Cluster attribute used as the source of display values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterField {
    /// The aggregated value
    #[default]
    Value,
    /// The number of member records
    Count,
}

impl ClusterField {
    pub fn value_of<T>(&self, cluster: &Cluster<T>) -> f64 {
        match self {
            ClusterField::Value => cluster.value,
            ClusterField::Count => cluster.count as f64,
        }
    }
}

/// Parameters of one clustering request, already validated by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub grouping: GroupingMode,
    /// Degrees for grid grouping, meters for proximity grouping
    pub resolution: Option<f64>,
    pub source: ValueSource,
    /// Overrides [`AggregationMethod::default_for`]
    pub method: Option<AggregationMethod>,
    pub linkage: Linkage,
    pub retain_original: bool,
}

impl Default for ClusterRequest {
    fn default() -> Self {
        Self::from_config(&MapperConfig::default())
    }
}

impl ClusterRequest {
    /// Request using the configured defaults
    pub fn from_config(config: &MapperConfig) -> Self {
        Self {
            grouping: config.grouping,
            resolution: config.resolution_for(config.grouping),
            source: ValueSource::Field(config.field),
            method: None,
            linkage: config.linkage,
            retain_original: false,
        }
    }

    pub fn with_grouping(mut self, grouping: GroupingMode, resolution: Option<f64>) -> Self {
        self.grouping = grouping;
        self.resolution = resolution;
        self
    }

    pub fn with_source(mut self, source: ValueSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_method(mut self, method: AggregationMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn retain_original(mut self, retain: bool) -> Self {
        self.retain_original = retain;
        self
    }

    /// Aggregation method in effect for this request
    pub fn method(&self) -> AggregationMethod {
        self.method.unwrap_or_else(|| AggregationMethod::default_for(self.source))
    }
}

/// Cluster `records` according to `request`.
///
/// Deviation sources annotate every record against its device baseline first.
/// Clusters come back in creation order with no display values set.
pub fn cluster_records<'a>(
    records: &'a [Record],
    request: &ClusterRequest,
) -> Result<Vec<Cluster<RecordView<'a>>>, ComputeError> {
    let views: Vec<RecordView<'a>> = match request.source {
        ValueSource::Field(_) => records.iter().map(RecordView::new).collect(),
        ValueSource::Deviation(field) => annotate_deviation(records, field)?,
    };

    let source = request.source;
    for view in &views {
        source.value_of(view)?;
    }
    // Every view was checked above
    let value = move |v: &RecordView<'a>| source.value_of(v).unwrap_or(f64::NAN);

    let grouping = request.grouping;
    let resolution = request.resolution;
    let key_fn = move |v: &RecordView<'a>| grouping.key(v.coordinate(), resolution);
    let is_same = move |a, b| grouping.is_same(a, b, resolution);
    let options = ClusterOptions {
        linkage: request.linkage,
        retain_original: request.retain_original,
    };

    let clusters = match request.method() {
        AggregationMethod::Mean => cluster(
            &views,
            key_fn,
            is_same,
            || ArithmeticMean::new(move |v: &RecordView<'a>| -> Sample { value(v).into() }),
            options,
        )?,
        AggregationMethod::InverseDistance => cluster(
            &views,
            key_fn,
            is_same,
            || InverseDistanceWeightedMean::new(move |v: &RecordView<'a>| (v.coordinate(), value(v))),
            options,
        )?,
    };

    debug!(
        records = records.len(),
        clusters = clusters.len(),
        grouping = grouping.as_str(),
        method = ?request.method(),
        "clustered records"
    );

    Ok(clusters)
}

/// Rescale a cluster attribute onto `[lower, upper]`, writing display values.
///
/// An empty cluster list is left alone and yields `None`.
pub fn rescale_for_display<T>(
    clusters: &mut [Cluster<T>],
    lower: f64,
    upper: f64,
    field: ClusterField,
) -> Result<Option<RangeOutcome>, ComputeError> {
    if clusters.is_empty() {
        return Ok(None);
    }
    let outcome = map_values(
        clusters,
        lower,
        upper,
        |c| field.value_of(c),
        |c, display| c.display = Some(display),
    )?;
    Ok(Some(outcome))
}

/// Stateless request processor bound to a configuration.
///
/// Use this at the transport boundary: it queries the store, clusters,
/// rescales and encodes in one call.
pub struct ClusterProcessor {
    config: MapperConfig,
    encoder: ClusterEncoder,
}

impl Default for ClusterProcessor {
    fn default() -> Self {
        Self::new(MapperConfig::default())
    }
}

impl ClusterProcessor {
    pub fn new(config: MapperConfig) -> Self {
        let encoder = ClusterEncoder::new().with_decimal_places(config.decimal_places);
        Self { config, encoder }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// A request pre-filled from the configuration
    pub fn request(&self) -> ClusterRequest {
        ClusterRequest::from_config(&self.config)
    }

    /// Cluster and rescale an already-fetched record set
    pub fn process_records(
        &self,
        records: &[Record],
        request: &ClusterRequest,
        display_field: ClusterField,
    ) -> Result<ClusterResponse, ComputeError> {
        let mut clusters = cluster_records(records, request)?;
        let range = self.config.display;
        rescale_for_display(&mut clusters, range.lower, range.upper, display_field)?;
        Ok(self.encoder.encode(&clusters))
    }

    /// Query the store and process the matching records
    pub fn process<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        filter: &RecordFilter,
        request: &ClusterRequest,
        display_field: ClusterField,
    ) -> Result<ClusterResponse, ComputeError> {
        let records = store.query(filter)?;
        info!(
            records = records.len(),
            grouping = request.grouping.as_str(),
            "processing cluster request"
        );
        self.process_records(&records, request, display_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisplayRange;
    use crate::types::fixtures::record;
    use crate::types::Coordinate;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_proximity_mean_roundtrip() {
        let records = vec![
            record(1, "x", 10.001, 20.001, 40.0),
            record(2, "x", 10.002, 20.002, 60.0),
        ];
        let request = ClusterRequest::default()
            .with_grouping(GroupingMode::Proximity, Some(1_000.0))
            .with_source(ValueSource::Field(MeasurementField::Avg));

        let clusters = cluster_records(&records, &request).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].value, 50.0);
        assert_eq!(clusters[0].key, Coordinate::new(10.001, 20.001));
    }

    #[test]
    fn test_grid_request_uses_quantized_keys() {
        let records = vec![
            record(1, "x", 2.345, 7.0, 40.0),
            record(2, "x", 2.3461, 7.001, 60.0),
            record(3, "x", 2.3549, 7.0, 80.0),
        ];
        let request = ClusterRequest::default().with_grouping(GroupingMode::Grid, Some(0.01));

        let clusters = cluster_records(&records, &request).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].key, Coordinate::new(2.35, 7.0));
        assert_eq!(clusters[0].count, 3);
    }

    #[test]
    fn test_none_grouping_keeps_each_location() {
        let records = vec![
            record(1, "x", 1.0, 1.0, 40.0),
            record(2, "x", 1.0, 1.00001, 60.0),
            record(3, "x", 1.0, 1.0, 80.0),
        ];
        let request = ClusterRequest::default().with_grouping(GroupingMode::None, None);
        let clusters = cluster_records(&records, &request).unwrap();
        let values: Vec<f64> = clusters.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![60.0, 60.0]);
        assert_eq!(clusters[0].count, 2);
    }

    #[test]
    fn test_deviation_source_keeps_sign() {
        let records = vec![
            record(1, "X", 0.0, 1.0, 10.0),
            record(2, "X", 0.0, 0.0, 20.0),
            record(3, "X", 0.0, 2.0, 30.0),
        ];

        // Each record alone: the weighted mean of one item is its deviation
        let request = ClusterRequest::default()
            .with_grouping(GroupingMode::None, None)
            .with_source(ValueSource::Deviation(MeasurementField::Avg));
        assert_eq!(request.method(), AggregationMethod::InverseDistance);
        let clusters = cluster_records(&records, &request).unwrap();
        let values: Vec<f64> = clusters.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![-10.0, 0.0, 10.0]);

        // Merged: the -10 record sits on the centroid and dominates
        let request = request
            .with_grouping(GroupingMode::Proximity, Some(500_000.0))
            .retain_original(true);
        let clusters = cluster_records(&records, &request).unwrap();
        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].value < -9.0);
        assert_eq!(clusters[0].key, Coordinate::new(0.0, 1.0));

        let members = clusters[0].members.as_ref().unwrap();
        let deviations: Vec<f64> = members.iter().map(|m| m.deviation.unwrap()).collect();
        assert_eq!(deviations, vec![-10.0, 0.0, 10.0]);
        assert_eq!(members[0].weight, Some(1.0));
    }

    #[test]
    fn test_deviation_source_requires_annotation() {
        let r = record(4, "X", 0.0, 0.0, 42.0);
        let mut view = RecordView::new(&r);

        assert_eq!(ValueSource::Field(MeasurementField::Max).value_of(&view).unwrap(), 52.0);
        assert!(matches!(
            ValueSource::Deviation(MeasurementField::Avg).value_of(&view),
            Err(ComputeError::MissingDeviation(4))
        ));

        view.deviation = Some(-3.5);
        assert_eq!(ValueSource::Deviation(MeasurementField::Avg).value_of(&view).unwrap(), -3.5);
    }

    #[test]
    fn test_proximity_without_resolution_keeps_each_location() {
        let records = vec![
            record(1, "x", 10.0, 20.0, 40.0),
            record(2, "x", 10.0000001, 20.0, 60.0),
            record(3, "x", 10.0, 20.0, 80.0),
        ];
        let request = ClusterRequest::default()
            .with_grouping(GroupingMode::Proximity, None)
            .retain_original(true);

        let clusters = cluster_records(&records, &request).unwrap();
        let members: Vec<Vec<u64>> = clusters
            .iter()
            .map(|c| c.members.as_ref().unwrap().iter().map(|m| m.record.id).collect())
            .collect();
        assert_eq!(members, vec![vec![1, 3], vec![2]]);
        assert_eq!(clusters[0].value, 60.0);
        assert_eq!(clusters[1].key, Coordinate::new(10.0000001, 20.0));
    }

    #[test]
    fn test_method_override() {
        let records = vec![record(1, "X", 0.0, 0.0, 10.0), record(2, "X", 0.0, 0.0, 30.0)];
        let request = ClusterRequest::default()
            .with_grouping(GroupingMode::Proximity, Some(10.0))
            .with_source(ValueSource::Deviation(MeasurementField::Avg))
            .with_method(AggregationMethod::Mean);
        let clusters = cluster_records(&records, &request).unwrap();
        assert_eq!(clusters[0].value, 0.0);
        assert!(clusters[0].members.is_none());
    }

    #[test]
    fn test_rescale_for_display() {
        let records = vec![
            record(1, "x", 0.0, 0.0, 40.0),
            record(2, "x", 1.0, 1.0, 60.0),
            record(3, "x", 1.0, 1.0, 70.0),
            record(4, "x", 2.0, 2.0, 80.0),
        ];
        let request = ClusterRequest::default().with_grouping(GroupingMode::None, None);
        let mut clusters = cluster_records(&records, &request).unwrap();

        let outcome = rescale_for_display(&mut clusters, 0.0, 1.0, ClusterField::Value)
            .unwrap()
            .unwrap();
        assert_eq!(outcome.min, 40.0);
        let displays: Vec<f64> = clusters.iter().map(|c| c.display.unwrap()).collect();
        assert_eq!(displays, vec![0.0, 0.625, 1.0]);

        rescale_for_display(&mut clusters, 2.0, 3.0, ClusterField::Count).unwrap();
        let displays: Vec<f64> = clusters.iter().map(|c| c.display.unwrap()).collect();
        assert_eq!(displays, vec![2.0, 3.0, 2.0]);
    }

    #[test]
    fn test_rescale_empty_is_skipped() {
        let mut clusters: Vec<Cluster<RecordView<'_>>> = Vec::new();
        assert_eq!(rescale_for_display(&mut clusters, 0.0, 1.0, ClusterField::Value).unwrap(), None);
    }

    #[test]
    fn test_processor_encodes_rescaled_clusters() {
        let config = MapperConfig {
            display: DisplayRange { lower: 2.0, upper: 3.0 },
            ..Default::default()
        };
        let processor = ClusterProcessor::new(config);
        let records = vec![
            record(1, "x", 0.0, 0.0, 5.0),
            record(2, "x", 1.0, 1.0, 5.0),
            record(3, "x", 2.0, 2.0, 5.0),
        ];
        let request = processor
            .request()
            .with_grouping(GroupingMode::None, None)
            .retain_original(true);

        let response = processor
            .process_records(&records, &request, ClusterField::Value)
            .unwrap();
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["record_count"], 3);
        for i in 0..3 {
            assert_eq!(json["clusters"][i]["display"], 2.0);
            assert_eq!(json["clusters"][i]["original"][0]["id"], i as u64 + 1);
        }
    }
}
