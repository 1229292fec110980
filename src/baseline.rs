//! Per-device baselines
//!
//! Devices differ in microphone sensitivity, so absolute levels from two
//! devices are not directly comparable. A baseline is the mean of one
//! measurement field over a device's records; annotating a record with its
//! deviation from that mean gives a device-independent value to aggregate.

use crate::aggregator::{Aggregator, ArithmeticMean, Sample};
use crate::error::ComputeError;
use crate::types::{MeasurementField, Record, RecordView};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Baseline means keyed by device name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceBaselines {
    field: MeasurementField,
    means: BTreeMap<String, f64>,
}

impl DeviceBaselines {
    /// Compute the mean of `field` for every device present in `records`
    pub fn compute(records: &[Record], field: MeasurementField) -> Result<Self, ComputeError> {
        let extract = move |r: &Record| -> Sample { field.value_of(r).into() };

        let mut per_device = BTreeMap::new();
        for record in records {
            per_device
                .entry(record.device_name.as_str())
                .or_insert_with(|| ArithmeticMean::new(extract))
                .accumulate(record);
        }

        let means = per_device
            .into_iter()
            .map(|(device, mean)| Ok((device.to_string(), mean.finalize()?.value)))
            .collect::<Result<BTreeMap<_, _>, ComputeError>>()?;

        debug!(devices = means.len(), field = field.as_str(), "computed device baselines");

        Ok(Self { field, means })
    }

    pub fn field(&self) -> MeasurementField {
        self.field
    }

    /// Baseline mean for a device
    pub fn get(&self, device: &str) -> Option<f64> {
        self.means.get(device).copied()
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.means.keys().map(String::as_str)
    }

    /// Signed deviation of a record from its device baseline
    pub fn deviation(&self, record: &Record) -> Result<f64, ComputeError> {
        let baseline = self
            .get(&record.device_name)
            .ok_or_else(|| ComputeError::MissingBaseline(record.device_name.clone()))?;
        Ok(self.field.value_of(record) - baseline)
    }

    /// Views of `records` carrying their deviation from these baselines
    pub fn annotate<'a>(&self, records: &'a [Record]) -> Result<Vec<RecordView<'a>>, ComputeError> {
        records
            .iter()
            .map(|record| {
                let mut view = RecordView::new(record);
                view.deviation = Some(self.deviation(record)?);
                Ok(view)
            })
            .collect()
    }
}

/// Annotate every record with its deviation from its device's mean of `field`.
///
/// Baselines are computed from the same records, so every device is covered.
pub fn annotate_deviation(
    records: &[Record],
    field: MeasurementField,
) -> Result<Vec<RecordView<'_>>, ComputeError> {
    DeviceBaselines::compute(records, field)?.annotate(records)
}
