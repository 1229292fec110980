//! Mapper configuration
//!
//! Defaults for requests that do not spell out every parameter. Loaded from a
//! JSON file; every field is optional and falls back to its default.

use crate::cluster::{GroupingMode, Linkage};
use crate::error::ComputeError;
use crate::types::MeasurementField;
use serde::{Deserialize, Serialize};

/// Default grid cell size in decimal degrees
pub const DEFAULT_GRID_RESOLUTION_DEG: f64 = 0.001;

/// Default proximity merge distance in meters
pub const DEFAULT_PROXIMITY_RESOLUTION_M: f64 = 100.0;

/// Target range for display values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRange {
    pub lower: f64,
    pub upper: f64,
}

impl Default for DisplayRange {
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub grouping: GroupingMode,
    /// Grid cell size (degrees)
    pub grid_resolution: f64,
    /// Merge distance for proximity clustering (meters)
    pub proximity_resolution_m: f64,
    pub field: MeasurementField,
    pub linkage: Linkage,
    pub display: DisplayRange,
    /// Emit aggregated values as fixed-point decimal strings
    pub decimal_places: Option<u32>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            grouping: GroupingMode::default(),
            grid_resolution: DEFAULT_GRID_RESOLUTION_DEG,
            proximity_resolution_m: DEFAULT_PROXIMITY_RESOLUTION_M,
            field: MeasurementField::default(),
            linkage: Linkage::default(),
            display: DisplayRange::default(),
            decimal_places: None,
        }
    }
}

impl MapperConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Configured resolution for a grouping mode
    pub fn resolution_for(&self, grouping: GroupingMode) -> Option<f64> {
        match grouping {
            GroupingMode::Grid => Some(self.grid_resolution),
            GroupingMode::Proximity => Some(self.proximity_resolution_m),
            GroupingMode::None => None,
        }
    }
}
