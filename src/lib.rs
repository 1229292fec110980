//! Noisemapper - Geospatial clustering and aggregation of noise measurements
//!
//! Noisemapper turns crowd-sourced noise recordings into map-ready clusters
//! through a deterministic pipeline: upload validation → storage query →
//! baseline deviation → spatial clustering → aggregation → display rescaling
//! → response encoding.
//!
//! ## Modules
//!
//! - **Ingest**: [`schema`] parses and validates device uploads, [`store`] keeps them
//! - **Core**: [`cluster`], [`aggregator`], [`baseline`] and [`range`] do the math
//! - **Boundary**: [`pipeline`] orchestrates a request and [`encoder`] shapes the response

pub mod aggregator;
pub mod baseline;
pub mod cluster;
pub mod config;
pub mod encoder;
pub mod error;
pub mod geo;
pub mod pipeline;
pub mod range;
pub mod schema;
pub mod store;
pub mod types;

pub use aggregator::{Aggregate, Aggregator, ArithmeticMean, InverseDistanceWeightedMean, Sample};
pub use baseline::{annotate_deviation, DeviceBaselines};
pub use cluster::{cluster, Cluster, ClusterOptions, GroupingMode, Linkage};
pub use config::MapperConfig;
pub use encoder::{ClusterEncoder, ClusterResponse, OutputValue};
pub use error::ComputeError;
pub use pipeline::{
    cluster_records, rescale_for_display, AggregationMethod, ClusterField, ClusterProcessor, ClusterRequest,
    ValueSource,
};
pub use range::{map_values, RangeOutcome};
pub use store::{BoundingBox, InMemoryStore, RecordFilter, RecordStore};
pub use types::{Coordinate, MeasurementField, MicSource, Record, RecordView};

// Schema exports
pub use schema::{NewRecord, UploadParser, UploadRecord, ValidationError};

/// Crate version embedded in every response
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for responses
pub const PRODUCER_NAME: &str = "noisemapper";
