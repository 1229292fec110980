//! Noisemap CLI - Command-line interface for Noisemapper
//!
//! Commands:
//! - cluster: Load uploads, cluster them and print map-ready clusters
//! - validate: Validate upload records
//! - devices: List the distinct device names in an upload file

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use noisemapper::cluster::{GroupingMode, Linkage};
use noisemapper::config::{DisplayRange, MapperConfig};
use noisemapper::encoder::ClusterResponse;
use noisemapper::pipeline::{AggregationMethod, ClusterField, ClusterProcessor, ValueSource};
use noisemapper::schema::{parse_timestamp, UploadParser, UploadRecord};
use noisemapper::store::{BoundingBox, InMemoryStore, RecordFilter, RecordStore};
use noisemapper::types::{MeasurementField, MicSource};
use noisemapper::{ComputeError, VERSION};

/// Noisemap - Cluster crowd-sourced noise measurements for map display
#[derive(Parser)]
#[command(name = "noisemap")]
#[command(version = VERSION)]
#[command(about = "Cluster and aggregate noise measurements", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster uploaded measurements
    Cluster {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Grouping mode
        #[arg(long)]
        grouping: Option<Grouping>,

        /// Grid cell size in degrees, or merge distance in meters for proximity
        #[arg(long)]
        resolution: Option<f64>,

        /// Measurement field to aggregate
        #[arg(long)]
        field: Option<Field>,

        /// Aggregate deviation from each device's mean instead of raw levels
        #[arg(long)]
        deviation: bool,

        /// Aggregation method (defaults to mean, or inverse-distance for deviation)
        #[arg(long)]
        method: Option<Method>,

        /// Compare against every member of a cluster instead of its seed only
        #[arg(long)]
        chain: bool,

        /// Include member records in each cluster
        #[arg(long)]
        retain: bool,

        /// Rescale cluster member counts instead of values for display
        #[arg(long)]
        display_count: bool,

        /// Display range lower bound
        #[arg(long)]
        display_lower: Option<f64>,

        /// Display range upper bound
        #[arg(long)]
        display_upper: Option<f64>,

        /// Emit values as fixed-point decimals with this many places
        #[arg(long)]
        decimal_places: Option<u32>,

        /// Bounding box as min_lat,min_lon,max_lat,max_lon
        #[arg(long, value_parser = parse_bbox)]
        bbox: Option<BoundingBox>,

        /// Only include these devices (repeatable)
        #[arg(long = "device")]
        devices: Vec<String>,

        /// Only include measurements at or after this time
        #[arg(long, value_parser = parse_time)]
        from: Option<chrono::DateTime<chrono::Utc>>,

        /// Only include measurements before this time
        #[arg(long, value_parser = parse_time)]
        until: Option<chrono::DateTime<chrono::Utc>>,

        /// Only include this microphone source
        #[arg(long)]
        source: Option<Source>,
    },

    /// Validate upload records
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List distinct device names
    Devices {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// A single upload object or a JSON array of uploads
    Json,
    /// Newline-delimited JSON (one upload per line)
    Ndjson,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Full response as compact JSON
    Json,
    /// Full response as pretty-printed JSON
    JsonPretty,
    /// One cluster per line
    Ndjson,
}

#[derive(Clone, Copy, ValueEnum)]
enum Grouping {
    Grid,
    Proximity,
    None,
}

impl From<Grouping> for GroupingMode {
    fn from(g: Grouping) -> Self {
        match g {
            Grouping::Grid => GroupingMode::Grid,
            Grouping::Proximity => GroupingMode::Proximity,
            Grouping::None => GroupingMode::None,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Field {
    Avg,
    Max,
}

impl From<Field> for MeasurementField {
    fn from(f: Field) -> Self {
        match f {
            Field::Avg => MeasurementField::Avg,
            Field::Max => MeasurementField::Max,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    Mean,
    InverseDistance,
}

impl From<Method> for AggregationMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Mean => AggregationMethod::Mean,
            Method::InverseDistance => AggregationMethod::InverseDistance,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Internal,
    Headset,
}

impl From<Source> for MicSource {
    fn from(s: Source) -> Self {
        match s {
            Source::Internal => MicSource::Internal,
            Source::Headset => MicSource::Headset,
        }
    }
}

fn parse_bbox(raw: &str) -> Result<BoundingBox, String> {
    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|e| format!("invalid bounding box '{raw}': {e}"))?;
    match parts.as_slice() {
        [min_lat, min_lon, max_lat, max_lon] => Ok(BoundingBox {
            min_lat: *min_lat,
            max_lat: *max_lat,
            min_lon: *min_lon,
            max_lon: *max_lon,
        }),
        _ => Err(format!("bounding box needs four values, got {}", parts.len())),
    }
}

fn parse_time(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, String> {
    parse_timestamp(raw)
}

fn main() -> ExitCode {
    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_writer(io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")));
    tracing_subscriber::registry().with(stderr_layer).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), NoisemapCliError> {
    match cli.command {
        Commands::Cluster {
            input,
            output,
            input_format,
            output_format,
            config,
            grouping,
            resolution,
            field,
            deviation,
            method,
            chain,
            retain,
            display_count,
            display_lower,
            display_upper,
            decimal_places,
            bbox,
            devices,
            from,
            until,
            source,
        } => {
            let mut config = match config {
                Some(path) => MapperConfig::from_json(&fs::read_to_string(path)?)?,
                None => MapperConfig::default(),
            };
            let default_display = config.display;
            config.display = DisplayRange {
                lower: display_lower.unwrap_or(default_display.lower),
                upper: display_upper.unwrap_or(default_display.upper),
            };
            if decimal_places.is_some() {
                config.decimal_places = decimal_places;
            }

            let mut filter = RecordFilter::default().with_time_range(from, until);
            if let Some(bbox) = bbox {
                filter = filter.with_bbox(bbox);
            }
            if !devices.is_empty() {
                filter = filter.with_devices(devices);
            }
            if let Some(source) = source {
                filter = filter.with_sources([source.into()]);
            }

            let options = ClusterArgs {
                grouping: grouping.map(Into::into),
                resolution,
                field: field.map(Into::into),
                deviation,
                method: method.map(Into::into),
                chain,
                retain,
                display_field: if display_count { ClusterField::Count } else { ClusterField::Value },
            };

            cmd_cluster(&input, &output, input_format, output_format, config, &filter, &options)
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Devices { input, input_format } => cmd_devices(&input, input_format),
    }
}

struct ClusterArgs {
    grouping: Option<GroupingMode>,
    resolution: Option<f64>,
    field: Option<MeasurementField>,
    deviation: bool,
    method: Option<AggregationMethod>,
    chain: bool,
    retain: bool,
    display_field: ClusterField,
}

fn cmd_cluster(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: MapperConfig,
    filter: &RecordFilter,
    args: &ClusterArgs,
) -> Result<(), NoisemapCliError> {
    let uploads = read_uploads(input, input_format)?;
    let store = load_store(uploads)?;

    let processor = ClusterProcessor::new(config);
    let mut request = processor.request();

    if let Some(grouping) = args.grouping {
        let resolution = args.resolution.or_else(|| processor.config().resolution_for(grouping));
        request = request.with_grouping(grouping, resolution);
    } else if let Some(resolution) = args.resolution {
        request.resolution = Some(resolution);
    }

    let field = args.field.unwrap_or(processor.config().field);
    request = request.with_source(if args.deviation {
        ValueSource::Deviation(field)
    } else {
        ValueSource::Field(field)
    });
    if let Some(method) = args.method {
        request = request.with_method(method);
    }
    if args.chain {
        request = request.with_linkage(Linkage::Chain);
    }
    request = request.retain_original(args.retain);

    let response = processor.process(&store, filter, &request, args.display_field)?;
    info!(clusters = response.clusters.len(), records = response.record_count, "clustering complete");

    let output_data = format_output(&response, output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), NoisemapCliError> {
    let uploads = read_uploads(input, input_format)?;
    let results = UploadParser::validate_batch(&uploads);

    let report = ValidationReport {
        total_records: uploads.len(),
        valid_records: uploads.len() - results.len(),
        invalid_records: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                uuid: r.uuid.clone(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Record {} (index {}): {}",
                    err.uuid.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_records > 0 {
        Err(NoisemapCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_devices(input: &Path, input_format: InputFormat) -> Result<(), NoisemapCliError> {
    let store = load_store(read_uploads(input, input_format)?)?;
    for name in store.device_names()? {
        println!("{}", name);
    }
    Ok(())
}

fn read_uploads(input: &Path, input_format: InputFormat) -> Result<Vec<UploadRecord>, NoisemapCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(NoisemapCliError::InteractiveStdin);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let uploads = match input_format {
        InputFormat::Json => UploadParser::parse_batch(&input_data)?,
        InputFormat::Ndjson => UploadParser::parse_ndjson(&input_data)?,
    };

    if uploads.is_empty() {
        return Err(NoisemapCliError::NoRecords);
    }
    Ok(uploads)
}

/// Store every valid upload; invalid ones are logged and skipped
fn load_store(uploads: Vec<UploadRecord>) -> Result<InMemoryStore, NoisemapCliError> {
    let mut store = InMemoryStore::new();
    for (index, upload) in uploads.into_iter().enumerate() {
        match store.insert_upload(upload) {
            Ok(_) => {}
            Err(ComputeError::InvalidRecord(e)) => warn!(index, error = %e, "skipping invalid upload"),
            Err(e) => return Err(e.into()),
        }
    }
    if store.is_empty() {
        return Err(NoisemapCliError::NoRecords);
    }
    Ok(store)
}

fn format_output(response: &ClusterResponse, format: OutputFormat) -> Result<String, NoisemapCliError> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", response.to_json()?)),
        OutputFormat::JsonPretty => Ok(format!("{}\n", response.to_json_pretty()?)),
        OutputFormat::Ndjson => {
            let mut output = String::new();
            for cluster in &response.clusters {
                output.push_str(&serde_json::to_string(cluster)?);
                output.push('\n');
            }
            Ok(output)
        }
    }
}

// Error types

#[derive(Debug)]
enum NoisemapCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoRecords,
    InteractiveStdin,
    ValidationFailed(usize),
}

impl From<io::Error> for NoisemapCliError {
    fn from(e: io::Error) -> Self {
        NoisemapCliError::Io(e)
    }
}

impl From<ComputeError> for NoisemapCliError {
    fn from(e: ComputeError) -> Self {
        NoisemapCliError::Compute(e)
    }
}

impl From<serde_json::Error> for NoisemapCliError {
    fn from(e: serde_json::Error) -> Self {
        NoisemapCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NoisemapCliError> for CliError {
    fn from(e: NoisemapCliError) -> Self {
        match e {
            NoisemapCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NoisemapCliError::Compute(e) => CliError {
                code: "COMPUTE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input matches the upload record format".to_string()),
            },
            NoisemapCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NoisemapCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No valid records found in input".to_string(),
                hint: Some("Run 'noisemap validate' for details".to_string()),
            },
            NoisemapCliError::InteractiveStdin => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal".to_string(),
                hint: Some("Pipe uploads into stdin or pass a file with --input".to_string()),
            },
            NoisemapCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    uuid: Option<String>,
    error: String,
}
