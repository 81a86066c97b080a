//! Error types for cnpjlake using snafu.
//!
//! Each stage of the pipeline owns an error enum with context selectors;
//! [`PipelineError`] aggregates them and records which stage (and category,
//! where one applies) failed.

use snafu::prelude::*;
use std::path::PathBuf;

use crate::naming::RecordCategory;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A layer root (staging, raw, curated, sandbox) is empty.
    #[snafu(display("Layer path '{layer}' cannot be empty"))]
    EmptyLayerPath { layer: &'static str },

    /// The output label is empty.
    #[snafu(display("Output label cannot be empty"))]
    EmptyLabel,

    /// A schema override declares no columns.
    #[snafu(display("Schema for suffix '{suffix}' must have at least one column"))]
    EmptyColumns { suffix: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Fetch Errors ============

/// Errors raised while downloading a replacement archive.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    /// The HTTP client could not be built.
    #[snafu(display("Failed to build HTTP client"))]
    ClientBuild { source: reqwest::Error },

    /// The request itself failed (connect, timeout, body).
    #[snafu(display("Request to {url} failed"))]
    FetchRequest { url: String, source: reqwest::Error },

    /// The server answered with a non-success status.
    #[snafu(display("Request to {url} returned HTTP {status}"))]
    FetchStatus { url: String, status: u16 },

    /// The downloaded bytes could not be written back to staging.
    #[snafu(display("Failed to write fetched archive to {}", path.display()))]
    FetchPersist {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Archive Errors ============

/// Errors that can occur while verifying and extracting staging archives.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArchiveError {
    /// The staging directory could not be listed.
    #[snafu(display("Failed to list staging directory {}", path.display()))]
    ListStaging {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive file could not be opened.
    #[snafu(display("Failed to open archive {}", path.display()))]
    OpenArchive {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive is still corrupted (after any re-fetch).
    #[snafu(display("Archive {} is corrupted", path.display()))]
    CorruptArchive {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    /// Corrupted archive and re-fetching is disabled.
    #[snafu(display("Archive {} is corrupted and re-fetch is disabled", path.display()))]
    RefetchDisabled { path: PathBuf },

    /// Re-fetching a corrupted archive failed.
    #[snafu(display("Failed to re-fetch corrupted archive {}", path.display()))]
    Refetch { path: PathBuf, source: FetchError },

    /// An entry inside the archive could not be read.
    #[snafu(display("Failed to read entry {index} of {}", path.display()))]
    ReadEntry {
        path: PathBuf,
        index: usize,
        source: zip::result::ZipError,
    },

    /// An entry could not be written to the raw layer.
    #[snafu(display("Failed to extract {entry} from {}", path.display()))]
    ExtractEntry {
        path: PathBuf,
        entry: String,
        source: std::io::Error,
    },

    /// A raw category directory could not be created.
    #[snafu(display("Failed to create raw directory {}", path.display()))]
    CreateRawDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The blocking archive task panicked or was cancelled.
    #[snafu(display("Archive task for {} failed", path.display()))]
    ArchiveTask {
        path: PathBuf,
        source: tokio::task::JoinError,
    },
}

// ============ Version Errors ============

/// Errors raised while resolving the current version and pruning stale files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum VersionError {
    /// No candidate file carried a version token.
    #[snafu(display("No versions found in {}", dir.display()))]
    NoVersions { dir: PathBuf },

    /// A candidate file name has too few segments to carry a version token.
    #[snafu(display("File name '{name}' has no version segment"))]
    MissingVersionToken { name: String },

    /// The directory could not be listed.
    #[snafu(display("Failed to list {}", dir.display()))]
    ListDirectory {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// A stale path could not be deleted.
    #[snafu(display("Failed to delete stale path {}", path.display()))]
    DeletePath {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Parquet Errors ============

/// Errors that can occur while writing Parquet partitions.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ParquetError {
    /// The partition directory could not be reset.
    #[snafu(display("Failed to prepare output directory {}", path.display()))]
    PrepareOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The part file could not be created.
    #[snafu(display("Failed to create part file {}", path.display()))]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create the Arrow writer.
    #[snafu(display("Failed to create Parquet writer"))]
    WriterCreate {
        source: deltalake::parquet::errors::ParquetError,
    },

    /// Failed to write a batch.
    #[snafu(display("Parquet write error"))]
    Write {
        source: deltalake::parquet::errors::ParquetError,
    },

    /// Failed to flush the footer.
    #[snafu(display("Failed to close Parquet writer"))]
    CloseWriter {
        source: deltalake::parquet::errors::ParquetError,
    },

    /// Buffered bytes could not be flushed to disk.
    #[snafu(display("Failed to flush part file {}", path.display()))]
    FlushFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Convert Errors ============

/// Errors raised while converting a raw delimited file into a partition.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConvertError {
    /// The raw file could not be opened.
    #[snafu(display("Failed to open raw file {}", path.display()))]
    OpenRaw {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The delimited reader rejected a record.
    #[snafu(display("Failed to parse {}", path.display()))]
    ParseRecord { path: PathBuf, source: csv::Error },

    /// A record does not carry one field per schema column.
    #[snafu(display(
        "{} line {line}: expected {expected} fields, found {found}",
        path.display()
    ))]
    FieldCount {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },

    /// Column builders could not be assembled into a batch.
    #[snafu(display("Failed to build record batch"))]
    BuildBatch {
        source: deltalake::arrow::error::ArrowError,
    },

    /// Writing the partition failed.
    #[snafu(display("Failed to write curated partition"))]
    WritePartition { source: ParquetError },
}

// ============ Stack Errors ============

/// Errors raised while stacking a category's partitions.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StackError {
    /// No partitions exist for the category.
    #[snafu(display("No curated partitions for {category} in {}", dir.display()))]
    EmptyCategory {
        category: RecordCategory,
        dir: PathBuf,
    },

    /// The curated category directory could not be listed.
    #[snafu(display("Failed to list partitions in {}", dir.display()))]
    ListPartitions {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// A partition could not be read.
    #[snafu(display("Failed to read partition {path}"))]
    ReadPartition {
        path: String,
        source: deltalake::datafusion::error::DataFusionError,
    },

    /// Partitions could not be unioned (e.g. mismatched columns).
    #[snafu(display("Failed to union partitions of {category}"))]
    Union {
        category: RecordCategory,
        source: deltalake::datafusion::error::DataFusionError,
    },

    /// Executing the stacked plan failed.
    #[snafu(display("Failed to execute stacked dataset"))]
    ExecuteStack {
        source: deltalake::datafusion::error::DataFusionError,
    },

    /// Writing the stacked dataset failed.
    #[snafu(display("Failed to write stacked dataset"))]
    WriteStacked { source: ParquetError },
}

// ============ Join Errors ============

/// Errors raised while joining the stacked datasets.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JoinError {
    /// No support partition matches the simples marker.
    #[snafu(display("No entry matching '{marker}' in {}", dir.display()))]
    MissingReference { marker: String, dir: PathBuf },

    /// More than one support partition matches the simples marker.
    #[snafu(display("Ambiguous '{marker}' reference, candidates: {}", matches.join(", ")))]
    AmbiguousReference {
        marker: String,
        matches: Vec<String>,
    },

    /// The support directory could not be listed.
    #[snafu(display("Failed to list {}", dir.display()))]
    ListReference {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// A joined input could not be read.
    #[snafu(display("Failed to read dataset {path}"))]
    ReadDataset {
        path: String,
        source: deltalake::datafusion::error::DataFusionError,
    },

    /// Building the join plan failed.
    #[snafu(display("Failed to plan join with {dataset}"))]
    JoinPlan {
        dataset: String,
        source: deltalake::datafusion::error::DataFusionError,
    },
}

// ============ Delta Errors ============

/// Errors that can occur during Delta Lake operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DeltaError {
    /// Failed to create struct type.
    #[snafu(display("Failed to create struct type: {message}"))]
    StructType { message: String },

    /// Schema conversion error.
    #[snafu(display("Schema conversion failed"))]
    SchemaConversion {
        source: deltalake::arrow::error::ArrowError,
    },

    /// Delta Lake operation failed.
    #[snafu(display("Delta Lake operation failed"))]
    DeltaOperation { source: deltalake::DeltaTableError },

    /// The table path could not be expressed as a URL.
    #[snafu(display("Cannot build table URL for {}", path.display()))]
    TableUrl { path: PathBuf },

    /// The table directory could not be created.
    #[snafu(display("Failed to create table directory {}", path.display()))]
    CreateTableDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Sink Errors ============

/// Errors raised by the result writer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Executing the dataset plan failed.
    #[snafu(display("Failed to execute output dataset"))]
    ExecuteOutput {
        source: deltalake::datafusion::error::DataFusionError,
    },

    /// Writing the Parquet snapshot failed.
    #[snafu(display("Parquet snapshot write failed"))]
    Snapshot { source: ParquetError },

    /// Writing the Delta table failed.
    #[snafu(display("Delta table write failed"))]
    Table { source: DeltaError },

    /// At least one representation was not written.
    #[snafu(display("Output '{label}' incomplete: {}", failures.join("; ")))]
    Incomplete { label: String, failures: Vec<String> },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// The metrics listener could not be bound.
    #[snafu(display("Failed to bind metrics endpoint to {addr}"))]
    BindEndpoint {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// The archive fetcher could not be built.
    #[snafu(display("Failed to set up archive fetcher"))]
    Fetcher { source: FetchError },

    /// Extraction of staging archives failed.
    #[snafu(display("Extraction failed"))]
    Extract { source: ArchiveError },

    /// Pruning a category directory failed.
    #[snafu(display("Pruning {layer} {category} failed"))]
    Prune {
        category: RecordCategory,
        layer: &'static str,
        source: VersionError,
    },

    /// Converting a raw file failed.
    #[snafu(display("Curating {category} failed"))]
    Convert {
        category: RecordCategory,
        source: ConvertError,
    },

    /// Stacking a category failed.
    #[snafu(display("Stacking {category} failed"))]
    Stack {
        category: RecordCategory,
        source: StackError,
    },

    /// Joining the datasets failed.
    #[snafu(display("Join failed"))]
    Join { source: JoinError },

    /// Persisting the result failed.
    #[snafu(display("Saving results '{label}' failed"))]
    Save { label: String, source: SinkError },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

impl PipelineError {
    /// The category whose processing failed, if the failure is category-scoped.
    pub fn category(&self) -> Option<RecordCategory> {
        match self {
            PipelineError::Prune { category, .. }
            | PipelineError::Convert { category, .. }
            | PipelineError::Stack { category, .. } => Some(*category),
            _ => None,
        }
    }
}
