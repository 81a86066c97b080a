//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a pipeline run.
//! Events implement the `InternalEvent` trait which records the matching
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::naming::RecordCategory;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when an archive has been extracted into the raw layer.
pub struct ArchiveExtracted {
    pub category: RecordCategory,
    pub entries: u64,
}

impl InternalEvent for ArchiveExtracted {
    fn emit(self) {
        trace!(category = self.category.as_str(), entries = self.entries, "Archive extracted");
        counter!("cnpjlake_archives_extracted_total", "category" => self.category.as_str())
            .increment(1);
        counter!("cnpjlake_entries_extracted_total", "category" => self.category.as_str())
            .increment(self.entries);
    }
}

/// Outcome of a remote archive download.
#[derive(Debug, Clone, Copy)]
pub enum FetchStatus {
    Success,
    Retry,
    Failed,
}

impl FetchStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Success => "success",
            FetchStatus::Retry => "retry",
            FetchStatus::Failed => "failed",
        }
    }
}

/// Event emitted for every download attempt of a corrupted archive.
pub struct ArchiveFetched {
    pub status: FetchStatus,
}

impl InternalEvent for ArchiveFetched {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Archive fetch attempt");
        counter!("cnpjlake_archive_fetches_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted after a directory prune.
pub struct StalePathsRemoved {
    pub category: RecordCategory,
    pub count: u64,
}

impl InternalEvent for StalePathsRemoved {
    fn emit(self) {
        trace!(category = self.category.as_str(), count = self.count, "Stale paths removed");
        counter!("cnpjlake_stale_paths_removed_total", "category" => self.category.as_str())
            .increment(self.count);
    }
}

/// Event emitted when a raw file has been converted to a curated partition.
pub struct RecordsConverted {
    pub category: RecordCategory,
    pub count: u64,
}

impl InternalEvent for RecordsConverted {
    fn emit(self) {
        trace!(category = self.category.as_str(), count = self.count, "Records converted");
        counter!("cnpjlake_records_converted_total", "category" => self.category.as_str())
            .increment(self.count);
    }
}

/// Event emitted when a raw file is left unconverted (no column mapping).
pub struct FileSkipped {
    pub category: RecordCategory,
}

impl InternalEvent for FileSkipped {
    fn emit(self) {
        trace!(category = self.category.as_str(), "File skipped");
        counter!("cnpjlake_files_skipped_total", "category" => self.category.as_str()).increment(1);
    }
}

/// Event emitted when bytes are written to Parquet files.
pub struct BytesWritten {
    pub bytes: u64,
}

impl InternalEvent for BytesWritten {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes written");
        counter!("cnpjlake_bytes_written_total").increment(self.bytes);
    }
}

/// Event emitted when a category's partitions have been stacked.
pub struct CategoryStacked {
    pub category: RecordCategory,
    pub partitions: usize,
    pub rows: u64,
}

impl InternalEvent for CategoryStacked {
    fn emit(self) {
        trace!(
            category = self.category.as_str(),
            partitions = self.partitions,
            rows = self.rows,
            "Category stacked"
        );
        gauge!("cnpjlake_stacked_rows", "category" => self.category.as_str()).set(self.rows as f64);
    }
}

/// Representation of the persisted result.
#[derive(Debug, Clone, Copy)]
pub enum OutputKind {
    Snapshot,
    Table,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Snapshot => "parquet",
            OutputKind::Table => "delta",
        }
    }
}

/// Event emitted after an attempt to persist one result representation.
pub struct OutputWritten {
    pub kind: OutputKind,
    pub success: bool,
}

impl InternalEvent for OutputWritten {
    fn emit(self) {
        let status = if self.success { "success" } else { "failed" };
        trace!(kind = self.kind.as_str(), status, "Output written");
        counter!(
            "cnpjlake_outputs_written_total",
            "kind" => self.kind.as_str(),
            "status" => status
        )
        .increment(1);
    }
}

// ============================================================================
// Histogram events for timing
// ============================================================================

/// Pipeline stage, used to tag timing metrics.
#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Extract,
    Curate,
    Stack,
    Join,
    Save,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Curate => "curate",
            Stage::Stack => "stack",
            Stage::Join => "join",
            Stage::Save => "save",
        }
    }
}

/// Event emitted when a pipeline stage completes.
pub struct StageCompleted {
    pub stage: Stage,
    pub duration: Duration,
}

impl InternalEvent for StageCompleted {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            duration_ms = self.duration.as_millis(),
            "Stage completed"
        );
        histogram!("cnpjlake_stage_duration_seconds", "stage" => self.stage.as_str())
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a raw file conversion completes.
pub struct ConversionCompleted {
    pub duration: Duration,
}

impl InternalEvent for ConversionCompleted {
    fn emit(self) {
        trace!(duration_ms = self.duration.as_millis(), "Conversion completed");
        histogram!("cnpjlake_conversion_duration_seconds").record(self.duration.as_secs_f64());
    }
}
