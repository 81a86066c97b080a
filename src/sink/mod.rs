//! Result persistence.
//!
//! The joined dataset is written twice: as a plain Parquet snapshot and as a
//! Delta table. Both are full replacements and are attempted independently;
//! one failing does not undo or skip the other. Each representation runs
//! the dataset plan separately.

pub mod delta;
pub mod parquet;

use deltalake::arrow::datatypes::SchemaRef;
use deltalake::datafusion::dataframe::DataFrame;
use futures::TryStreamExt;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ParquetCompression;
use crate::emit;
use crate::error::{ExecuteOutputSnafu, IncompleteSnafu, SinkError, SnapshotSnafu, TableSnafu};
use crate::layout::Layout;
use crate::metrics::events::{OutputKind, OutputWritten};
use crate::sink::parquet::PartitionWriter;

/// What a successful write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSummary {
    pub rows: u64,
    pub snapshot: PathBuf,
    pub table: PathBuf,
    pub table_version: i64,
}

/// Writes the final dataset under a label.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    layout: Layout,
    compression: ParquetCompression,
}

impl ResultWriter {
    pub fn new(layout: Layout, compression: ParquetCompression) -> Self {
        Self {
            layout,
            compression,
        }
    }

    /// Persist `dataset` as `<label>` in both representations.
    ///
    /// Each writer executes the plan on its own and streams its batches, so
    /// the dataset is never held in memory as a whole.
    pub async fn write(&self, dataset: DataFrame, label: &str) -> Result<OutputSummary, SinkError> {
        let schema = Arc::new(dataset.schema().as_arrow().clone());
        let plan = Arc::new(dataset.logical_plan().clone());

        let snapshot = self.layout.snapshot(label);
        let table = self.layout.delta_table(label);
        info!("Writing results '{label}'");

        let mut failures = Vec::new();

        let snapshot_result = self
            .write_snapshot(&snapshot, schema.clone(), dataset)
            .await;
        emit!(OutputWritten {
            kind: OutputKind::Snapshot,
            success: snapshot_result.is_ok(),
        });
        let rows = match snapshot_result {
            Ok(rows) => {
                info!(rows, "Wrote Parquet snapshot {}", snapshot.display());
                rows
            }
            Err(e) => {
                error!("Parquet snapshot {} failed: {e}", snapshot.display());
                failures.push(describe(OutputKind::Snapshot, e));
                0
            }
        };

        let table_result = delta::overwrite_table(&table, &schema, plan, self.compression)
            .await
            .context(TableSnafu);
        emit!(OutputWritten {
            kind: OutputKind::Table,
            success: table_result.is_ok(),
        });
        let table_version = match table_result {
            Ok(version) => version,
            Err(e) => {
                error!("Delta table {} failed: {e}", table.display());
                failures.push(describe(OutputKind::Table, e));
                -1
            }
        };

        ensure!(failures.is_empty(), IncompleteSnafu { label, failures });

        Ok(OutputSummary {
            rows,
            snapshot,
            table,
            table_version,
        })
    }

    /// Stream `dataset` into a fresh snapshot directory. Returns the rows
    /// written.
    async fn write_snapshot(
        &self,
        dir: &Path,
        schema: SchemaRef,
        dataset: DataFrame,
    ) -> Result<u64, SinkError> {
        let mut stream = dataset.execute_stream().await.context(ExecuteOutputSnafu)?;
        let mut writer =
            PartitionWriter::create(dir, schema, self.compression).context(SnapshotSnafu)?;
        while let Some(batch) = stream.try_next().await.context(ExecuteOutputSnafu)? {
            writer.write(&batch).context(SnapshotSnafu)?;
        }
        let written = writer.finish().context(SnapshotSnafu)?;
        Ok(written.rows)
    }
}

fn describe(kind: OutputKind, error: SinkError) -> String {
    format!("{}: {}", kind.as_str(), snafu::Report::from_error(error))
}
