//! Row-wise union of a category's curated partitions.

use deltalake::datafusion::dataframe::DataFrame;
use futures::TryStreamExt;
use snafu::prelude::*;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ParquetCompression;
use crate::emit;
use crate::engine::Engine;
use crate::error::{
    EmptyCategorySnafu, ExecuteStackSnafu, ListPartitionsSnafu, ReadPartitionSnafu, StackError,
    UnionSnafu, WriteStackedSnafu,
};
use crate::layout::Layout;
use crate::metrics::events::CategoryStacked;
use crate::naming::RecordCategory;
use crate::sink::parquet::PartitionWriter;

/// Result of stacking one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackedSummary {
    pub category: RecordCategory,
    pub partitions: usize,
    pub rows: u64,
    /// The stacked dataset directory.
    pub path: PathBuf,
}

/// Stacks curated partitions into one sandbox dataset per category.
pub struct Stacker<'a> {
    engine: &'a Engine,
    layout: &'a Layout,
    compression: ParquetCompression,
}

impl<'a> Stacker<'a> {
    pub fn new(engine: &'a Engine, layout: &'a Layout, compression: ParquetCompression) -> Self {
        Self {
            engine,
            layout,
            compression,
        }
    }

    /// Partition directories of a category, sorted by name.
    pub fn list_partitions(&self, category: RecordCategory) -> Result<Vec<PathBuf>, StackError> {
        let dir = self.layout.curated_dir(category);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return EmptyCategorySnafu { category, dir }.fail();
            }
            Err(source) => return Err(source).context(ListPartitionsSnafu { dir }),
        };

        let mut partitions = Vec::new();
        for entry in entries {
            let path = entry.context(ListPartitionsSnafu { dir: &dir })?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') || n.starts_with('_'));
            if path.is_dir() && !hidden {
                partitions.push(path);
            }
        }
        partitions.sort();

        ensure!(!partitions.is_empty(), EmptyCategorySnafu { category, dir });
        Ok(partitions)
    }

    /// Union every partition of `category` and write the result to its
    /// stacked dataset, replacing the previous one.
    pub async fn stack(&self, category: RecordCategory) -> Result<StackedSummary, StackError> {
        let partitions = self.list_partitions(category)?;
        debug!("Stacking {} partitions of {category}", partitions.len());

        let mut stacked: Option<DataFrame> = None;
        for partition in &partitions {
            let frame = self
                .engine
                .read_parquet(partition)
                .await
                .context(ReadPartitionSnafu {
                    path: partition.display().to_string(),
                })?;
            stacked = Some(match stacked {
                Some(acc) => acc.union(frame).context(UnionSnafu { category })?,
                None => frame,
            });
        }
        let dir = self.layout.curated_dir(category);
        let stacked = stacked.context(EmptyCategorySnafu { category, dir })?;

        let schema = Arc::new(stacked.schema().as_arrow().clone());
        let mut stream = stacked.execute_stream().await.context(ExecuteStackSnafu)?;

        let path = self.layout.stacked(category);
        let mut writer =
            PartitionWriter::create(&path, schema, self.compression).context(WriteStackedSnafu)?;
        while let Some(batch) = stream.try_next().await.context(ExecuteStackSnafu)? {
            writer.write(&batch).context(WriteStackedSnafu)?;
        }
        let written = writer.finish().context(WriteStackedSnafu)?;

        info!(
            partitions = partitions.len(),
            rows = written.rows,
            "Stacked {category} into {}",
            path.display()
        );
        emit!(CategoryStacked {
            category,
            partitions: partitions.len(),
            rows: written.rows,
        });

        Ok(StackedSummary {
            category,
            partitions: partitions.len(),
            rows: written.rows,
            path,
        })
    }
}
