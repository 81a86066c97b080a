//! Raw delimited file to curated Parquet partition.

use snafu::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::ParquetCompression;
use crate::emit;
use crate::error::{ConvertError, WritePartitionSnafu};
use crate::layout::Layout;
use crate::metrics::events::{ConversionCompleted, FileSkipped, RecordsConverted};
use crate::schema::arrow_schema;
use crate::sink::parquet::{PartitionWriter, WrittenPartition};
use crate::source::{DelimitedReader, DelimitedReaderConfig, RawFile};

/// A curated partition: one directory per retained raw file.
pub type CuratedPartition = WrittenPartition;

/// Converts raw files into curated partitions.
#[derive(Debug, Clone)]
pub struct CuratedConverter {
    layout: Layout,
    reader: DelimitedReaderConfig,
    compression: ParquetCompression,
}

impl CuratedConverter {
    pub fn new(
        layout: Layout,
        reader: DelimitedReaderConfig,
        compression: ParquetCompression,
    ) -> Self {
        Self {
            layout,
            reader,
            compression,
        }
    }

    /// Convert `raw` using `columns` as positional field names.
    ///
    /// `None` columns means the file type is not converted. Any existing
    /// partition for the same raw file is replaced.
    pub fn convert(
        &self,
        raw: &RawFile,
        columns: Option<&[String]>,
    ) -> Result<Option<CuratedPartition>, ConvertError> {
        let Some(columns) = columns else {
            debug!("No columns for {}, skipping", raw.name);
            emit!(FileSkipped {
                category: raw.category,
            });
            return Ok(None);
        };

        let start = Instant::now();
        let schema = arrow_schema(columns);
        let dir = self
            .layout
            .curated_partition(raw.category, raw.name.as_str());

        let reader = DelimitedReader::open(&raw.path, schema.clone(), self.reader)?;
        let mut writer =
            PartitionWriter::create(&dir, schema, self.compression).context(WritePartitionSnafu)?;
        for batch in reader {
            writer.write(&batch?).context(WritePartitionSnafu)?;
        }
        let partition = writer.finish().context(WritePartitionSnafu)?;

        info!(
            category = %raw.category,
            rows = partition.rows,
            "Curated {}",
            raw.name
        );
        emit!(RecordsConverted {
            category: raw.category,
            count: partition.rows,
        });
        emit!(ConversionCompleted {
            duration: start.elapsed(),
        });

        Ok(Some(partition))
    }
}
