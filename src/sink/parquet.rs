//! Parquet partition writer.
//!
//! A partition is a directory holding a single part file. Creating a
//! writer replaces whatever the directory held before.

use deltalake::arrow::array::RecordBatch;
use deltalake::arrow::datatypes::SchemaRef;
use deltalake::parquet::arrow::ArrowWriter;
use deltalake::parquet::basic::{Compression, GzipLevel, ZstdLevel};
use deltalake::parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::config::ParquetCompression;
use crate::emit;
use crate::error::{
    CloseWriterSnafu, CreateFileSnafu, FlushFileSnafu, ParquetError, PrepareOutputSnafu,
    WriteSnafu, WriterCreateSnafu,
};
use crate::metrics::events::BytesWritten;

/// A completed partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPartition {
    /// Partition directory.
    pub dir: PathBuf,
    /// The part file inside it.
    pub file: PathBuf,
    pub rows: u64,
    pub bytes: u64,
}

/// Writes RecordBatches into a freshly reset partition directory.
pub struct PartitionWriter {
    dir: PathBuf,
    file: PathBuf,
    writer: ArrowWriter<BufWriter<File>>,
    rows: u64,
}

impl PartitionWriter {
    /// Reset `dir` and open a new part file inside it.
    pub fn create(
        dir: &Path,
        schema: SchemaRef,
        compression: ParquetCompression,
    ) -> Result<Self, ParquetError> {
        reset_dir(dir)?;

        let file = dir.join(part_file_name());
        let handle = File::create(&file).context(CreateFileSnafu { path: &file })?;
        let writer = ArrowWriter::try_new(
            BufWriter::new(handle),
            schema,
            Some(writer_properties(compression)),
        )
        .context(WriterCreateSnafu)?;

        debug!("Opened part file {}", file.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            writer,
            rows: 0,
        })
    }

    /// Write one batch.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<(), ParquetError> {
        self.writer.write(batch).context(WriteSnafu)?;
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    /// Write the footer and flush the part file.
    pub fn finish(self) -> Result<WrittenPartition, ParquetError> {
        let mut buffered = self.writer.into_inner().context(CloseWriterSnafu)?;
        buffered
            .flush()
            .context(FlushFileSnafu { path: &self.file })?;
        let bytes = buffered
            .get_ref()
            .metadata()
            .context(FlushFileSnafu { path: &self.file })?
            .len();

        emit!(BytesWritten { bytes });
        debug!(
            rows = self.rows,
            bytes,
            "Finished part file {}",
            self.file.display()
        );

        Ok(WrittenPartition {
            dir: self.dir,
            file: self.file,
            rows: self.rows,
            bytes,
        })
    }
}

/// Write every batch of `batches` to a new partition at `dir`.
#[cfg(test)]
pub(crate) fn write_partition<'a>(
    dir: &Path,
    schema: SchemaRef,
    compression: ParquetCompression,
    batches: impl IntoIterator<Item = &'a RecordBatch>,
) -> Result<WrittenPartition, ParquetError> {
    let mut writer = PartitionWriter::create(dir, schema, compression)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()
}

/// Remove `dir` and everything under it, then recreate it empty.
pub fn reset_dir(dir: &Path) -> Result<(), ParquetError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => return Err(source).context(PrepareOutputSnafu { path: dir }),
    }
    std::fs::create_dir_all(dir).context(PrepareOutputSnafu { path: dir })
}

fn part_file_name() -> String {
    format!("part-00000-{}.parquet", Uuid::now_v7())
}

/// Writer properties for the configured codec.
pub fn writer_properties(compression: ParquetCompression) -> WriterProperties {
    let codec = match compression {
        ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
        ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        ParquetCompression::Lz4 => Compression::LZ4,
    };

    WriterProperties::builder().set_compression(codec).build()
}
