//! Headerless `;`-delimited text reader.
//!
//! Reads the registry's raw files and converts them to Arrow RecordBatches
//! using a positional column list. Every column is a nullable string; empty
//! fields become nulls.

use deltalake::arrow::array::{ArrayRef, RecordBatch, StringBuilder};
use deltalake::arrow::datatypes::SchemaRef;
use snafu::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Encoding;
use crate::error::{BuildBatchSnafu, ConvertError, FieldCountSnafu, OpenRawSnafu, ParseRecordSnafu};

/// Field delimiter of the raw files.
pub const DELIMITER: u8 = b';';

/// Configuration for the delimited reader.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedReaderConfig {
    /// Number of records per batch.
    pub batch_size: usize,
    /// Text encoding of the input.
    pub encoding: Encoding,
}

impl DelimitedReaderConfig {
    pub fn new(batch_size: usize, encoding: Encoding) -> Self {
        Self {
            batch_size: batch_size.max(1),
            encoding,
        }
    }
}

/// A reader yielding RecordBatches from one raw delimited file.
pub struct DelimitedReader {
    path: PathBuf,
    schema: SchemaRef,
    config: DelimitedReaderConfig,
    reader: csv::Reader<BufReader<File>>,
    record: csv::ByteRecord,
}

impl DelimitedReader {
    /// Open `path` for reading with the given schema.
    pub fn open(
        path: &Path,
        schema: SchemaRef,
        config: DelimitedReaderConfig,
    ) -> Result<Self, ConvertError> {
        let file = File::open(path).context(OpenRawSnafu { path })?;
        let reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .flexible(true)
            .from_reader(BufReader::new(file));

        Ok(Self {
            path: path.to_path_buf(),
            schema,
            config,
            reader,
            record: csv::ByteRecord::new(),
        })
    }

    /// Read up to `batch_size` records. Returns `None` at end of input.
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>, ConvertError> {
        let expected = self.schema.fields().len();
        let mut builders: Vec<StringBuilder> =
            (0..expected).map(|_| StringBuilder::new()).collect();
        let mut rows = 0;

        while rows < self.config.batch_size {
            let more = self
                .reader
                .read_byte_record(&mut self.record)
                .context(ParseRecordSnafu { path: &self.path })?;
            if !more {
                break;
            }

            let found = self.record.len();
            ensure!(
                found == expected,
                FieldCountSnafu {
                    path: &self.path,
                    line: self.record.position().map_or(0, |p| p.line()),
                    expected,
                    found,
                }
            );

            for (builder, field) in builders.iter_mut().zip(self.record.iter()) {
                if field.is_empty() {
                    builder.append_null();
                } else {
                    builder.append_value(decode(field, self.config.encoding));
                }
            }
            rows += 1;
        }

        if rows == 0 {
            return Ok(None);
        }

        let columns: Vec<ArrayRef> = builders
            .into_iter()
            .map(|mut b| Arc::new(b.finish()) as ArrayRef)
            .collect();
        RecordBatch::try_new(Arc::clone(&self.schema), columns)
            .map(Some)
            .context(BuildBatchSnafu)
    }
}

impl Iterator for DelimitedReader {
    type Item = Result<RecordBatch, ConvertError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

/// Decode one raw field. Malformed sequences become U+FFFD.
pub fn decode(bytes: &[u8], encoding: Encoding) -> String {
    let (text, _) = encoding.decoder().decode_without_bom_handling(bytes);
    text.into_owned()
}
