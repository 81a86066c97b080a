//! Delta Lake table output.
//!
//! Opens (or creates) a local Delta table and replaces its current snapshot
//! with the given batches. Every write is a new table version.

use deltalake::DeltaOps;
use deltalake::DeltaTable;
use deltalake::arrow::datatypes::Schema;
use deltalake::datafusion::logical_expr::LogicalPlan;
use deltalake::kernel::StructType;
use deltalake::operations::create::CreateBuilder;
use deltalake::operations::write::SchemaMode;
use deltalake::protocol::SaveMode;
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::config::ParquetCompression;
use crate::error::{
    CreateTableDirSnafu, DeltaError, DeltaOperationSnafu, SchemaConversionSnafu, StructTypeSnafu,
    TableUrlSnafu,
};
use crate::sink::parquet::writer_properties;

/// Convert an Arrow schema to a Delta schema.
pub fn arrow_schema_to_delta(schema: &Schema) -> Result<StructType, DeltaError> {
    use deltalake::kernel::engine::arrow_conversion::TryIntoKernel;
    use deltalake::kernel::{DataType as DeltaType, StructField};

    let fields: Vec<StructField> = schema
        .fields()
        .iter()
        .map(|field| {
            let delta_type: DeltaType = field
                .data_type()
                .try_into_kernel()
                .context(SchemaConversionSnafu)?;
            Ok(StructField::new(
                field.name(),
                delta_type,
                field.is_nullable(),
            ))
        })
        .collect::<Result<Vec<_>, DeltaError>>()?;

    StructType::try_new(fields).map_err(|e| {
        StructTypeSnafu {
            message: e.to_string(),
        }
        .build()
    })
}

/// URL of a local table directory, creating the directory if needed.
pub fn table_url(path: &Path) -> Result<Url, DeltaError> {
    std::fs::create_dir_all(path).context(CreateTableDirSnafu { path })?;
    let absolute = std::path::absolute(path).context(CreateTableDirSnafu { path })?;
    Url::from_directory_path(&absolute)
        .ok()
        .context(TableUrlSnafu { path })
}

/// Load the table at `path`, or create it with `schema`.
pub async fn load_or_create_table(path: &Path, schema: &Schema) -> Result<DeltaTable, DeltaError> {
    let url = table_url(path)?;

    match deltalake::open_table_with_storage_options(url.clone(), HashMap::new()).await {
        Ok(table) => {
            info!(
                "Loaded existing Delta table at version {}",
                table.version().unwrap_or(-1)
            );
            Ok(table)
        }
        Err(e) => {
            debug!("Delta table at {url} not loadable ({e}), creating");
            let delta_schema = arrow_schema_to_delta(schema)?;

            CreateBuilder::new()
                .with_location(url.as_str())
                .with_columns(delta_schema.fields().cloned())
                .await
                .context(DeltaOperationSnafu)
        }
    }
}

/// Replace the table's current snapshot with the output of `plan`.
///
/// The plan is executed by the write itself and streamed into data files.
/// Returns the table version holding the new snapshot.
pub async fn overwrite_table(
    path: &Path,
    schema: &Schema,
    plan: Arc<LogicalPlan>,
    compression: ParquetCompression,
) -> Result<i64, DeltaError> {
    let table = load_or_create_table(path, schema).await?;

    let table = DeltaOps(table)
        .write(Vec::new())
        .with_input_execution_plan(plan)
        .with_save_mode(SaveMode::Overwrite)
        .with_schema_mode(SchemaMode::Overwrite)
        .with_writer_properties(writer_properties(compression))
        .await
        .context(DeltaOperationSnafu)?;

    let version = table.version().unwrap_or(-1);
    info!("Overwrote Delta table {} at version {version}", path.display());
    Ok(version)
}
