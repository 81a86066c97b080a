//! Execution context shared by the stacking, join and output stages.
//!
//! Wraps a DataFusion [`SessionContext`]. The pipeline creates one engine per
//! run, passes it by reference to every component that scans or plans data,
//! and closes it when the run ends.

use deltalake::datafusion::dataframe::DataFrame;
use deltalake::datafusion::error::Result as DataFusionResult;
use deltalake::datafusion::prelude::{ParquetReadOptions, SessionConfig, SessionContext};
use std::path::Path;
use tracing::debug;

/// Handle to the query engine.
#[derive(Clone)]
pub struct Engine {
    ctx: SessionContext,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        // Scan strings as Utf8, not Utf8View
        let config = SessionConfig::new()
            .set_bool("datafusion.execution.parquet.schema_force_view_types", false);
        Self {
            ctx: SessionContext::new_with_config(config),
        }
    }

    /// The underlying session.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Read every Parquet file in a partition directory.
    pub async fn read_parquet(&self, dir: &Path) -> DataFusionResult<DataFrame> {
        self.ctx
            .read_parquet(directory_uri(dir), ParquetReadOptions::default())
            .await
    }

    /// Count the rows of a partition directory.
    pub async fn count_parquet(&self, dir: &Path) -> DataFusionResult<usize> {
        self.read_parquet(dir).await?.count().await
    }

    /// Release the session. Registered state and cached plans are dropped.
    pub fn close(self) {
        debug!(session = %self.ctx.session_id(), "Closing engine");
    }
}

/// Directory path with a trailing separator, so the listing treats it as a
/// prefix rather than a single object.
fn directory_uri(dir: &Path) -> String {
    let mut uri = dir.to_string_lossy().into_owned();
    if !uri.ends_with(std::path::MAIN_SEPARATOR) {
        uri.push(std::path::MAIN_SEPARATOR);
    }
    uri
}
