//! cnpjlake: versioned ingestion of CNPJ bulk-data dumps into Parquet and
//! Delta Lake.
//!
//! This library extracts the registry's zip archives, keeps only the latest
//! published version of each file, converts the `;`-delimited files to
//! Parquet, stacks multi-part datasets and joins them into one denormalized
//! record per establishment.
//!
//! # Example
//!
//! ```ignore
//! use cnpjlake::{Config, run_pipeline, error::{ConfigSnafu, PipelineError}};
//! use snafu::ResultExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml").context(ConfigSnafu)?;
//!     let stats = run_pipeline(config, Some("FINAL")).await?;
//!     println!("Wrote {} rows", stats.rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod naming;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;
pub mod version;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
