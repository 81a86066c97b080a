//! Main processing pipeline.
//!
//! A run moves the registry dump through the storage layers in five
//! sequential stages:
//!
//! 1. **Extract**: verify staging archives and unpack them into the raw
//!    directory of their record category.
//! 2. **Curate**: prune stale raw versions, convert each remaining file to a
//!    Parquet partition, then prune stale curated partitions.
//! 3. **Stack**: union the partitions of each stackable category.
//! 4. **Join**: left join establishments with companies, the simples
//!    reference and partners.
//! 5. **Save**: write the joined result as a Parquet snapshot and a Delta
//!    table.
//!
//! Each stage finishes before the next starts. A failure aborts the run and
//! leaves the layers as the completed stages left them.

pub mod convert;
pub mod join;
pub mod stack;

use deltalake::datafusion::dataframe::DataFrame;
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::emit;
use crate::engine::Engine;
use crate::error::{
    ConvertSnafu, ExtractSnafu, FetcherSnafu, JoinSnafu, PipelineError, PruneSnafu, SaveSnafu,
    StackSnafu, TaskJoinSnafu,
};
use crate::layout::Layout;
use crate::metrics::events::{Stage, StageCompleted};
use crate::naming::RecordCategory;
use crate::schema::SchemaRegistry;
use crate::sink::{OutputSummary, ResultWriter};
use crate::source::{ArchiveFetcher, DelimitedReaderConfig, Extractor, HttpFetcher, RawFile};
use crate::version::prune_directory;

use convert::CuratedConverter;
use join::Joiner;
use stack::Stacker;

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub archives_extracted: usize,
    pub archives_refetched: usize,
    pub raw_files_extracted: usize,
    pub stale_paths_removed: usize,
    pub partitions_written: usize,
    pub files_skipped: usize,
    pub rows_curated: u64,
    pub rows_stacked: BTreeMap<RecordCategory, u64>,
    pub rows_written: u64,
}

/// Main processing pipeline.
pub struct Pipeline<F = HttpFetcher> {
    config: Config,
    layout: Layout,
    schemas: SchemaRegistry,
    engine: Engine,
    extractor: Extractor<F>,
    stats: PipelineStats,
}

impl Pipeline<HttpFetcher> {
    /// Create a pipeline from configuration. Corrupted archives are
    /// re-fetched over HTTP when `fetch.enabled` is set.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        let fetcher = if config.fetch.enabled {
            Some(HttpFetcher::new(&config.fetch).context(FetcherSnafu)?)
        } else {
            None
        };
        Ok(Self::with_fetcher(config, fetcher))
    }
}

impl<F: ArchiveFetcher> Pipeline<F> {
    /// Create a pipeline with an explicit fetcher.
    pub fn with_fetcher(config: Config, fetcher: Option<F>) -> Self {
        let layout = Layout::new(&config.layers);
        let schemas = SchemaRegistry::with_overrides(&config.schemas);
        let extractor = Extractor::new(layout.clone(), fetcher);

        Self {
            config,
            layout,
            schemas,
            engine: Engine::new(),
            extractor,
            stats: PipelineStats::default(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Extract every staging archive into the raw layer.
    pub async fn extract_files(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let extracted = self.extractor.extract_all().await.context(ExtractSnafu)?;

        for archive in &extracted {
            self.stats.archives_extracted += 1;
            self.stats.raw_files_extracted += archive.files.len();
            if archive.refetched {
                self.stats.archives_refetched += 1;
            }
        }

        finish_stage(Stage::Extract, start);
        Ok(())
    }

    /// Prune, convert and prune again, for every category.
    pub async fn transform_to_curated(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let converter = CuratedConverter::new(
            self.layout.clone(),
            DelimitedReaderConfig::new(self.config.ingest.batch_size, self.config.ingest.encoding),
            self.config.output.compression,
        );

        for category in RecordCategory::ALL {
            self.curate_category(category, &converter).await?;
        }

        finish_stage(Stage::Curate, start);
        Ok(())
    }

    async fn curate_category(
        &mut self,
        category: RecordCategory,
        converter: &CuratedConverter,
    ) -> Result<(), PipelineError> {
        let marker = self.config.ingest.raw_marker.as_str();

        let raw = prune_directory(&self.layout.raw_dir(category), category, marker)
            .context(PruneSnafu {
                category,
                layer: "raw",
            })?;
        self.stats.stale_paths_removed += raw.stale.len();

        for path in raw.retain {
            let Some(file) = RawFile::new(path, category) else {
                continue;
            };
            let columns = self
                .schemas
                .schema_for(file.name.suffix())
                .map(<[String]>::to_vec);

            let converter = converter.clone();
            let partition =
                tokio::task::spawn_blocking(move || converter.convert(&file, columns.as_deref()))
                    .await
                    .context(TaskJoinSnafu)?
                    .context(ConvertSnafu { category })?;

            match partition {
                Some(partition) => {
                    self.stats.partitions_written += 1;
                    self.stats.rows_curated += partition.rows;
                }
                None => self.stats.files_skipped += 1,
            }
        }

        let curated_dir = self.layout.curated_dir(category);
        if !curated_dir.is_dir() {
            debug!("Nothing curated for {category}, skipping curated prune");
            return Ok(());
        }
        let curated = prune_directory(&curated_dir, category, marker).context(PruneSnafu {
            category,
            layer: "curated",
        })?;
        self.stats.stale_paths_removed += curated.stale.len();
        Ok(())
    }

    /// Stack the curated partitions of the company, establishment and
    /// partner categories.
    pub async fn stack_data(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let stacker = Stacker::new(
            &self.engine,
            &self.layout,
            self.config.output.compression,
        );

        for category in RecordCategory::STACKED {
            let summary = stacker
                .stack(category)
                .await
                .context(StackSnafu { category })?;
            self.stats.rows_stacked.insert(category, summary.rows);
        }

        finish_stage(Stage::Stack, start);
        Ok(())
    }

    /// Plan the join of the stacked datasets.
    pub async fn join_data(&self) -> Result<DataFrame, PipelineError> {
        let start = Instant::now();
        let joiner = Joiner::new(
            &self.engine,
            &self.layout,
            &self.config.output.simples_marker,
        );
        let joined = joiner.join_stacked().await.context(JoinSnafu)?;

        finish_stage(Stage::Join, start);
        Ok(joined)
    }

    /// Write `dataset` under `label` as snapshot and Delta table.
    pub async fn save_results(
        &mut self,
        dataset: DataFrame,
        label: &str,
    ) -> Result<OutputSummary, PipelineError> {
        let start = Instant::now();
        let writer = ResultWriter::new(self.layout.clone(), self.config.output.compression);
        let summary = writer
            .write(dataset, label)
            .await
            .context(SaveSnafu { label })?;
        self.stats.rows_written = summary.rows;

        finish_stage(Stage::Save, start);
        Ok(summary)
    }

    async fn run_stages(&mut self, label: &str) -> Result<(), PipelineError> {
        self.extract_files().await?;
        self.transform_to_curated().await?;
        self.stack_data().await?;
        let joined = self.join_data().await?;
        self.save_results(joined, label).await?;
        Ok(())
    }

    /// Run every stage and write the result under `label`.
    ///
    /// The engine is closed when the run ends, whether or not it succeeded.
    pub async fn run(mut self, label: &str) -> Result<PipelineStats, PipelineError> {
        info!("Starting pipeline run '{label}'");
        let outcome = self.run_stages(label).await;

        let Self { engine, stats, .. } = self;
        engine.close();

        outcome?;
        info!("Pipeline completed: {stats:?}");
        Ok(stats)
    }
}

fn finish_stage(stage: Stage, start: Instant) {
    let duration = start.elapsed();
    info!(
        elapsed_ms = duration.as_millis() as u64,
        "Stage {} finished",
        stage.as_str()
    );
    emit!(StageCompleted { stage, duration });
}

/// Run the pipeline with the given configuration.
///
/// `label` names the outputs; the configured `output.label` is used when
/// it is `None`.
pub async fn run_pipeline(
    config: Config,
    label: Option<&str>,
) -> Result<PipelineStats, PipelineError> {
    let label = label.unwrap_or(&config.output.label).to_string();
    Pipeline::new(config)?.run(&label).await
}
