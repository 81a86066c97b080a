//! Directory conventions of the staging, raw, curated and sandbox layers.

use std::path::{Path, PathBuf};

use crate::config::LayersConfig;
use crate::naming::RecordCategory;

/// Prefix of the final dataset name.
const RESULT_PREFIX: &str = "ESTABELECIMENTOS_EMPRESAS";

/// Resolved layer paths for one registry dataset.
#[derive(Debug, Clone)]
pub struct Layout {
    staging: PathBuf,
    raw: PathBuf,
    curated: PathBuf,
    sandbox: PathBuf,
    sandbox_root: PathBuf,
}

impl Layout {
    pub fn new(layers: &LayersConfig) -> Self {
        let dataset = Path::new(&layers.dataset);
        Self {
            staging: Path::new(&layers.staging).join(dataset),
            raw: Path::new(&layers.raw).join(dataset),
            curated: Path::new(&layers.curated).join(dataset),
            sandbox: Path::new(&layers.sandbox).join(dataset),
            sandbox_root: PathBuf::from(&layers.sandbox),
        }
    }

    /// Directory holding the downloaded archives.
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Raw directory of a category.
    pub fn raw_dir(&self, category: RecordCategory) -> PathBuf {
        self.raw.join(category.dir_name())
    }

    /// Curated directory of a category.
    pub fn curated_dir(&self, category: RecordCategory) -> PathBuf {
        self.curated.join(category.dir_name())
    }

    /// Curated partition for a raw file basename.
    pub fn curated_partition(&self, category: RecordCategory, basename: &str) -> PathBuf {
        self.curated_dir(category).join(basename)
    }

    /// Temporary stacked dataset of a category.
    pub fn stacked(&self, category: RecordCategory) -> PathBuf {
        self.sandbox
            .join(format!("{}_EMPILHADO_temp.parquet", category.dir_name()))
    }

    /// Parquet snapshot of the joined result.
    pub fn snapshot(&self, label: &str) -> PathBuf {
        self.sandbox.join(format!("{RESULT_PREFIX}_{label}"))
    }

    /// Delta table of the joined result. Lives under the sandbox root,
    /// outside the dataset directory.
    pub fn delta_table(&self, label: &str) -> PathBuf {
        self.sandbox_root
            .join("Delta")
            .join(format!("{RESULT_PREFIX}_{label}.delta"))
    }
}
