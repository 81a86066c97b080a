//! Staging archive intake.
//!
//! Lists the archives in the staging directory, checks them for
//! corruption (re-fetching a fresh copy when allowed), and extracts each
//! into the raw directory of its record category.

pub mod archive;
pub mod fetch;
pub mod reader;

pub use fetch::{ArchiveFetcher, HttpFetcher};
pub use reader::{DelimitedReader, DelimitedReaderConfig};

use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::emit;
use crate::error::{
    ArchiveError, ArchiveTaskSnafu, ListStagingSnafu, RefetchDisabledSnafu, RefetchSnafu,
};
use crate::layout::Layout;
use crate::metrics::events::ArchiveExtracted;
use crate::naming::{FileName, RecordCategory};

/// An extracted delimited file awaiting conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub path: PathBuf,
    pub category: RecordCategory,
    pub name: FileName,
}

impl RawFile {
    pub fn new(path: PathBuf, category: RecordCategory) -> Option<Self> {
        let name = FileName::from_path(&path)?;
        Some(Self {
            path,
            category,
            name,
        })
    }
}

/// Outcome of extracting one archive.
#[derive(Debug, Clone)]
pub struct ExtractedArchive {
    pub archive: PathBuf,
    pub category: RecordCategory,
    pub files: Vec<PathBuf>,
    /// Whether the archive had to be downloaded again.
    pub refetched: bool,
}

/// Extracts staging archives into the raw layer.
pub struct Extractor<F> {
    layout: Layout,
    fetcher: Option<F>,
}

impl<F: ArchiveFetcher> Extractor<F> {
    /// Create an extractor. Without a fetcher a corrupted archive is fatal.
    pub fn new(layout: Layout, fetcher: Option<F>) -> Self {
        Self { layout, fetcher }
    }

    /// Every `*.zip` in the staging directory, sorted by name.
    pub fn list_archives(&self) -> Result<Vec<PathBuf>, ArchiveError> {
        let staging = self.layout.staging();
        let entries = std::fs::read_dir(staging).context(ListStagingSnafu { path: staging })?;

        let mut archives = Vec::new();
        for entry in entries {
            let path = entry.context(ListStagingSnafu { path: staging })?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "zip") {
                archives.push(path);
            } else {
                debug!("Ignoring non-archive {}", path.display());
            }
        }
        archives.sort();
        Ok(archives)
    }

    /// Verify an archive, replacing it once from the remote source if it is
    /// corrupted. Returns whether a replacement was fetched.
    pub async fn ensure_intact(&self, path: &Path) -> Result<bool, ArchiveError> {
        let first = blocking(path, archive::verify).await?;
        let source = match first {
            Ok(()) => return Ok(false),
            Err(e @ ArchiveError::CorruptArchive { .. }) => e,
            Err(e) => return Err(e),
        };

        let Some(fetcher) = &self.fetcher else {
            warn!("{source}");
            return RefetchDisabledSnafu { path }.fail();
        };

        warn!("{source}, downloading a new copy");
        let name = FileName::from_path(path).unwrap_or_else(|| FileName::parse(""));
        fetcher
            .fetch(name.archive_stem(), path)
            .await
            .context(RefetchSnafu { path })?;

        blocking(path, archive::verify).await??;
        info!("Replacement for {} is intact", path.display());
        Ok(true)
    }

    /// Verify and extract one archive into its category's raw directory.
    pub async fn extract_archive(&self, path: &Path) -> Result<ExtractedArchive, ArchiveError> {
        let refetched = self.ensure_intact(path).await?;

        let name = FileName::from_path(path).unwrap_or_else(|| FileName::parse(""));
        let category = RecordCategory::classify(&name);
        let dest = self.layout.raw_dir(category);

        let files = blocking(path, move |p| archive::extract(p, &dest)).await??;

        info!(
            category = %category,
            files = files.len(),
            "Extracted {}",
            path.display()
        );
        emit!(ArchiveExtracted {
            category,
            entries: files.len() as u64,
        });

        Ok(ExtractedArchive {
            archive: path.to_path_buf(),
            category,
            files,
            refetched,
        })
    }

    /// Extract every staging archive. Archives are processed one at a time.
    pub async fn extract_all(&self) -> Result<Vec<ExtractedArchive>, ArchiveError> {
        let archives = self.list_archives()?;
        info!(
            "Found {} archives in {}",
            archives.len(),
            self.layout.staging().display()
        );

        let mut extracted = Vec::with_capacity(archives.len());
        for path in &archives {
            extracted.push(self.extract_archive(path).await?);
        }
        Ok(extracted)
    }
}

/// Run a synchronous archive operation on the blocking pool.
async fn blocking<T, Op>(path: &Path, op: Op) -> Result<Result<T, ArchiveError>, ArchiveError>
where
    T: Send + 'static,
    Op: FnOnce(&Path) -> Result<T, ArchiveError> + Send + 'static,
{
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || op(&owned))
        .await
        .context(ArchiveTaskSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::archive::tests::write_zip;
    use super::*;
    use crate::config::LayersConfig;
    use crate::error::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fetcher that writes a fixed valid archive.
    struct FixtureFetcher {
        entries: Vec<(&'static str, &'static str)>,
        calls: AtomicUsize,
    }

    impl ArchiveFetcher for FixtureFetcher {
        async fn fetch(&self, _stem: &str, dest: &Path) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            write_zip(dest, &self.entries);
            Ok(())
        }
    }

    /// Fetcher that always returns a broken payload.
    struct BrokenFetcher;

    impl ArchiveFetcher for BrokenFetcher {
        async fn fetch(&self, _stem: &str, dest: &Path) -> Result<(), FetchError> {
            std::fs::write(dest, b"still broken").unwrap();
            Ok(())
        }
    }

    fn layout(temp: &TempDir) -> Layout {
        let root = temp.path().to_str().unwrap();
        let layout = Layout::new(&LayersConfig {
            staging: format!("{root}/staging"),
            raw: format!("{root}/raw"),
            curated: format!("{root}/curated"),
            sandbox: format!("{root}/sandbox"),
            dataset: String::new(),
        });
        std::fs::create_dir_all(layout.staging()).unwrap();
        layout
    }

    #[tokio::test]
    async fn test_extract_routes_by_category() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let staging = layout.staging().to_path_buf();
        write_zip(
            &staging.join("K3241.K03200Y0.D40511.EMPRECSV.zip"),
            &[("K3241.K03200Y0.D40511.EMPRECSV", "1\n")],
        );
        write_zip(
            &staging.join("K3241.K03200Y0.D40511.ESTABELE.zip"),
            &[("K3241.K03200Y0.D40511.ESTABELE", "1\n")],
        );
        write_zip(
            &staging.join("F.K03200$Z.D40511.CNAECSV.zip"),
            &[("F.K03200$Z.D40511.CNAECSV", "1\n")],
        );
        std::fs::write(staging.join("README.txt"), b"ignored").unwrap();

        let extractor = Extractor::<BrokenFetcher>::new(layout.clone(), None);
        let extracted = extractor.extract_all().await.unwrap();
        assert_eq!(extracted.len(), 3);
        assert!(extracted.iter().all(|e| !e.refetched));

        assert!(layout
            .raw_dir(RecordCategory::Company)
            .join("K3241.K03200Y0.D40511.EMPRECSV")
            .is_file());
        assert!(layout
            .raw_dir(RecordCategory::Establishment)
            .join("K3241.K03200Y0.D40511.ESTABELE")
            .is_file());
        assert!(layout
            .raw_dir(RecordCategory::Support)
            .join("F.K03200$Z.D40511.CNAECSV")
            .is_file());
    }

    #[tokio::test]
    async fn test_corrupted_archive_is_refetched_once() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let path = layout.staging().join("K3241.K03200Y2.D40511.SOCIOCSV.zip");
        std::fs::write(&path, b"truncated").unwrap();

        let fetcher = FixtureFetcher {
            entries: vec![("K3241.K03200Y2.D40511.SOCIOCSV", "1;2\n")],
            calls: AtomicUsize::new(0),
        };
        let extractor = Extractor::new(layout.clone(), Some(fetcher));
        let extracted = extractor.extract_archive(&path).await.unwrap();

        assert!(extracted.refetched);
        assert_eq!(extracted.category, RecordCategory::Partner);
        assert_eq!(extractor.fetcher.as_ref().unwrap().calls.load(Ordering::SeqCst), 1);
        assert!(layout
            .raw_dir(RecordCategory::Partner)
            .join("K3241.K03200Y2.D40511.SOCIOCSV")
            .is_file());
    }

    #[tokio::test]
    async fn test_corruption_without_fetcher_is_fatal() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let path = layout.staging().join("a.b.EMPRECSV.zip");
        std::fs::write(&path, b"garbage").unwrap();

        let extractor = Extractor::<BrokenFetcher>::new(layout, None);
        let err = extractor.extract_archive(&path).await.unwrap_err();
        assert!(matches!(err, ArchiveError::RefetchDisabled { .. }));
    }

    #[tokio::test]
    async fn test_still_corrupted_after_refetch() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let path = layout.staging().join("a.b.EMPRECSV.zip");
        std::fs::write(&path, b"garbage").unwrap();

        let extractor = Extractor::new(layout, Some(BrokenFetcher));
        let err = extractor.extract_archive(&path).await.unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptArchive { .. }));
    }

    #[tokio::test]
    async fn test_missing_staging_dir() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(&LayersConfig {
            staging: temp.path().join("nope").to_string_lossy().into_owned(),
            raw: "r".to_string(),
            curated: "c".to_string(),
            sandbox: "s".to_string(),
            dataset: String::new(),
        });
        let extractor = Extractor::<BrokenFetcher>::new(layout, None);
        let err = extractor.extract_all().await.unwrap_err();
        assert!(matches!(err, ArchiveError::ListStaging { .. }));
    }
}
