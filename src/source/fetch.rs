//! Remote download of replacement archives.
//!
//! A corrupted staging archive is replaced by a fresh copy fetched from the
//! publisher. The fetcher is a trait so the extraction stage can be driven
//! without network access.

use snafu::prelude::*;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::FetchConfig;
use crate::emit;
use crate::error::{
    ClientBuildSnafu, FetchError, FetchPersistSnafu, FetchRequestSnafu, FetchStatusSnafu,
};
use crate::metrics::events::{ArchiveFetched, FetchStatus};

/// Downloads an archive by name and stores it at a local path.
pub trait ArchiveFetcher {
    /// Fetch `<stem>.zip` and overwrite `dest` with it.
    fn fetch(&self, stem: &str, dest: &Path) -> impl Future<Output = Result<(), FetchError>>;
}

/// HTTP fetcher with bounded retries and exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    max_attempts: u32,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            max_attempts: config.max_attempts.max(1),
        })
    }

    /// Remote location of an archive.
    pub fn archive_url(&self, stem: &str) -> String {
        archive_url(&self.base_url, stem)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context(FetchRequestSnafu { url })?;

        let status = response.status();
        ensure!(
            status.is_success(),
            FetchStatusSnafu {
                url,
                status: status.as_u16(),
            }
        );

        let bytes = response.bytes().await.context(FetchRequestSnafu { url })?;
        Ok(bytes.to_vec())
    }

    async fn download_with_retry(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 1;
        loop {
            match self.download(url).await {
                Ok(bytes) => {
                    emit!(ArchiveFetched {
                        status: FetchStatus::Success
                    });
                    return Ok(bytes);
                }
                Err(e) if attempt < self.max_attempts => {
                    emit!(ArchiveFetched {
                        status: FetchStatus::Retry
                    });
                    let delay = backoff(attempt);
                    warn!(
                        "Download attempt {attempt}/{} of {url} failed: {e}, retrying in {}s",
                        self.max_attempts,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    emit!(ArchiveFetched {
                        status: FetchStatus::Failed
                    });
                    return Err(e);
                }
            }
        }
    }
}

/// Longest wait between download attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Delay before retrying after failed attempt `attempt`: 2^attempt seconds,
/// capped at [`MAX_BACKOFF`].
fn backoff(attempt: u32) -> Duration {
    2u64.checked_pow(attempt)
        .map(Duration::from_secs)
        .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
}

impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, stem: &str, dest: &Path) -> Result<(), FetchError> {
        let url = self.archive_url(stem);
        info!("Downloading replacement for {stem} from {url}");

        let bytes = self.download_with_retry(&url).await?;
        tokio::fs::write(dest, &bytes)
            .await
            .context(FetchPersistSnafu { path: dest })?;

        info!(bytes = bytes.len(), "Replaced {}", dest.display());
        Ok(())
    }
}

/// `<base_url>/<stem>.zip`, tolerating a base with or without trailing slash.
pub fn archive_url(base_url: &str, stem: &str) -> String {
    format!("{}/{stem}.zip", base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_url() {
        assert_eq!(
            archive_url("http://200.152.38.155/CNPJ/", "K3241.K03200Y0.D40511.EMPRECSV"),
            "http://200.152.38.155/CNPJ/K3241.K03200Y0.D40511.EMPRECSV.zip"
        );
        assert_eq!(archive_url("http://host/x", "a.b"), "http://host/x/a.b.zip");
    }

    #[test]
    fn test_fetcher_from_default_config() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        assert_eq!(fetcher.max_attempts, 3);
        assert_eq!(
            fetcher.archive_url("F.K03200$Z.D40511.CNAECSV"),
            "http://200.152.38.155/CNPJ/F.K03200$Z.D40511.CNAECSV.zip"
        );
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(9), MAX_BACKOFF);
        assert_eq!(backoff(64), MAX_BACKOFF);
        assert_eq!(backoff(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let config = FetchConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert_eq!(fetcher.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails() {
        let config = FetchConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            max_attempts: 1,
            timeout_secs: 2,
            ..Default::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        let temp = tempfile::TempDir::new().unwrap();
        let dest = temp.path().join("x.zip");

        let err = fetcher.fetch("x", &dest).await.unwrap_err();
        assert!(matches!(err, FetchError::FetchRequest { .. }));
        assert!(!dest.exists());
    }
}
