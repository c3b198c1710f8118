//! Concurrent archive retrieval
//!
//! Every archive and checksum URL flows through one bounded pool; a 404 is
//! a normal terminal outcome (most symbol/month combinations predate the
//! symbol's listing), everything else transient is retried with backoff.
//! Bytes land in a `.part` staging file first so an interrupted download
//! can never be mistaken for a complete one on the next run.

use futures_util::{stream, StreamExt};
use klinesync_config::DataConfig;
use klinesync_core::ArchiveRef;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::store::part_path;

/// Terminal state of one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Bytes written to the deterministic destination
    Saved(PathBuf),
    /// Destination already present and skip-if-present is enabled
    SkippedExisting(PathBuf),
    /// The remote object does not exist
    NotFound,
    /// Retries exhausted
    Failed { url: String, detail: String },
}

/// Aggregate result of one fetch stage run
#[derive(Debug, Default)]
pub struct FetchReport {
    pub saved: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub failed: Vec<(String, String)>,
}

impl FetchReport {
    fn absorb(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Saved(_) => self.saved += 1,
            FetchOutcome::SkippedExisting(_) => self.skipped += 1,
            FetchOutcome::NotFound => self.not_found += 1,
            FetchOutcome::Failed { url, detail } => self.failed.push((url, detail)),
        }
    }
}

/// Downloads the archive and checksum URL set through a bounded worker pool
pub struct Fetcher {
    client: Client,
    concurrency: usize,
    timeout: Duration,
    retry_attempts: usize,
    retry_delay: Duration,
    skip_existing: bool,
}

impl Fetcher {
    pub fn new(config: &DataConfig) -> Self {
        Self {
            client: Client::new(),
            concurrency: config.effective_concurrency(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            skip_existing: config.skip_existing,
        }
    }

    /// Fetch every archive and its checksum sibling in `refs`
    ///
    /// URLs are independent tasks; one item's failure or latency never
    /// blocks siblings beyond the pool width.
    pub async fn fetch_archives(&self, config: &DataConfig, refs: &[ArchiveRef]) -> FetchReport {
        let root = &config.data_root;
        let tasks: Vec<(String, PathBuf)> = refs
            .iter()
            .flat_map(|r| {
                [
                    (r.archive_url(&config.base_url), r.zip_path(root)),
                    (r.checksum_url(&config.base_url), r.checksum_path(root)),
                ]
            })
            .collect();

        info!(
            event_type = "fetch_start",
            urls = tasks.len(),
            pool = self.concurrency,
            "Fetching archive set"
        );

        let outcomes: Vec<FetchOutcome> = stream::iter(tasks)
            .map(|(url, dest)| self.fetch_one(url, dest))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = FetchReport::default();
        for outcome in outcomes {
            report.absorb(outcome);
        }

        info!(
            event_type = "fetch_complete",
            saved = report.saved,
            skipped = report.skipped,
            not_found = report.not_found,
            failed = report.failed.len(),
            "Fetch stage finished"
        );
        report
    }

    /// Fetch one URL to its deterministic destination
    pub async fn fetch_one(&self, url: String, dest: PathBuf) -> FetchOutcome {
        if self.skip_existing && dest.exists() {
            debug!(event_type = "fetch_skip", url = %url, "Destination already present");
            return FetchOutcome::SkippedExisting(dest);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_fetch(&url, &dest).await {
                Ok(Some(path)) => {
                    debug!(event_type = "fetch_saved", url = %url, "Downloaded");
                    return FetchOutcome::Saved(path);
                }
                // Expected absence: terminal, never retried, never an error
                Ok(None) => return FetchOutcome::NotFound,
                Err(detail) => {
                    if attempt > self.retry_attempts {
                        warn!(
                            event_type = "fetch_failed",
                            url = %url,
                            attempts = attempt,
                            detail = %detail,
                            "Retries exhausted"
                        );
                        return FetchOutcome::Failed { url, detail };
                    }
                    debug!(
                        event_type = "fetch_retry",
                        url = %url,
                        attempt = attempt,
                        detail = %detail,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(self.retry_delay * attempt as u32).await;
                }
            }
        }
    }

    async fn try_fetch(&self, url: &str, dest: &Path) -> Result<Option<PathBuf>, String> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let bytes = response.bytes().await.map_err(|e| e.to_string())?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| e.to_string())?;
        }
        let staging = part_path(dest);
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| e.to_string())?;
        tokio::fs::rename(&staging, dest)
            .await
            .map_err(|e| e.to_string())?;

        Ok(Some(dest.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fetcher(skip_existing: bool) -> Fetcher {
        let config = DataConfig {
            skip_existing,
            retry_attempts: 0,
            retry_delay_ms: 1,
            request_timeout_secs: 1,
            ..DataConfig::default()
        };
        Fetcher::new(&config)
    }

    #[tokio::test]
    async fn test_existing_destination_short_circuits() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("BTCUSDT-1m-2020-01.zip");
        std::fs::write(&dest, b"already here").unwrap();

        // The URL is unreachable on purpose; skip-if-present must return
        // before any network activity.
        let outcome = fetcher(true)
            .fetch_one("http://127.0.0.1:1/nope.zip".to_string(), dest.clone())
            .await;

        assert_eq!(outcome, FetchOutcome::SkippedExisting(dest.clone()));
        assert_eq!(std::fs::read(&dest).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_failed_not_panic() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("BTCUSDT-1m-2020-01.zip");

        let outcome = fetcher(false)
            .fetch_one("http://127.0.0.1:1/nope.zip".to_string(), dest.clone())
            .await;

        assert!(matches!(outcome, FetchOutcome::Failed { .. }));
        assert!(!dest.exists());
    }
}
