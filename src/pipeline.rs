#![forbid(unsafe_code)]

//! One ingest run: authorize, fetch new metadata, merge it into the store,
//! then download every media file the store references that is not on disk.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::download::{DownloadJob, DownloadSummary, Downloader, FileNaming, MediaSource};
use crate::error::{IngestError, Result};
use crate::fetcher::{FetchSettings, PageFetcher, PageSource, StopReason};
use crate::metadata::{METADATA_FILE, MetadataStore};
use crate::origin::Origin;
use crate::record::Record;
use crate::security::{AuthStatus, Credential};

/// Parses the raw credential and rejects it when missing or expired.
/// Credentials whose expiry cannot be read are accepted with a warning.
pub fn authorize(origin: &dyn Origin, raw: Option<&str>, now: DateTime<Utc>) -> Result<Credential> {
    let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
        return Err(IngestError::auth(
            origin.name(),
            format!("{} is not set", origin.credential_env()),
        ));
    };
    let credential = origin.parse_credential(raw)?;
    match origin.check_auth_expiry(&credential, now) {
        AuthStatus::Valid { remaining } => {
            info!(
                origin = origin.name(),
                hours = remaining.num_hours(),
                minutes = remaining.num_minutes() % 60,
                "credential valid"
            );
        }
        AuthStatus::Unknown => {
            warn!(origin = origin.name(), "could not read credential expiry; continuing");
        }
        AuthStatus::Expired => {
            return Err(IngestError::auth(
                origin.name(),
                format!("credential in {} has expired", origin.credential_env()),
            ));
        }
    }
    Ok(credential)
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub fetch: FetchSettings,
    pub download_workers: usize,
    pub naming: FileNaming,
    pub skip_downloads: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Records in the store after the merge.
    pub total: usize,
    pub added: usize,
    /// Media-bearing records in the store.
    pub media: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pages_requested: u32,
    pub failed_pages: u32,
    pub stop: StopReason,
    pub elapsed: Duration,
}

impl IngestSummary {
    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed)
    }
}

/// `{minutes}m {seconds}s`, seconds truncated.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

pub struct IngestPipeline<'a> {
    origin: &'a dyn Origin,
    credential: Option<&'a Credential>,
    settings: PipelineSettings,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(
        origin: &'a dyn Origin,
        credential: Option<&'a Credential>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            origin,
            credential,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn run(&self, pages: &dyn PageSource, media: &dyn MediaSource) -> Result<IngestSummary> {
        let started = Instant::now();
        let output_dir = &self.settings.output_dir;
        fs::create_dir_all(output_dir)?;

        let mut store = MetadataStore::load(output_dir.join(METADATA_FILE), self.origin);
        info!(
            origin = self.origin.name(),
            stored = store.len(),
            path = %store.path().display(),
            "metadata store loaded"
        );

        let fetcher = PageFetcher::new(self.settings.fetch.clone())?;
        let report = fetcher.fetch(pages, &store.known_ids());
        let merge = store.merge(report.records);
        if merge.added > 0 {
            store.save()?;
            info!(added = merge.added, total = merge.total, "metadata store saved");
        } else {
            info!(total = merge.total, "no new records; store left untouched");
        }

        let jobs = self.download_jobs(store.records());
        let downloads = if self.settings.skip_downloads {
            info!(media = jobs.len(), "downloads skipped");
            DownloadSummary::default()
        } else if jobs.is_empty() {
            DownloadSummary::default()
        } else {
            Downloader::new(
                self.settings.download_workers,
                output_dir.clone(),
                self.settings.naming.clone(),
            )?
            .with_headers(self.media_headers())
            .run(media, &jobs)
        };

        let summary = IngestSummary {
            total: merge.total,
            added: merge.added,
            media: jobs.len(),
            downloaded: downloads.downloaded,
            skipped: downloads.skipped,
            failed: downloads.failed,
            pages_requested: report.pages_requested,
            failed_pages: report.failed_pages,
            stop: report.stop,
            elapsed: started.elapsed(),
        };
        info!(
            total = summary.total,
            added = summary.added,
            media = summary.media,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed = %summary.elapsed_display(),
            "ingest run complete"
        );
        Ok(summary)
    }

    /// One job per media-bearing record, in store order.
    pub fn download_jobs(&self, records: &[Record]) -> Vec<DownloadJob> {
        records
            .iter()
            .filter_map(|record| {
                self.origin.media_plan(record).map(|plan| DownloadJob {
                    external_id: record.external_id.clone(),
                    plan,
                })
            })
            .collect()
    }

    fn media_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.origin.media_headers();
        if self.origin.media_needs_credential()
            && let Some((name, value)) = self.credential.and_then(Credential::header)
        {
            headers.push((name.to_string(), value));
        }
        headers
    }
}
