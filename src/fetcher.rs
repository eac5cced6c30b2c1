#![forbid(unsafe_code)]

//! Concurrent paginated metadata fetcher.
//!
//! Pages are requested in waves of `workers` pages on a dedicated thread
//! pool. Each page task returns a [`PageOutcome`]; once the wave has joined,
//! the controller walks the outcomes in page order, filters out ids that are
//! already stored or already seen in this batch, and decides whether another
//! wave is needed. The known-id set is only read while a wave is in flight.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::http::HttpClient;
use crate::origin::Origin;
use crate::record::Record;
use crate::security::Credential;

/// Anything that can return one page of records.
pub trait PageSource: Sync {
    fn first_page(&self) -> u32;
    fn fetch_page(&self, page: u32) -> Result<Vec<Record>>;
}

/// Live page source: an origin adapter speaking through the shared client.
pub struct HttpPageSource<'a> {
    client: &'a HttpClient,
    origin: &'a dyn Origin,
    credential: Option<&'a Credential>,
}

impl<'a> HttpPageSource<'a> {
    pub fn new(client: &'a HttpClient, origin: &'a dyn Origin, credential: Option<&'a Credential>) -> Self {
        Self {
            client,
            origin,
            credential,
        }
    }
}

impl PageSource for HttpPageSource<'_> {
    fn first_page(&self) -> u32 {
        self.origin.first_page()
    }

    fn fetch_page(&self, page: u32) -> Result<Vec<Record>> {
        let request = self.origin.build_request(page);
        let response = self.client.fetch_json(&request, self.credential)?;
        Ok(self.origin.records_from_response(response))
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Number of new records to collect before stopping.
    pub target_count: usize,
    pub workers: usize,
    /// Stop at the first page made only of already-stored ids.
    pub incremental: bool,
    pub max_pages: Option<u32>,
    /// Pause between waves.
    pub page_delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            target_count: 10_000,
            workers: 8,
            incremental: true,
            max_pages: None,
            page_delay: Duration::ZERO,
        }
    }
}

/// Result of one page task.
#[derive(Debug)]
pub enum PageOutcome {
    Records(Vec<Record>),
    Failed(IngestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    /// A page came back empty.
    Exhausted,
    /// A page contained nothing but stored ids.
    CaughtUp,
    /// Every page of a wave failed.
    AllFailed,
    PageLimit,
}

#[derive(Debug)]
pub struct FetchReport {
    /// New, batch-unique records in page order, truncated to the target.
    pub records: Vec<Record>,
    pub pages_requested: u32,
    pub failed_pages: u32,
    pub stop: StopReason,
}

pub struct PageFetcher {
    pool: ThreadPool,
    settings: FetchSettings,
}

impl PageFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        if settings.workers == 0 {
            return Err(IngestError::Config(
                "metadata worker count must be at least 1".to_string(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.workers)
            .thread_name(|index| format!("metadata-{index}"))
            .build()
            .map_err(|err| IngestError::Config(format!("building metadata pool: {err}")))?;
        Ok(Self { pool, settings })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub fn fetch(&self, source: &dyn PageSource, known: &HashSet<String>) -> FetchReport {
        let target = self.settings.target_count;
        let mut records: Vec<Record> = Vec::new();
        let mut batch_ids: HashSet<String> = HashSet::new();
        let mut next_page = source.first_page();
        let mut pages_requested = 0u32;
        let mut failed_pages = 0u32;

        info!(target, workers = self.settings.workers, "fetching metadata pages");

        let stop = 'waves: loop {
            if records.len() >= target {
                break StopReason::TargetReached;
            }
            let remaining = self
                .settings
                .max_pages
                .map_or(u32::MAX, |max| max.saturating_sub(pages_requested));
            let wave_len = (self.settings.workers as u32).min(remaining);
            if wave_len == 0 {
                break StopReason::PageLimit;
            }
            if pages_requested > 0 && !self.settings.page_delay.is_zero() {
                thread::sleep(self.settings.page_delay);
            }

            let pages: Vec<u32> = (next_page..next_page + wave_len).collect();
            let outcomes: Vec<(u32, PageOutcome)> = self.pool.install(|| {
                pages
                    .par_iter()
                    .map(|&page| (page, fetch_one(source, page)))
                    .collect()
            });
            next_page += wave_len;
            pages_requested += wave_len;

            let mut wave_failed = 0u32;
            for (page, outcome) in outcomes {
                let page_records = match outcome {
                    PageOutcome::Records(page_records) => page_records,
                    PageOutcome::Failed(err) => {
                        warn!(page, error = %err, "page failed; contributes no records");
                        wave_failed += 1;
                        continue;
                    }
                };
                if page_records.is_empty() {
                    info!(page, "no more results");
                    failed_pages += wave_failed;
                    break 'waves StopReason::Exhausted;
                }
                if self.settings.incremental
                    && page_records
                        .iter()
                        .all(|record| known.contains(&record.external_id))
                {
                    info!(page, "page holds only stored ids; caught up");
                    failed_pages += wave_failed;
                    break 'waves StopReason::CaughtUp;
                }

                let before = records.len();
                for record in page_records {
                    if known.contains(&record.external_id) {
                        continue;
                    }
                    if batch_ids.insert(record.external_id.clone()) {
                        records.push(record);
                    }
                }
                info!(
                    page,
                    new = records.len() - before,
                    collected = records.len(),
                    "page fetched"
                );
                if records.len() >= target {
                    failed_pages += wave_failed;
                    break 'waves StopReason::TargetReached;
                }
            }

            failed_pages += wave_failed;
            if wave_failed == wave_len {
                warn!(pages = wave_len, "every page in the wave failed; stopping");
                break StopReason::AllFailed;
            }
        };

        records.truncate(target);
        info!(
            collected = records.len(),
            pages_requested,
            failed_pages,
            ?stop,
            "metadata fetch complete"
        );
        FetchReport {
            records,
            pages_requested,
            failed_pages,
            stop,
        }
    }
}

fn fetch_one(source: &dyn PageSource, page: u32) -> PageOutcome {
    match source.fetch_page(page) {
        Ok(records) => PageOutcome::Records(records),
        Err(err) => PageOutcome::Failed(err),
    }
}
