#![forbid(unsafe_code)]

//! Parallel media downloader with existence-based resume.
//!
//! A file already present at the target path (whatever its size) means the
//! record is done. Payloads are streamed into a `.part` sibling and renamed
//! into place only once at least one byte has been written, so a failed
//! download never leaves a file that would be mistaken for a finished one.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info};

use crate::asset_id::AssetNamespace;
use crate::error::{IngestError, Result};
use crate::http::{HttpClient, MediaResponse};
use crate::origin::{MediaCandidate, MediaPlan};

/// Smallest declared content length accepted while probing.
pub const MIN_PROBE_BYTES: u64 = 100;
const PLAUSIBLE_CONTENT_TYPES: [&str; 5] = ["video", "image", "gif", "octet-stream", "binary"];

/// Anything that can open a media URL for reading.
pub trait MediaSource: Sync {
    fn open(&self, url: &str, headers: &[(String, String)]) -> Result<MediaResponse>;
}

impl MediaSource for HttpClient {
    fn open(&self, url: &str, headers: &[(String, String)]) -> Result<MediaResponse> {
        self.get_media(url, headers)
    }
}

/// Where a record's file lands inside the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNaming {
    /// `{external_id}.{ext}` directly in the output directory.
    ExternalId,
    /// `{category}/{shard}/{uuid}.{ext}` from the derived asset id.
    Sharded {
        category: String,
        namespace: AssetNamespace,
    },
}

impl FileNaming {
    pub fn relative_path(&self, external_id: &str, extension: &str) -> Result<PathBuf> {
        match self {
            FileNaming::ExternalId => {
                if external_id.trim().is_empty()
                    || external_id.contains(['/', '\\'])
                    || external_id == ".."
                {
                    return Err(IngestError::InvalidInput(format!(
                        "external id {external_id:?} is not usable as a file name"
                    )));
                }
                Ok(PathBuf::from(format!(
                    "{external_id}.{}",
                    extension.trim_start_matches('.')
                )))
            }
            FileNaming::Sharded {
                category,
                namespace,
            } => Ok(PathBuf::from(namespace.derive_path(
                external_id,
                category,
                extension,
            )?)),
        }
    }
}

/// One record's worth of download work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub external_id: String,
    pub plan: MediaPlan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    /// A file already exists at the target path.
    Skipped { path: PathBuf },
    Failed { external_id: String, reason: String },
    /// No usable target path; nothing was requested.
    Rejected { external_id: String, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total: usize,
    /// Jobs for which at least one request was made.
    pub attempted: usize,
    pub downloaded: usize,
    pub skipped: usize,
    /// Failed jobs, rejected ones included.
    pub failed: usize,
    pub rejected: usize,
    pub bytes: u64,
}

impl DownloadSummary {
    fn record(&mut self, outcome: &DownloadOutcome) {
        self.total += 1;
        match outcome {
            DownloadOutcome::Downloaded { bytes, .. } => {
                self.attempted += 1;
                self.downloaded += 1;
                self.bytes += bytes;
            }
            DownloadOutcome::Skipped { .. } => self.skipped += 1,
            DownloadOutcome::Failed { .. } => {
                self.attempted += 1;
                self.failed += 1;
            }
            DownloadOutcome::Rejected { .. } => {
                self.rejected += 1;
                self.failed += 1;
            }
        }
    }
}

pub struct Downloader {
    pool: ThreadPool,
    workers: usize,
    output_dir: PathBuf,
    naming: FileNaming,
    headers: Vec<(String, String)>,
}

impl Downloader {
    pub fn new(workers: usize, output_dir: impl Into<PathBuf>, naming: FileNaming) -> Result<Self> {
        if workers == 0 {
            return Err(IngestError::Config(
                "download worker count must be at least 1".to_string(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("download-{index}"))
            .build()
            .map_err(|err| IngestError::Config(format!("building download pool: {err}")))?;
        Ok(Self {
            pool,
            workers,
            output_dir: output_dir.into(),
            naming,
            headers: Vec::new(),
        })
    }

    /// Headers attached to every media request.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn target_path(&self, external_id: &str, extension: &str) -> Result<PathBuf> {
        Ok(self
            .output_dir
            .join(self.naming.relative_path(external_id, extension)?))
    }

    /// Runs every job on the download pool and blocks until all finish.
    pub fn run(&self, source: &dyn MediaSource, jobs: &[DownloadJob]) -> DownloadSummary {
        let total = jobs.len();
        info!(total, workers = self.workers, "downloading media");

        let outcomes: Vec<DownloadOutcome> = self.pool.install(|| {
            jobs.par_iter()
                .enumerate()
                .map(|(index, job)| self.download_one(source, job, index + 1, total))
                .collect()
        });

        let mut summary = DownloadSummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }
        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            bytes = summary.bytes,
            "downloads complete"
        );
        summary
    }

    fn download_one(
        &self,
        source: &dyn MediaSource,
        job: &DownloadJob,
        index: usize,
        total: usize,
    ) -> DownloadOutcome {
        let id = job.external_id.as_str();
        let candidates = job.plan.candidates();

        let mut targets = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.target_path(id, &candidate.extension) {
                Ok(path) => targets.push(path),
                Err(err) => {
                    let reason = err.to_string();
                    error!(index, total, external_id = id, %reason, "no usable target path");
                    return DownloadOutcome::Rejected {
                        external_id: id.to_string(),
                        reason,
                    };
                }
            }
        }
        if let Some(existing) = targets.iter().find(|path| path.exists()) {
            info!(index, total, path = %existing.display(), "skipping (exists)");
            return DownloadOutcome::Skipped {
                path: existing.clone(),
            };
        }

        let mut last_reason = String::from("no media candidates");
        for (candidate, target) in candidates.iter().zip(&targets) {
            match self.try_candidate(source, candidate, target, job.plan.is_probe()) {
                Ok(bytes) => {
                    info!(index, total, path = %target.display(), bytes, "downloaded");
                    return DownloadOutcome::Downloaded {
                        path: target.clone(),
                        bytes,
                    };
                }
                Err(reason) => {
                    debug!(index, total, url = %candidate.url, %reason, "candidate rejected");
                    last_reason = reason;
                }
            }
        }
        let reason = if job.plan.is_probe() {
            format!("no candidate extension succeeded (last: {last_reason})")
        } else {
            last_reason
        };
        failed(id, index, total, reason)
    }

    fn try_candidate(
        &self,
        source: &dyn MediaSource,
        candidate: &MediaCandidate,
        target: &Path,
        probing: bool,
    ) -> std::result::Result<u64, String> {
        let mut response = source
            .open(&candidate.url, &self.headers)
            .map_err(|err| err.to_string())?;
        if response.status != 200 {
            return Err(format!("status {}", response.status));
        }
        if probing {
            check_plausible(&response)?;
        }
        let bytes = write_atomically(&mut response.body, target).map_err(|err| err.to_string())?;
        if bytes == 0 {
            return Err("empty body".to_string());
        }
        Ok(bytes)
    }
}

fn failed(id: &str, index: usize, total: usize, reason: String) -> DownloadOutcome {
    error!(index, total, external_id = id, %reason, "download failed");
    DownloadOutcome::Failed {
        external_id: id.to_string(),
        reason,
    }
}

/// Rejects responses that are obviously not media: tiny declared bodies or
/// a content type outside the accepted families. A missing type is allowed.
fn check_plausible(response: &MediaResponse) -> std::result::Result<(), String> {
    if let Some(length) = response.content_length
        && length < MIN_PROBE_BYTES
    {
        return Err(format!("content length {length} too small"));
    }
    match response.content_type.as_deref() {
        None | Some("") => Ok(()),
        Some(content_type)
            if PLAUSIBLE_CONTENT_TYPES
                .iter()
                .any(|family| content_type.contains(family)) =>
        {
            Ok(())
        }
        Some(content_type) => Err(format!("unexpected content type {content_type}")),
    }
}

/// Streams `body` into `{target}.part`, then renames it over `target`.
/// Returns the number of bytes written; an empty body leaves nothing behind.
fn write_atomically(body: &mut dyn io::Read, target: &Path) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut part_name = target.as_os_str().to_owned();
    part_name.push(".part");
    let part = PathBuf::from(part_name);

    let result = (|| -> io::Result<u64> {
        let mut writer = BufWriter::with_capacity(32 * 1024, File::create(&part)?);
        let bytes = io::copy(body, &mut writer)?;
        writer.flush()?;
        Ok(bytes)
    })();

    match result {
        Ok(0) => {
            let _ = fs::remove_file(&part);
            Ok(0)
        }
        Ok(bytes) => {
            fs::rename(&part, target)?;
            Ok(bytes)
        }
        Err(err) => {
            let _ = fs::remove_file(&part);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct Canned {
        status: u16,
        content_type: Option<&'static str>,
        content_length: Option<u64>,
        body: Vec<u8>,
    }

    /// In-memory CDN keyed by URL; unknown URLs answer 404.
    #[derive(Default)]
    struct MockCdn {
        responses: HashMap<String, Canned>,
        calls: Mutex<Vec<String>>,
    }

    impl MockCdn {
        fn serve(&mut self, url: &str, content_type: Option<&'static str>, body: &[u8]) {
            self.responses.insert(
                url.to_string(),
                Canned {
                    status: 200,
                    content_type,
                    content_length: Some(body.len() as u64),
                    body: body.to_vec(),
                },
            );
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl MediaSource for MockCdn {
        fn open(&self, url: &str, _headers: &[(String, String)]) -> Result<MediaResponse> {
            self.calls.lock().unwrap().push(url.to_string());
            let Some(canned) = self.responses.get(url) else {
                return Err(IngestError::transient(url, "status 404"));
            };
            Ok(MediaResponse {
                status: canned.status,
                content_type: canned.content_type.map(str::to_string),
                content_length: canned.content_length,
                body: Box::new(Cursor::new(canned.body.clone())),
            })
        }
    }

    fn direct(id: &str) -> DownloadJob {
        DownloadJob {
            external_id: id.to_string(),
            plan: MediaPlan::Direct(MediaCandidate::new(format!("https://cdn/{id}.mp4"), "mp4")),
        }
    }

    fn probe(id: &str, exts: &[&str]) -> DownloadJob {
        DownloadJob {
            external_id: id.to_string(),
            plan: MediaPlan::Probe(
                exts.iter()
                    .map(|ext| MediaCandidate::new(format!("https://cdn/{id}_fs.{ext}"), *ext))
                    .collect(),
            ),
        }
    }

    #[test]
    fn resume_only_fetches_missing_files() {
        let dir = tempdir().unwrap();
        let mut cdn = MockCdn::default();
        let jobs: Vec<DownloadJob> = (0..10).map(|n| direct(&format!("clip{n}"))).collect();
        for job in &jobs {
            cdn.serve(&job.plan.candidates()[0].url, Some("video/mp4"), b"bytes");
        }
        // Existing files count as done regardless of size.
        for n in [1, 4, 7] {
            fs::write(dir.path().join(format!("clip{n}.mp4")), b"").unwrap();
        }

        let downloader = Downloader::new(4, dir.path(), FileNaming::ExternalId).unwrap();
        let summary = downloader.run(&cdn, &jobs);

        assert_eq!(cdn.calls().len(), 10 - 3);
        assert_eq!(summary.attempted, 7);
        assert_eq!(summary.downloaded, 7);
        assert_eq!(summary.skipped, 3);
        assert_eq!(fs::read(dir.path().join("clip0.mp4")).unwrap(), b"bytes");
        assert!(fs::read(dir.path().join("clip1.mp4")).unwrap().is_empty());
    }

    #[test]
    fn second_run_downloads_nothing() {
        let dir = tempdir().unwrap();
        let mut cdn = MockCdn::default();
        let jobs = vec![direct("a"), direct("b")];
        cdn.serve("https://cdn/a.mp4", None, b"aaaa");
        cdn.serve("https://cdn/b.mp4", None, b"bbbb");
        let downloader = Downloader::new(2, dir.path(), FileNaming::ExternalId).unwrap();
        downloader.run(&cdn, &jobs);
        let again = downloader.run(&cdn, &jobs);
        assert_eq!(again.skipped, 2);
        assert_eq!(cdn.calls().len(), 2);
    }

    #[test]
    fn failures_leave_no_file_behind() {
        let dir = tempdir().unwrap();
        let mut cdn = MockCdn::default();
        cdn.serve("https://cdn/empty.mp4", Some("video/mp4"), b"");
        let downloader = Downloader::new(2, dir.path(), FileNaming::ExternalId).unwrap();
        let summary = downloader.run(&cdn, &[direct("empty"), direct("missing")]);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.attempted, 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn probing_takes_first_plausible_extension() {
        let dir = tempdir().unwrap();
        let mut cdn = MockCdn::default();
        cdn.serve("https://cdn/m1_fs.gif", Some("text/html"), &[b'x'; 500]);
        cdn.serve("https://cdn/m1_fs.mp4", Some("video/mp4"), &[b'v'; 500]);
        let downloader = Downloader::new(1, dir.path(), FileNaming::ExternalId).unwrap();
        let summary = downloader.run(&cdn, &[probe("m1", &["gif", "mp4"])]);
        assert_eq!(summary.downloaded, 1);
        assert!(dir.path().join("m1.mp4").exists());
        assert!(!dir.path().join("m1.gif").exists());
    }

    #[test]
    fn probing_rejects_tiny_payloads() {
        let dir = tempdir().unwrap();
        let mut cdn = MockCdn::default();
        cdn.serve("https://cdn/s1_fs.jpg", Some("image/jpeg"), &[1u8; 20]);
        cdn.serve("https://cdn/s1_fs.png", None, &[2u8; 200]);
        let downloader = Downloader::new(1, dir.path(), FileNaming::ExternalId).unwrap();
        let summary = downloader.run(&cdn, &[probe("s1", &["jpg", "jpeg", "png"])]);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(
            cdn.calls(),
            vec![
                "https://cdn/s1_fs.jpg".to_string(),
                "https://cdn/s1_fs.jpeg".to_string(),
                "https://cdn/s1_fs.png".to_string()
            ]
        );
        assert_eq!(fs::read(dir.path().join("s1.png")).unwrap().len(), 200);
    }

    #[test]
    fn probing_skips_when_any_candidate_exists() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("m2.mp4"), b"done").unwrap();
        let cdn = MockCdn::default();
        let downloader = Downloader::new(1, dir.path(), FileNaming::ExternalId).unwrap();
        let summary = downloader.run(&cdn, &[probe("m2", &["gif", "mp4"])]);
        assert_eq!(summary.skipped, 1);
        assert!(cdn.calls().is_empty());
    }

    #[test]
    fn probing_exhaustion_is_a_failure() {
        let dir = tempdir().unwrap();
        let cdn = MockCdn::default();
        let downloader = Downloader::new(1, dir.path(), FileNaming::ExternalId).unwrap();
        let summary = downloader.run(&cdn, &[probe("gone", &["gif", "mp4"])]);
        assert_eq!(summary.failed, 1);
        assert_eq!(cdn.calls().len(), 2);
    }

    #[test]
    fn sharded_naming_uses_derived_paths() {
        let dir = tempdir().unwrap();
        let mut cdn = MockCdn::default();
        cdn.serve("https://cdn/TSdwYwc6MkoRxpwhHRvY.mp4", Some("video/mp4"), b"v");
        let naming = FileNaming::Sharded {
            category: "videos".to_string(),
            namespace: AssetNamespace::default(),
        };
        let downloader = Downloader::new(1, dir.path(), naming).unwrap();
        downloader.run(&cdn, &[direct("TSdwYwc6MkoRxpwhHRvY")]);
        assert!(
            dir.path()
                .join("videos/ec/ecfd1643-6360-5cf3-a976-d8d99030eb02.mp4")
                .exists()
        );
    }

    #[test]
    fn unusable_ids_are_rejected_without_requests() {
        let dir = tempdir().unwrap();
        let mut cdn = MockCdn::default();
        cdn.serve("https://cdn/ok.mp4", None, b"fine");
        let jobs = vec![
            direct("ok"),
            DownloadJob {
                external_id: "../escape".to_string(),
                plan: MediaPlan::Direct(MediaCandidate::new("https://cdn/escape.mp4", "mp4")),
            },
        ];
        let downloader = Downloader::new(2, dir.path(), FileNaming::ExternalId).unwrap();
        let summary = downloader.run(&cdn, &jobs);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(cdn.calls(), vec!["https://cdn/ok.mp4".to_string()]);
    }

    #[test]
    fn external_id_naming_rejects_path_separators() {
        assert!(FileNaming::ExternalId.relative_path("../etc", "mp4").is_err());
        assert!(FileNaming::ExternalId.relative_path("", "mp4").is_err());
        assert_eq!(
            FileNaming::ExternalId.relative_path("abc", ".mp4").unwrap(),
            PathBuf::from("abc.mp4")
        );
    }

    #[test]
    fn plausibility_accepts_known_families() {
        let response = |content_type: Option<&str>, length: Option<u64>| MediaResponse {
            status: 200,
            content_type: content_type.map(str::to_string),
            content_length: length,
            body: Box::new(Cursor::new(Vec::new())),
        };
        assert!(check_plausible(&response(Some("image/gif"), Some(1000))).is_ok());
        assert!(check_plausible(&response(Some("application/octet-stream"), None)).is_ok());
        assert!(check_plausible(&response(None, None)).is_ok());
        assert!(check_plausible(&response(Some("application/json"), Some(1000))).is_err());
        assert!(check_plausible(&response(Some("video/mp4"), Some(99))).is_err());
    }
}
