#![forbid(unsafe_code)]

//! Harvests one origin: pulls new metadata pages into
//! `{output_dir}/_metadata.json` and downloads every referenced media file
//! that is not on disk yet. Safe to re-run; finished files are skipped.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use moodio_tools::asset_id::AssetNamespace;
use moodio_tools::config::{HarvestOverrides, HarvestSettings, resolve_settings};
use moodio_tools::download::FileNaming;
use moodio_tools::fetcher::{FetchSettings, HttpPageSource};
use moodio_tools::http::{HttpClient, HttpSettings};
use moodio_tools::logging::init_tracing;
use moodio_tools::origin::{Origin, OriginKind};
use moodio_tools::pipeline::{IngestPipeline, PipelineSettings, authorize};
use moodio_tools::security::ensure_not_root;

#[derive(Debug, Parser)]
#[command(name = "harvest", about = "Incrementally harvest metadata and media from a search API")]
struct HarvestArgs {
    /// Origin to harvest: `flim` or `frameset`.
    origin: OriginKind,
    /// Directory for `_metadata.json` and media (default `{origin}_downloads`).
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Number of new records to collect before stopping.
    #[arg(long)]
    target_count: Option<usize>,
    #[arg(long)]
    metadata_workers: Option<usize>,
    #[arg(long)]
    download_workers: Option<usize>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    max_retries: Option<u32>,
    /// Stop after requesting this many pages.
    #[arg(long)]
    max_pages: Option<u32>,
    /// Keep paging past pages made only of stored ids.
    #[arg(long)]
    full: bool,
    /// Only update metadata.
    #[arg(long)]
    skip_downloads: bool,
    /// Store media under `{category}/{shard}/{uuid}.{ext}` instead of by external id.
    #[arg(long)]
    sharded: bool,
    #[arg(long, requires = "sharded")]
    category: Option<String>,
    /// Name hashed into the asset id namespace.
    #[arg(long, requires = "sharded")]
    namespace: Option<String>,
    /// Path of the `.env` file to read.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl HarvestArgs {
    fn overrides(&self) -> HarvestOverrides {
        HarvestOverrides {
            output_dir: self.output_dir.clone(),
            target_count: self.target_count,
            metadata_workers: self.metadata_workers,
            download_workers: self.download_workers,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            env_path: self.env_file.clone(),
        }
    }

    fn naming(&self, origin: &dyn Origin) -> FileNaming {
        if !self.sharded {
            return FileNaming::ExternalId;
        }
        FileNaming::Sharded {
            category: self
                .category
                .clone()
                .unwrap_or_else(|| origin.default_category().to_string()),
            namespace: self
                .namespace
                .as_deref()
                .map(AssetNamespace::from_name)
                .unwrap_or_default(),
        }
    }

    fn pipeline_settings(&self, origin: &dyn Origin, settings: &HarvestSettings) -> PipelineSettings {
        PipelineSettings {
            output_dir: settings.output_dir.clone(),
            fetch: FetchSettings {
                target_count: settings.target_count,
                workers: settings.metadata_workers,
                incremental: !self.full,
                max_pages: self.max_pages,
                ..FetchSettings::default()
            },
            download_workers: settings.download_workers,
            naming: self.naming(origin),
            skip_downloads: self.skip_downloads,
        }
    }
}

fn main() -> Result<()> {
    ensure_not_root("harvest")?;
    let args = HarvestArgs::parse();
    init_tracing("info")?;

    let origin = args.origin.build();
    let settings = resolve_settings(origin.name(), origin.credential_env(), args.overrides())
        .context("resolving configuration")?;
    let credential = authorize(origin.as_ref(), settings.credential.as_deref(), Utc::now())
        .context("checking credential")?;

    let client = HttpClient::new(HttpSettings {
        timeout: settings.timeout,
        max_retries: settings.max_retries,
        ..HttpSettings::default()
    });
    let pipeline_settings = args.pipeline_settings(origin.as_ref(), &settings);

    println!("===================================");
    println!("Media Harvester: {}", origin.name());
    println!("===================================");
    println!("Output directory: {}", settings.output_dir.display());
    println!("Target new records: {}", settings.target_count);
    println!(
        "Workers: {} metadata, {} download",
        settings.metadata_workers, settings.download_workers
    );
    println!(
        "Mode: {}",
        if args.full { "full scan" } else { "incremental" }
    );
    println!();

    let pages = HttpPageSource::new(&client, origin.as_ref(), Some(&credential));
    let pipeline = IngestPipeline::new(origin.as_ref(), Some(&credential), pipeline_settings);
    let summary = pipeline
        .run(&pages, &client)
        .with_context(|| format!("harvesting {}", origin.name()))?;

    println!();
    println!("===================================");
    println!("Harvest complete in {}", summary.elapsed_display());
    println!("===================================");
    println!("Records in store: {} ({} new)", summary.total, summary.added);
    println!("Media records: {}", summary.media);
    println!("Downloaded: {}", summary.downloaded);
    println!("Skipped (already on disk): {}", summary.skipped);
    println!("Failed: {}", summary.failed);
    if summary.failed_pages > 0 {
        println!("Failed pages: {}", summary.failed_pages);
    }

    Ok(())
}
