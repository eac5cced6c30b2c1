#![forbid(unsafe_code)]

//! Writes a shell-ready upload plan for a flat directory of media files.
//! Each line copies one file to `s3://{bucket}/{prefix}/{shard}/{name}`,
//! where the shard comes from the md5 of the file name.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use moodio_tools::logging::init_tracing;
use moodio_tools::security::ensure_not_root;
use moodio_tools::upload_plan::{DEFAULT_PLAN_FILE, UploadPlanSettings, write_plan_file};

#[derive(Debug, Parser)]
#[command(name = "upload_plan", about = "Generate sharded copy commands for a media directory")]
struct PlanArgs {
    /// Directory holding the files (not searched recursively).
    source_dir: PathBuf,
    #[arg(long)]
    bucket: String,
    #[arg(long, default_value = "videos")]
    prefix: String,
    #[arg(long, default_value = "mp4")]
    extension: String,
    #[arg(long, default_value = DEFAULT_PLAN_FILE)]
    output: PathBuf,
}

impl PlanArgs {
    fn settings(&self) -> UploadPlanSettings {
        UploadPlanSettings {
            source_dir: self.source_dir.clone(),
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            extension: self.extension.clone(),
        }
    }
}

fn main() -> Result<()> {
    ensure_not_root("upload_plan")?;
    let args = PlanArgs::parse();
    init_tracing("info")?;

    println!("Scanning {}...", args.source_dir.display());
    let count = write_plan_file(&args.settings(), &args.output)
        .with_context(|| format!("generating plan from {}", args.source_dir.display()))?;
    println!(
        "Done: generated plan for {count} files in {}",
        args.output.display()
    );
    Ok(())
}
