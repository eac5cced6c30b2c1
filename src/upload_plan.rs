#![forbid(unsafe_code)]

//! Upload plan generation: one `cp` command per media file, spread over
//! 256 bucket shards by the md5 of the file name.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tempfile::NamedTempFile;
use tracing::info;
use walkdir::WalkDir;

use crate::error::{IngestError, Result};

pub const DEFAULT_PLAN_FILE: &str = "s3_upload_plan.txt";
const PROGRESS_EVERY: usize = 50_000;

#[derive(Debug, Clone)]
pub struct UploadPlanSettings {
    pub source_dir: PathBuf,
    pub bucket: String,
    pub prefix: String,
    /// Extension (without dot) of the files to include.
    pub extension: String,
}

/// First two hex digits of `md5(file_name)`.
pub fn shard_for(file_name: &str) -> String {
    let digest = Md5::digest(file_name.as_bytes());
    format!("{:02x}", digest[0])
}

pub fn plan_line(path: &Path, file_name: &str, bucket: &str, prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let shard = shard_for(file_name);
    if prefix.is_empty() {
        format!("cp {} s3://{bucket}/{shard}/{file_name}", path.display())
    } else {
        format!(
            "cp {} s3://{bucket}/{prefix}/{shard}/{file_name}",
            path.display()
        )
    }
}

/// Writes one line per matching file directly inside `source_dir` (no
/// recursion), sorted by file name. Returns the number of lines written.
pub fn write_plan(settings: &UploadPlanSettings, output: &mut dyn Write) -> Result<usize> {
    let source = &settings.source_dir;
    if !source.is_dir() {
        return Err(IngestError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory {} not found", source.display()),
        )));
    }
    let suffix = format!(".{}", settings.extension.trim_start_matches('.'));
    info!(source = %source.display(), "scanning for {suffix} files");

    let mut count = 0usize;
    for entry in WalkDir::new(source)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if !file_name.ends_with(&suffix) {
            continue;
        }
        writeln!(
            output,
            "{}",
            plan_line(entry.path(), file_name, &settings.bucket, &settings.prefix)
        )?;
        count += 1;
        if count % PROGRESS_EVERY == 0 {
            info!(count, "files planned so far");
        }
    }
    output.flush()?;
    Ok(count)
}

/// Generates the plan into `path`, replacing it atomically.
pub fn write_plan_file(settings: &UploadPlanSettings, path: &Path) -> Result<usize> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;
    let tmp = NamedTempFile::new_in(&dir)?;
    let count = {
        let mut writer = BufWriter::new(tmp.as_file());
        write_plan(settings, &mut writer)?
    };
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    info!(count, plan = %path.display(), "upload plan written");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings(source: &Path) -> UploadPlanSettings {
        UploadPlanSettings {
            source_dir: source.to_path_buf(),
            bucket: "media-bucket".to_string(),
            prefix: "videos".to_string(),
            extension: "mp4".to_string(),
        }
    }

    #[test]
    fn shard_is_md5_prefix_of_name() {
        assert_eq!(shard_for("clip.mp4"), "d3");
        assert_eq!(shard_for("a.mp4"), "2a");
        assert_eq!(shard_for("b.mp4"), "3c");
    }

    #[test]
    fn plan_line_formats_copy_command() {
        let line = plan_line(Path::new("/src/clip.mp4"), "clip.mp4", "bkt", "/videos/");
        assert_eq!(line, "cp /src/clip.mp4 s3://bkt/videos/d3/clip.mp4");
        let bare = plan_line(Path::new("/src/a.mp4"), "a.mp4", "bkt", "");
        assert_eq!(bare, "cp /src/a.mp4 s3://bkt/2a/a.mp4");
    }

    #[test]
    fn write_plan_lists_matching_top_level_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.mp4"), b"b").unwrap();
        fs::write(dir.path().join("a.mp4"), b"a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/c.mp4"), b"c").unwrap();

        let mut out = Vec::new();
        let count = write_plan(&settings(dir.path()), &mut out).unwrap();
        assert_eq!(count, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                format!(
                    "cp {} s3://media-bucket/videos/2a/a.mp4",
                    dir.path().join("a.mp4").display()
                ),
                format!(
                    "cp {} s3://media-bucket/videos/3c/b.mp4",
                    dir.path().join("b.mp4").display()
                ),
            ]
        );
    }

    #[test]
    fn write_plan_requires_source_directory() {
        let dir = tempdir().unwrap();
        let mut out = Vec::new();
        let err = write_plan(&settings(&dir.path().join("missing")), &mut out).unwrap_err();
        assert!(matches!(err, IngestError::Io(ref inner) if inner.kind() == io::ErrorKind::NotFound));
        assert!(out.is_empty());

        let file = dir.path().join("plain.mp4");
        fs::write(&file, b"x").unwrap();
        let err = write_plan(&settings(&file), &mut out).unwrap_err();
        assert!(matches!(err, IngestError::Io(ref inner) if inner.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn write_plan_file_replaces_previous_plan() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("clip.mp4"), b"x").unwrap();
        let plan = dir.path().join("plan.txt");
        fs::write(&plan, "stale\n").unwrap();

        assert_eq!(write_plan_file(&settings(&source), &plan).unwrap(), 1);
        let text = fs::read_to_string(&plan).unwrap();
        assert!(text.ends_with("s3://media-bucket/videos/d3/clip.mp4\n"));
        assert!(!text.contains("stale"));
    }
}
