#![forbid(unsafe_code)]

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{IngestError, Result};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TARGET_COUNT: usize = 10_000;
pub const DEFAULT_METADATA_WORKERS: usize = 8;
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 48;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fully resolved knobs for one harvest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestSettings {
    /// Raw credential string; validated later by the origin adapter.
    pub credential: Option<String>,
    pub output_dir: PathBuf,
    pub target_count: usize,
    pub metadata_workers: usize,
    pub download_workers: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default)]
pub struct HarvestOverrides {
    pub output_dir: Option<PathBuf>,
    pub target_count: Option<usize>,
    pub metadata_workers: Option<usize>,
    pub download_workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub env_path: Option<PathBuf>,
}

/// Resolves settings for `origin_name`, whose credential lives in
/// `credential_key`. CLI overrides win over the process environment, which
/// wins over the `.env` file.
pub fn resolve_settings(
    origin_name: &str,
    credential_key: &str,
    overrides: HarvestOverrides,
) -> Result<HarvestSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings(
        origin_name,
        credential_key,
        &file_vars,
        env_var_string,
        overrides,
    )
}

fn build_settings(
    origin_name: &str,
    credential_key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: HarvestOverrides,
) -> Result<HarvestSettings> {
    let credential = lookup_value(credential_key, file_vars, &env_lookup);
    let output_dir = overrides
        .output_dir
        .filter(|path| !path.as_os_str().is_empty())
        .or_else(|| lookup_value("INGEST_OUTPUT_DIR", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(format!("{origin_name}_downloads")));
    let target_count = overrides
        .target_count
        .or_else(|| parsed("INGEST_TARGET_COUNT", file_vars, &env_lookup))
        .unwrap_or(DEFAULT_TARGET_COUNT);
    let metadata_workers = overrides
        .metadata_workers
        .or_else(|| parsed("INGEST_METADATA_WORKERS", file_vars, &env_lookup))
        .unwrap_or(DEFAULT_METADATA_WORKERS);
    let download_workers = overrides
        .download_workers
        .or_else(|| parsed("INGEST_DOWNLOAD_WORKERS", file_vars, &env_lookup))
        .unwrap_or(DEFAULT_DOWNLOAD_WORKERS);
    let timeout_secs = overrides
        .timeout_secs
        .or_else(|| parsed("INGEST_TIMEOUT_SECS", file_vars, &env_lookup))
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let max_retries = overrides
        .max_retries
        .or_else(|| parsed("INGEST_MAX_RETRIES", file_vars, &env_lookup))
        .unwrap_or(DEFAULT_MAX_RETRIES);

    if metadata_workers == 0 {
        return Err(IngestError::Config(
            "INGEST_METADATA_WORKERS must be at least 1".to_string(),
        ));
    }
    if download_workers == 0 {
        return Err(IngestError::Config(
            "INGEST_DOWNLOAD_WORKERS must be at least 1".to_string(),
        ));
    }
    if timeout_secs == 0 {
        return Err(IngestError::Config(
            "INGEST_TIMEOUT_SECS must be at least 1".to_string(),
        ));
    }

    Ok(HarvestSettings {
        credential,
        output_dir,
        target_count,
        metadata_workers,
        download_workers,
        timeout: Duration::from_secs(timeout_secs),
        max_retries,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    })
}

fn parsed<T: std::str::FromStr>(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<T> {
    lookup_value(key, file_vars, env_lookup).and_then(|value| value.trim().parse().ok())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content = fs::read_to_string(path)
        .map_err(|err| IngestError::Config(format!("reading {}: {err}", path.display())))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
