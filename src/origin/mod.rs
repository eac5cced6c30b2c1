#![forbid(unsafe_code)]

//! Origin adapters.
//!
//! Everything that differs between search APIs (request shape, response
//! envelope, id field names, credential format, how media is addressed) lives
//! behind the [`Origin`] trait so the pipeline itself stays origin-agnostic.

mod flim;
mod frameset;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{IngestError, Result};
use crate::http::PageRequest;
use crate::record::Record;
use crate::security::{AuthStatus, Credential};

pub use flim::FlimOrigin;
pub use frameset::FramesetOrigin;

/// One candidate location for a record's media payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCandidate {
    pub url: String,
    pub extension: String,
}

impl MediaCandidate {
    pub fn new(url: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extension: extension.into(),
        }
    }
}

/// How to obtain a record's media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPlan {
    /// A known URL; any successful response is accepted.
    Direct(MediaCandidate),
    /// Candidates tried in order until one returns a plausible payload.
    Probe(Vec<MediaCandidate>),
}

impl MediaPlan {
    pub fn candidates(&self) -> &[MediaCandidate] {
        match self {
            MediaPlan::Direct(candidate) => std::slice::from_ref(candidate),
            MediaPlan::Probe(candidates) => candidates,
        }
    }

    pub fn is_probe(&self) -> bool {
        matches!(self, MediaPlan::Probe(_))
    }
}

/// Adapter for a single external search/media API.
pub trait Origin: Send + Sync {
    /// Short lowercase name, also used for the default output directory.
    fn name(&self) -> &'static str;

    /// Index of the first page (some APIs count from 0, others from 1).
    fn first_page(&self) -> u32;

    /// Storage category used when files are laid out by derived asset id.
    fn default_category(&self) -> &'static str;

    /// Environment variable holding this origin's credential.
    fn credential_env(&self) -> &'static str;

    fn parse_credential(&self, raw: &str) -> Result<Credential>;

    fn build_request(&self, page: u32) -> PageRequest;

    /// Unwraps the response envelope into raw item objects. Unexpected
    /// shapes yield no items.
    fn extract_items(&self, response: Value) -> Vec<Map<String, Value>>;

    /// Lifts the typed fields out of a raw item; `None` when no id exists.
    fn parse_record(&self, raw: Map<String, Value>) -> Option<Record>;

    fn check_auth_expiry(&self, credential: &Credential, now: DateTime<Utc>) -> AuthStatus;

    fn media_plan(&self, record: &Record) -> Option<MediaPlan>;

    /// Extra headers sent with every media request.
    fn media_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Whether media requests must carry the search credential as well.
    fn media_needs_credential(&self) -> bool {
        false
    }

    fn records_from_response(&self, response: Value) -> Vec<Record> {
        self.extract_items(response)
            .into_iter()
            .filter_map(|raw| self.parse_record(raw))
            .collect()
    }
}

/// Origins this crate ships adapters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    Flim,
    Frameset,
}

impl OriginKind {
    pub fn build(self) -> Box<dyn Origin> {
        match self {
            OriginKind::Flim => Box::new(FlimOrigin::default()),
            OriginKind::Frameset => Box::new(FramesetOrigin::default()),
        }
    }
}

impl FromStr for OriginKind {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flim" => Ok(OriginKind::Flim),
            "frameset" => Ok(OriginKind::Frameset),
            other => Err(IngestError::Config(format!("unknown origin: {other}"))),
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OriginKind::Flim => "flim",
            OriginKind::Frameset => "frameset",
        })
    }
}

/// Follows `path` through nested objects.
pub(crate) fn pointer<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn origin_kind_parses_names() {
        assert_eq!("Flim".parse::<OriginKind>().unwrap(), OriginKind::Flim);
        assert_eq!(" frameset ".parse::<OriginKind>().unwrap(), OriginKind::Frameset);
        assert!("vimeo".parse::<OriginKind>().is_err());
        assert_eq!(OriginKind::Frameset.build().name(), "frameset");
    }

    #[test]
    fn pointer_walks_nested_objects() {
        let value = json!({"a": {"b": {"c": 3}}});
        assert_eq!(pointer(&value, &["a", "b", "c"]), Some(&json!(3)));
        assert!(pointer(&value, &["a", "x"]).is_none());
    }

    #[test]
    fn direct_plan_has_single_candidate() {
        let plan = MediaPlan::Direct(MediaCandidate::new("https://cdn/a.mp4", "mp4"));
        assert_eq!(plan.candidates().len(), 1);
        assert!(!plan.is_probe());
    }
}
