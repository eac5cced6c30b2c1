#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{MediaCandidate, MediaPlan, Origin, pointer};
use crate::error::{IngestError, Result};
use crate::http::PageRequest;
use crate::record::{Record, id_field};
use crate::security::{
    AuthStatus, Credential, jwt_expiry, parse_cookie_string, session_cookie_access_token,
};

pub const FRAMESET_SEARCH_URL: &str = "https://frameset.app/api/search";
pub const FRAMESET_CDN_BASE: &str = "https://d13mryl9xv19vu.cloudfront.net";
pub const SESSION_COOKIE: &str = "sb-rxmhjspmurpimzyrvtzs-auth-token";
const PAGE_SIZE: usize = 400;

/// Kind of asset a frameset result points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Motion,
    Still,
}

impl FrameKind {
    fn of(record: &Record) -> Option<Self> {
        match record.str_field("type") {
            Some("motion") => Some(FrameKind::Motion),
            Some("still") => Some(FrameKind::Still),
            _ => None,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            FrameKind::Motion => "_fs",
            FrameKind::Still => "_xl",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            FrameKind::Motion => &["gif", "mp4"],
            FrameKind::Still => &["jpg", "jpeg", "png"],
        }
    }
}

/// Shot-reference search API. Pages start at 1; media lives on a CDN under
/// a templated address whose extension has to be probed.
#[derive(Debug, Clone)]
pub struct FramesetOrigin {
    search_url: String,
    cdn_base: String,
}

impl FramesetOrigin {
    pub fn with_urls(search_url: impl Into<String>, cdn_base: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
            cdn_base: cdn_base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for FramesetOrigin {
    fn default() -> Self {
        Self::with_urls(FRAMESET_SEARCH_URL, FRAMESET_CDN_BASE)
    }
}

impl Origin for FramesetOrigin {
    fn name(&self) -> &'static str {
        "frameset"
    }

    fn first_page(&self) -> u32 {
        1
    }

    fn default_category(&self) -> &'static str {
        "images"
    }

    fn credential_env(&self) -> &'static str {
        "FRAMESET_COOKIE_STRING"
    }

    fn parse_credential(&self, raw: &str) -> Result<Credential> {
        let cookies = parse_cookie_string(raw);
        if cookies.is_empty() {
            return Err(IngestError::auth(
                self.name(),
                "cookie string has no name=value pairs",
            ));
        }
        Ok(Credential::Cookies(cookies))
    }

    fn build_request(&self, page: u32) -> PageRequest {
        PageRequest::get(&self.search_url)
            .query("page", page)
            .query("size", PAGE_SIZE)
            .header("referer", "https://frameset.app/search")
    }

    fn extract_items(&self, response: Value) -> Vec<Map<String, Value>> {
        if response.get("success").and_then(Value::as_bool) != Some(true) {
            return Vec::new();
        }
        let Some(Value::Array(results)) = pointer(&response, &["data", "results"]) else {
            return Vec::new();
        };
        results
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect()
    }

    fn parse_record(&self, raw: Map<String, Value>) -> Option<Record> {
        let id = id_field(&raw, "id").or_else(|| id_field(&raw, "_id"))?;
        let record = Record::new(id, raw);
        if FrameKind::of(&record).is_some() {
            Some(record.with_media(None))
        } else {
            Some(record)
        }
    }

    fn check_auth_expiry(&self, credential: &Credential, now: DateTime<Utc>) -> AuthStatus {
        let Credential::Cookies(cookies) = credential else {
            return AuthStatus::Unknown;
        };
        let session = cookies.get(SESSION_COOKIE).or_else(|| {
            cookies
                .iter()
                .find(|(name, _)| name.starts_with("sb-") && name.ends_with("-auth-token"))
                .map(|(_, value)| value)
        });
        let expiry = session
            .and_then(|value| session_cookie_access_token(value))
            .and_then(|token| jwt_expiry(&token));
        AuthStatus::from_expiry(expiry, now)
    }

    fn media_plan(&self, record: &Record) -> Option<MediaPlan> {
        if !record.has_media {
            return None;
        }
        let kind = FrameKind::of(record).unwrap_or(FrameKind::Motion);
        let candidates = kind
            .extensions()
            .iter()
            .map(|ext| {
                MediaCandidate::new(
                    format!(
                        "{}/{}{}.{ext}",
                        self.cdn_base,
                        record.external_id,
                        kind.suffix()
                    ),
                    *ext,
                )
            })
            .collect();
        Some(MediaPlan::Probe(candidates))
    }

    fn media_headers(&self) -> Vec<(String, String)> {
        [
            (
                "accept",
                "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8",
            ),
            ("referer", "https://frameset.app/"),
            ("origin", "https://frameset.app"),
            ("cache-control", "no-cache"),
            ("pragma", "no-cache"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
    }

    fn media_needs_credential(&self) -> bool {
        true
    }
}
