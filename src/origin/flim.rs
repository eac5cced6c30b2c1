#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use super::{MediaCandidate, MediaPlan, Origin, pointer};
use crate::error::{IngestError, Result};
use crate::http::PageRequest;
use crate::record::{Record, id_field};
use crate::security::{AuthStatus, Credential, jwt_expiry};

pub const FLIM_SEARCH_URL: &str = "https://api.flim.ai/2.0.0/search";
const PAGE_SIZE: usize = 200;

/// Film-still search API. Pages start at 0, results carry video cut URLs.
#[derive(Debug, Clone)]
pub struct FlimOrigin {
    search_url: String,
}

impl FlimOrigin {
    pub fn with_search_url(search_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
        }
    }

    fn payload(page: u32) -> Value {
        json!({
            "search": {
                "saved_images": false,
                "full_text": "",
                "similar_picture_id": "",
                "movie_id": "",
                "dop": "",
                "director": "",
                "brand": "",
                "agency": "",
                "production_company": "",
                "actor": "",
                "creator": "",
                "artist": "",
                "collection_id": "",
                "board_id": "",
                "filters": {
                    "genres": [],
                    "colors": [],
                    "number_of_persons": [],
                    "years": [],
                    "shot_types": [],
                    "movie_types": [],
                    "aspect_ratio": [],
                    "safety_content": [],
                    "has_video_cuts": true,
                    "camera_motions": []
                },
                "negative_filters": {
                    "aspect_ratio": [],
                    "genres": ["ANIMATION"],
                    "movie_types": [],
                    "colors": [],
                    "shot_types": [],
                    "number_of_persons": [],
                    "years": [],
                    "safety_content": []
                }
            },
            "page": page,
            "number_per_pages": PAGE_SIZE
        })
    }
}

impl Default for FlimOrigin {
    fn default() -> Self {
        Self::with_search_url(FLIM_SEARCH_URL)
    }
}

impl Origin for FlimOrigin {
    fn name(&self) -> &'static str {
        "flim"
    }

    fn first_page(&self) -> u32 {
        0
    }

    fn default_category(&self) -> &'static str {
        "videos"
    }

    fn credential_env(&self) -> &'static str {
        "FLIM_AUTH_TOKEN"
    }

    fn parse_credential(&self, raw: &str) -> Result<Credential> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(IngestError::auth(self.name(), "authorization token is empty"));
        }
        Ok(Credential::Bearer(token.to_string()))
    }

    fn build_request(&self, page: u32) -> PageRequest {
        PageRequest::post_json(&self.search_url, Self::payload(page))
            .header("origin", "https://app.flim.ai")
            .header("referer", "https://app.flim.ai/")
    }

    fn extract_items(&self, response: Value) -> Vec<Map<String, Value>> {
        let Some(Value::Array(images)) = pointer(&response, &["query_response", "images"]) else {
            return Vec::new();
        };
        images
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect()
    }

    fn parse_record(&self, raw: Map<String, Value>) -> Option<Record> {
        let id = id_field(&raw, "id")?;
        let has_video = raw
            .get("has_video_urls")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !has_video {
            return Some(Record::new(id, raw));
        }
        let url = raw.get("video_urls").and_then(|urls| {
            ["url_full", "url_thumbnail"]
                .iter()
                .filter_map(|key| urls.get(key).and_then(Value::as_str))
                .find(|url| !url.trim().is_empty())
                .map(str::to_string)
        });
        Some(Record::new(id, raw).with_media(url))
    }

    fn check_auth_expiry(&self, credential: &Credential, now: DateTime<Utc>) -> AuthStatus {
        match credential {
            Credential::Bearer(token) => AuthStatus::from_expiry(jwt_expiry(token), now),
            Credential::Cookies(_) => AuthStatus::Unknown,
        }
    }

    fn media_plan(&self, record: &Record) -> Option<MediaPlan> {
        if !record.has_media {
            return None;
        }
        let url = record.media_url.clone()?;
        Some(MediaPlan::Direct(MediaCandidate::new(url, "mp4")))
    }
}
