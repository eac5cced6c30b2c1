#![forbid(unsafe_code)]

//! The unit of metadata flowing through an ingest run.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// One media item as returned by an origin's search API.
///
/// The typed fields are lifted out of the raw object by the origin adapter;
/// `raw` keeps the untouched JSON so the persisted store mirrors exactly what
/// the origin sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub external_id: String,
    pub has_media: bool,
    pub media_url: Option<String>,
    pub raw: Map<String, Value>,
}

impl Record {
    pub fn new(external_id: impl Into<String>, raw: Map<String, Value>) -> Self {
        Self {
            external_id: external_id.into(),
            has_media: false,
            media_url: None,
            raw,
        }
    }

    pub fn with_media(mut self, media_url: Option<String>) -> Self {
        self.has_media = true;
        self.media_url = media_url.filter(|url| !url.trim().is_empty());
        self
    }

    /// Reads a string field from the raw payload, ignoring blanks.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.raw
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// Reads a string or integer id out of a JSON object.
pub(crate) fn id_field(raw: &Map<String, Value>, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
