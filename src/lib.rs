#![forbid(unsafe_code)]

//! Incremental media harvesting: paginated search APIs are pulled into a
//! deduplicated JSON metadata store, and the media each record points at is
//! downloaded with existence-based resume.

pub mod asset_id;
pub mod config;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod logging;
pub mod metadata;
pub mod origin;
pub mod pipeline;
pub mod record;
pub mod security;
pub mod upload_plan;

pub use error::{IngestError, Result};
