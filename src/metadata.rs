#![forbid(unsafe_code)]

//! Persistence layer for harvested metadata.
//!
//! Each origin keeps one JSON array document (`_metadata.json`) inside its
//! output directory. The document is always rewritten in full, never appended
//! to, so a run can only ever leave behind the previous version or the new
//! one. Entries the origin cannot parse are carried through untouched and
//! written back at their original positions.

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::origin::Origin;
use crate::record::Record;

/// File name of the store inside an origin's output directory.
pub const METADATA_FILE: &str = "_metadata.json";

/// Outcome of folding a fetched batch into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub total: usize,
}

/// Ordered, id-unique collection of records backed by a JSON file.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
    records: Vec<Record>,
    ids: HashSet<String>,
    /// Unparseable entries with their index in the loaded document.
    passthrough: Vec<(usize, Value)>,
}

/// One element of the persisted array.
#[derive(Serialize)]
#[serde(untagged)]
enum Entry<'a> {
    Record(&'a Record),
    Kept(&'a Value),
}

impl MetadataStore {
    /// Empty store that will be written to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            ids: HashSet::new(),
            passthrough: Vec::new(),
        }
    }

    /// Loads the store using the origin's record parser. A missing file gives
    /// an empty store; so does a corrupt one, after a warning.
    pub fn load(path: impl Into<PathBuf>, origin: &dyn Origin) -> Self {
        Self::load_with(path, |raw| origin.parse_record(raw))
    }

    pub fn load_with<F>(path: impl Into<PathBuf>, parse: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Option<Record>,
    {
        let path = path.into();
        match read_document(&path) {
            Ok(None) => Self::empty(path),
            Ok(Some(items)) => {
                let mut store = Self::empty(path);
                let mut duplicates = 0usize;
                for (position, item) in items.into_iter().enumerate() {
                    let Value::Object(raw) = item else {
                        store.passthrough.push((position, item));
                        continue;
                    };
                    match parse(raw.clone()) {
                        Some(record) => {
                            if !store.insert(record) {
                                duplicates += 1;
                            }
                        }
                        None => store.passthrough.push((position, Value::Object(raw))),
                    }
                }
                if duplicates > 0 {
                    warn!(
                        path = %store.path.display(),
                        duplicates,
                        "dropped entries repeating an earlier id"
                    );
                }
                if !store.passthrough.is_empty() {
                    warn!(
                        path = %store.path.display(),
                        kept = store.passthrough.len(),
                        "entries without a usable id are kept as-is"
                    );
                }
                info!(
                    path = %store.path.display(),
                    count = store.records.len(),
                    "loaded existing metadata"
                );
                store
            }
            Err(err) => {
                warn!(%err, "starting from an empty metadata store");
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Entries carried through without being parsed into records.
    pub fn passthrough_len(&self) -> usize {
        self.passthrough.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.ids.contains(external_id)
    }

    /// Snapshot of every known id, handed to the fetcher for filtering.
    pub fn known_ids(&self) -> HashSet<String> {
        self.ids.clone()
    }

    /// Appends records whose id is not stored yet, keeping batch order.
    pub fn merge(&mut self, batch: impl IntoIterator<Item = Record>) -> MergeReport {
        let mut added = 0;
        for record in batch {
            if self.insert(record) {
                added += 1;
            }
        }
        MergeReport {
            added,
            total: self.records.len(),
        }
    }

    /// Rewrites the whole document through a temp file in the same directory.
    pub fn save(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &self.document())
                .map_err(|err| IngestError::Io(err.into()))?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;

        info!(
            path = %self.path.display(),
            count = self.records.len(),
            "saved metadata"
        );
        Ok(())
    }

    /// Records in order, with passthrough entries slotted back at their
    /// loaded index (or appended once the records run out).
    fn document(&self) -> Vec<Entry<'_>> {
        let mut entries = Vec::with_capacity(self.records.len() + self.passthrough.len());
        let mut kept = self.passthrough.iter().peekable();
        for record in &self.records {
            while let Some((_, value)) = kept.next_if(|(position, _)| *position <= entries.len()) {
                entries.push(Entry::Kept(value));
            }
            entries.push(Entry::Record(record));
        }
        entries.extend(kept.map(|(_, value)| Entry::Kept(value)));
        entries
    }

    fn insert(&mut self, record: Record) -> bool {
        if !self.ids.insert(record.external_id.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }
}

/// Pure form of [`MetadataStore::merge`]: `existing` followed by the unseen
/// part of `batch`.
pub fn merge(existing: &[Record], batch: &[Record]) -> Vec<Record> {
    let mut seen: HashSet<&str> = existing.iter().map(|r| r.external_id.as_str()).collect();
    let mut merged = existing.to_vec();
    for record in batch {
        if seen.insert(record.external_id.as_str()) {
            merged.push(record.clone());
        }
    }
    merged
}

fn read_document(path: &Path) -> Result<Option<Vec<Value>>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(IngestError::MalformedStore {
                path: path.to_path_buf(),
                reason: err.to_string(),
            });
        }
    };
    serde_json::from_str::<Vec<Value>>(&raw)
        .map(Some)
        .map_err(|err| IngestError::MalformedStore {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}
