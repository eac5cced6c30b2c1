#![forbid(unsafe_code)]

//! Deterministic asset identifiers.
//!
//! Origins hand out ids in whatever shape suits them (20-character tokens,
//! hyphenated UUIDs, ...). Every id is mapped onto a UUID v5 under a fixed
//! namespace so storage paths are stable across runs and across origins
//! without a central allocator.

use std::fmt;

use uuid::Uuid;

use crate::error::{IngestError, Result};

/// Name hashed under `NAMESPACE_DNS` to obtain the default namespace.
pub const DEFAULT_NAMESPACE_NAME: &str = "moodio";

/// Length of the shard prefix taken from the derived id.
pub const SHARD_LEN: usize = 2;

/// Namespace UUID under which external ids are hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetNamespace(Uuid);

impl AssetNamespace {
    /// Derives a namespace from a human-readable name, `uuid5(DNS, name)`.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn derive_id(&self, external_id: &str) -> Result<GlobalAssetId> {
        if external_id.trim().is_empty() {
            return Err(IngestError::InvalidInput(
                "external id cannot be empty".to_string(),
            ));
        }
        Ok(GlobalAssetId(Uuid::new_v5(&self.0, external_id.as_bytes())))
    }

    /// Builds `{category}/{shard}/{uuid}.{extension}`.
    pub fn derive_path(&self, external_id: &str, category: &str, extension: &str) -> Result<String> {
        let id = self.derive_id(external_id)?;
        let category = category.trim_matches('/');
        let extension = extension.trim_start_matches('.');
        if category.is_empty() {
            return Err(IngestError::InvalidInput("category cannot be empty".to_string()));
        }
        if extension.is_empty() {
            return Err(IngestError::InvalidInput("extension cannot be empty".to_string()));
        }
        Ok(format!("{category}/{}/{id}.{extension}", id.shard()))
    }
}

impl Default for AssetNamespace {
    fn default() -> Self {
        Self::from_name(DEFAULT_NAMESPACE_NAME)
    }
}

/// UUID v5 of an external id. Only ever used to build storage paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalAssetId(Uuid);

impl GlobalAssetId {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First two lowercase hex characters of the canonical form (`00`-`ff`).
    pub fn shard(&self) -> String {
        let mut encoded = Uuid::encode_buffer();
        let text = self.0.hyphenated().encode_lower(&mut encoded);
        text[..SHARD_LEN].to_string()
    }
}

impl fmt::Display for GlobalAssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// [`AssetNamespace::derive_id`] under the default namespace.
pub fn derive_id(external_id: &str) -> Result<GlobalAssetId> {
    AssetNamespace::default().derive_id(external_id)
}

/// [`AssetNamespace::derive_path`] under the default namespace.
pub fn derive_path(external_id: &str, category: &str, extension: &str) -> Result<String> {
    AssetNamespace::default().derive_path(external_id, category, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_namespace_matches_dns_derivation() {
        assert_eq!(
            AssetNamespace::default().as_uuid().to_string(),
            "3ae53aa2-4d26-5fd9-8596-f8c4e933bc62"
        );
    }

    #[test]
    fn derive_id_is_stable_and_known() {
        let first = derive_id("TSdwYwc6MkoRxpwhHRvY").unwrap();
        let second = derive_id("TSdwYwc6MkoRxpwhHRvY").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_string(), "ecfd1643-6360-5cf3-a976-d8d99030eb02");
    }

    #[test]
    fn derive_id_separates_neighbouring_ids() {
        let a = derive_id("TSdwYwc6MkoRxpwhHRvY").unwrap();
        let b = derive_id("TSdwYwc6MkoRxpwhHRvZ").unwrap();
        assert_ne!(a, b);
        assert_eq!(b.to_string(), "8243e787-abe4-5e0a-b6bf-7424f0c34f4f");
    }

    #[test]
    fn derive_id_accepts_uuid_shaped_ids() {
        let id = derive_id("3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap();
        assert_eq!(id.to_string(), "34ce01a4-fbd1-5818-9ed7-b6b3e35fa1b9");
    }

    #[test]
    fn derive_id_rejects_empty() {
        assert!(matches!(derive_id(""), Err(IngestError::InvalidInput(_))));
        assert!(matches!(derive_id("   "), Err(IngestError::InvalidInput(_))));
    }

    #[test]
    fn derive_path_is_sharded() {
        let path = derive_path("TSdwYwc6MkoRxpwhHRvY", "videos", ".mp4").unwrap();
        assert_eq!(path, "videos/ec/ecfd1643-6360-5cf3-a976-d8d99030eb02.mp4");
    }

    #[test]
    fn derive_path_shard_is_two_lowercase_hex_chars() {
        for index in 0..200 {
            let path = derive_path(&format!("asset-{index}"), "images", "jpg").unwrap();
            let rest = path.strip_prefix("images/").expect("category prefix");
            let (shard, file) = rest.split_once('/').expect("shard separator");
            assert_eq!(shard.len(), 2);
            assert!(shard.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
            assert!(file.starts_with(shard));
            assert!(file.ends_with(".jpg"));
        }
    }

    #[test]
    fn custom_namespace_changes_ids() {
        let other = AssetNamespace::from_name("elsewhere");
        let ours = derive_id("abc").unwrap();
        let theirs = other.derive_id("abc").unwrap();
        assert_ne!(ours, theirs);
    }

    #[test]
    fn derive_path_rejects_empty_category_or_extension() {
        assert!(derive_path("abc", "", "mp4").is_err());
        assert!(derive_path("abc", "videos", ".").is_err());
    }
}
