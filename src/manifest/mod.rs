//! Composite manifest model
//!
//! The manifest maps a composite token's invocation (as a decimal string key)
//! to the dots redeemed toward it:
//!
//! ```json
//! { "0": { "dots": [{ "tokenId": 10, "hash": "0x.." }] } }
//! ```
//!
//! Keys are held as integers so iteration and serialization follow ascending
//! invocation order; two equal manifests always produce identical bytes.
//!
//! Entries read from a published manifest are written back as they were read,
//! including older shapes such as `{"token_id": "10", "hash": "0x..", "id": ".."}`.
//! Only entries appended by this crate use the `{tokenId, hash}` shape.

pub mod builder;
pub mod diff;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::types::{deserialize_flexible_u64, Result, SyncError};

pub use builder::{BuildOutcome, ManifestBuilder, TokenResolution};
pub use diff::{diff, ManifestDiff};

/// A resolved dot (sub-token) reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotToken {
    #[serde(
        rename = "tokenId",
        alias = "token_id",
        deserialize_with = "deserialize_flexible_u64"
    )]
    pub token_id: u64,
    pub hash: String,
}

/// Manifest value for one composite token
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    dots: Vec<DotToken>,
    /// JSON as read from a published manifest
    published: Option<Value>,
}

impl ManifestEntry {
    pub fn new(dots: Vec<DotToken>) -> Self {
        Self { dots, published: None }
    }

    pub fn dots(&self) -> &[DotToken] {
        &self.dots
    }

    /// JSON value this entry publishes as
    pub fn to_value(&self) -> Value {
        match &self.published {
            Some(raw) => raw.clone(),
            None => json!({
                "dots": self
                    .dots
                    .iter()
                    .map(|d| json!({ "tokenId": d.token_id, "hash": d.hash }))
                    .collect::<Vec<_>>()
            }),
        }
    }
}

/// Entries are equal when they publish the same JSON
impl PartialEq for ManifestEntry {
    fn eq(&self, other: &Self) -> bool {
        self.to_value() == other.to_value()
    }
}

impl Eq for ManifestEntry {}

impl Serialize for ManifestEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.published {
            Some(raw) => raw.serialize(serializer),
            None => self.to_value().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ManifestEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Shape {
            dots: Vec<DotToken>,
        }

        let raw = Value::deserialize(deserializer)?;
        let shape = Shape::deserialize(&raw).map_err(serde::de::Error::custom)?;
        Ok(Self {
            dots: shape.dots,
            published: Some(raw),
        })
    }
}

/// Invocation-keyed manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(BTreeMap<u64, ManifestEntry>);

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, invocation: u64) -> Option<&ManifestEntry> {
        self.0.get(&invocation)
    }

    pub fn contains(&self, invocation: u64) -> bool {
        self.0.contains_key(&invocation)
    }

    /// Ascending invocation keys
    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &ManifestEntry)> + '_ {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    /// Append an entry. Existing keys are never replaced; returns whether the
    /// entry was inserted.
    pub fn append(&mut self, invocation: u64, entry: ManifestEntry) -> bool {
        if self.0.contains_key(&invocation) {
            return false;
        }
        self.0.insert(invocation, entry);
        true
    }

    /// Canonical JSON bytes
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SyncError::Protocol(format!("Failed to serialize manifest: {}", e)))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| SyncError::Protocol(format!("Malformed manifest: {}", e)))
    }
}

impl FromIterator<(u64, ManifestEntry)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (u64, ManifestEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Invocations below `invocation_count` that the manifest does not cover yet,
/// ascending.
pub fn missing_keys(all_indices: &[u64], manifest: &Manifest, invocation_count: u64) -> Vec<u64> {
    let mut missing: Vec<u64> = all_indices
        .iter()
        .copied()
        .filter(|idx| *idx < invocation_count && !manifest.contains(*idx))
        .collect();
    missing.sort_unstable();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ids: &[u64]) -> ManifestEntry {
        ManifestEntry::new(
            ids.iter()
                .map(|id| DotToken {
                    token_id: *id,
                    hash: format!("0x{:064x}", id),
                })
                .collect(),
        )
    }

    #[test]
    fn test_keys_serialize_in_numeric_order() {
        let manifest: Manifest = [(10, entry(&[1])), (2, entry(&[2])), (0, entry(&[3]))]
            .into_iter()
            .collect();

        let json = String::from_utf8(manifest.to_canonical_json().unwrap()).unwrap();
        let zero = json.find("\"0\"").unwrap();
        let two = json.find("\"2\"").unwrap();
        let ten = json.find("\"10\"").unwrap();
        assert!(zero < two && two < ten);
        assert!(json.contains("\"tokenId\":1"));
    }

    #[test]
    fn test_reads_legacy_token_id_spelling() {
        let json = br#"{"4": {"dots": [{"token_id": "77", "hash": "0xaa"}]}}"#;
        let manifest = Manifest::from_json(json).unwrap();
        assert_eq!(manifest.get(4).unwrap().dots()[0].token_id, 77);
    }

    #[test]
    fn test_published_entries_are_written_back_as_read() {
        let json = br#"{"0": {"dots": [{"token_id": "10", "hash": "0xaa", "id": "0xdots-10"}]}}"#;
        let mut manifest = Manifest::from_json(json).unwrap();
        let before: Value = serde_json::from_slice(json).unwrap();

        assert!(manifest.append(1, entry(&[11])));
        let after: Value = serde_json::from_slice(&manifest.to_canonical_json().unwrap()).unwrap();

        assert_eq!(after["0"], before["0"]);
        assert_eq!(after["1"]["dots"][0]["tokenId"], 11);
        assert_eq!(manifest.get(0).unwrap().dots()[0].token_id, 10);
    }

    #[test]
    fn test_reloaded_entry_equals_built_entry() {
        let manifest: Manifest = [(2, entry(&[7]))].into_iter().collect();
        let reloaded = Manifest::from_json(&manifest.to_canonical_json().unwrap()).unwrap();
        assert_eq!(reloaded, manifest);

        let legacy = Manifest::from_json(br#"{"2": {"dots": [{"token_id": "7", "hash": "0x07"}]}}"#).unwrap();
        assert_ne!(legacy.get(2), Some(&ManifestEntry::new(vec![DotToken { token_id: 7, hash: "0x07".to_string() }])));
    }

    #[test]
    fn test_rejects_non_numeric_keys() {
        let json = br#"{"abc": {"dots": []}}"#;
        assert!(matches!(
            Manifest::from_json(json),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_append_never_replaces() {
        let mut manifest = Manifest::new();
        assert!(manifest.append(1, entry(&[5])));
        assert!(!manifest.append(1, entry(&[6])));
        assert_eq!(manifest.get(1).unwrap().dots()[0].token_id, 5);
    }

    #[test]
    fn test_missing_keys() {
        let manifest: Manifest = [(0, entry(&[1])), (2, entry(&[2]))].into_iter().collect();
        assert_eq!(missing_keys(&[0, 1, 2, 3, 4], &manifest, 4), vec![1, 3]);
        assert_eq!(missing_keys(&[3, 1, 1], &manifest, 10), vec![1, 3]);
        assert!(missing_keys(&[0, 2], &manifest, 3).is_empty());
    }
}
