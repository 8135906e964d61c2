//! Structural diff between the published manifest and a candidate

use super::Manifest;
use crate::types::{Result, SyncError};

/// Key-level differences between two manifests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub added: Vec<u64>,
    pub removed: Vec<u64>,
    pub modified: Vec<u64>,
}

impl ManifestDiff {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Fails when the candidate drops or rewrites a published entry
    pub fn ensure_append_only(&self) -> Result<()> {
        if self.removed.is_empty() && self.modified.is_empty() {
            return Ok(());
        }
        Err(SyncError::Protocol(format!(
            "Candidate manifest is not append-only (removed: {:?}, modified: {:?})",
            self.removed, self.modified
        )))
    }
}

/// Compare by content; key order and allocation never matter
pub fn diff(previous: &Manifest, candidate: &Manifest) -> ManifestDiff {
    let mut result = ManifestDiff::default();

    for (key, entry) in candidate.iter() {
        match previous.get(key) {
            None => result.added.push(key),
            Some(old) if old != entry => result.modified.push(key),
            Some(_) => {}
        }
    }
    result.removed = previous.keys().filter(|key| !candidate.contains(*key)).collect();

    result
}
