//! Manifest builder
//!
//! Resolves every missing composite token into a manifest entry and merges
//! the results into a candidate manifest.
//!
//! Resolution fans out across tokens (bounded), but each task only returns a
//! [`TokenResolution`] value. The merge happens once, after every task has
//! finished, in ascending invocation order. No task ever writes to the
//! accumulator, so completion order cannot affect the candidate.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{DotToken, Manifest, ManifestEntry};
use crate::chain::RedemptionReader;
use crate::indexer::IndexerSource;
use crate::types::{ProjectRef, Result, TokenRecord};

/// Per-token result of the fan-out phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenResolution {
    /// No dots redeemed yet; the token stays missing
    Unredeemed,
    /// Redeemed dots the indexer cannot describe yet; retried next run
    Pending { unindexed: Vec<u64> },
    /// Ready to append
    Resolved(ManifestEntry),
}

/// Result of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub candidate: Manifest,
    /// Keys appended to the candidate, ascending
    pub added: Vec<u64>,
    pub unredeemed: Vec<u64>,
    pub pending: Vec<u64>,
}

/// Builds candidate manifests from redemption records
pub struct ManifestBuilder {
    indexer: Arc<dyn IndexerSource>,
    redemptions: Arc<dyn RedemptionReader>,
    /// Composite engine contract the redemptions are recorded against
    engine: String,
    /// Project the dots are minted on
    dots_project: ProjectRef,
    concurrency: usize,
}

impl ManifestBuilder {
    pub fn new(
        indexer: Arc<dyn IndexerSource>,
        redemptions: Arc<dyn RedemptionReader>,
        engine: impl Into<String>,
        dots_project: ProjectRef,
        concurrency: usize,
    ) -> Self {
        Self {
            indexer,
            redemptions,
            engine: engine.into(),
            dots_project,
            concurrency: concurrency.max(1),
        }
    }

    /// Resolve one composite token. Chain and indexer failures propagate.
    pub async fn resolve_token(&self, token: &TokenRecord) -> Result<TokenResolution> {
        let redeemed = self
            .redemptions
            .redeemed_dots_for(&self.engine, token.token_id)
            .await?;

        if redeemed.is_empty() {
            debug!(invocation = token.invocation, token_id = token.token_id, "No redeemed dots");
            return Ok(TokenResolution::Unredeemed);
        }

        let mut lookup = redeemed.clone();
        lookup.sort_unstable();
        lookup.dedup();

        let hashes: HashMap<u64, String> = self
            .indexer
            .dot_tokens(&self.dots_project, &lookup)
            .await?
            .into_iter()
            .map(|dot| (dot.token_id, dot.hash))
            .collect();

        let unindexed: Vec<u64> = lookup
            .iter()
            .copied()
            .filter(|id| !hashes.contains_key(id))
            .collect();
        if !unindexed.is_empty() {
            return Ok(TokenResolution::Pending { unindexed });
        }

        // Keep the on-chain redemption order
        let dots = redeemed
            .iter()
            .filter_map(|id| {
                hashes.get(id).map(|hash| DotToken {
                    token_id: *id,
                    hash: hash.clone(),
                })
            })
            .collect();

        Ok(TokenResolution::Resolved(ManifestEntry::new(dots)))
    }

    /// Resolve `missing` concurrently, then fold into a copy of `current`
    pub async fn build(&self, current: &Manifest, missing: &[TokenRecord]) -> Result<BuildOutcome> {
        info!(
            missing = missing.len(),
            concurrency = self.concurrency,
            "Resolving redemptions for missing tokens"
        );

        let resolutions: Vec<(u64, TokenResolution)> = stream::iter(missing)
            .map(|token| async move {
                self.resolve_token(token)
                    .await
                    .map(|resolution| (token.invocation, resolution))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        Ok(fold_resolutions(current, resolutions))
    }
}

/// Single merge point: sort by key, then append sequentially
pub fn fold_resolutions(current: &Manifest, mut resolutions: Vec<(u64, TokenResolution)>) -> BuildOutcome {
    resolutions.sort_by_key(|(invocation, _)| *invocation);

    let mut candidate = current.clone();
    let mut added = Vec::new();
    let mut unredeemed = Vec::new();
    let mut pending = Vec::new();

    for (invocation, resolution) in resolutions {
        match resolution {
            TokenResolution::Unredeemed => unredeemed.push(invocation),
            TokenResolution::Pending { unindexed } => {
                warn!(
                    invocation = invocation,
                    unindexed = ?unindexed,
                    "Redeemed dots not indexed yet, retrying next run"
                );
                pending.push(invocation);
            }
            TokenResolution::Resolved(entry) => {
                let dots = entry.dots().len();
                if candidate.append(invocation, entry) {
                    debug!(invocation = invocation, dots = dots, "Appended manifest entry");
                    added.push(invocation);
                } else {
                    warn!(invocation = invocation, "Manifest already has entry, keeping existing");
                }
            }
        }
    }

    BuildOutcome {
        candidate,
        added,
        unredeemed,
        pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockChain, MockIndexer};
    use crate::types::SyncError;

    fn token(invocation: u64) -> TokenRecord {
        TokenRecord {
            id: format!("0xcomposite-{}", 1_000_000 + invocation),
            token_id: 1_000_000 + invocation,
            invocation,
        }
    }

    fn builder(indexer: MockIndexer, chain: MockChain, concurrency: usize) -> ManifestBuilder {
        ManifestBuilder::new(
            Arc::new(indexer),
            Arc::new(chain),
            "0xcomposite",
            ProjectRef::new("0xdots", 0),
            concurrency,
        )
    }

    #[tokio::test]
    async fn test_skips_unredeemed_tokens() {
        let indexer = MockIndexer::with_dots(&[10, 11, 20]);
        let chain = MockChain::new()
            .with_redemptions(1_000_000, &[10, 11])
            .with_redemptions(1_000_002, &[20]);

        let outcome = builder(indexer, chain, 4)
            .build(&Manifest::new(), &[token(0), token(1), token(2)])
            .await
            .unwrap();

        assert_eq!(outcome.added, vec![0, 2]);
        assert_eq!(outcome.unredeemed, vec![1]);
        assert!(!outcome.candidate.contains(1));
        let ids: Vec<u64> = outcome.candidate.get(0).unwrap().dots().iter().map(|d| d.token_id).collect();
        assert_eq!(ids, vec![10, 11]);
    }

    #[tokio::test]
    async fn test_concurrent_merge_matches_sequential() {
        let make = || {
            let indexer = MockIndexer::with_dots(&[50, 20, 90, 91]);
            let chain = MockChain::new()
                .with_redemptions(1_000_005, &[50])
                .with_redemptions(1_000_002, &[20])
                .with_redemptions(1_000_009, &[91, 90])
                // Later keys answer first
                .with_delay(1_000_002, 30)
                .with_delay(1_000_005, 15);
            (indexer, chain)
        };

        let (indexer, chain) = make();
        let concurrent = builder(indexer, chain, 8)
            .build(&Manifest::new(), &[token(5), token(2), token(9)])
            .await
            .unwrap();

        let (indexer, chain) = make();
        let sequential = builder(indexer, chain, 1)
            .build(&Manifest::new(), &[token(2), token(5), token(9)])
            .await
            .unwrap();

        assert_eq!(concurrent.added, vec![2, 5, 9]);
        assert_eq!(
            concurrent.candidate.to_canonical_json().unwrap(),
            sequential.candidate.to_canonical_json().unwrap()
        );
        // Redemption order survives the hash lookup
        let ids: Vec<u64> = concurrent.candidate.get(9).unwrap().dots().iter().map(|d| d.token_id).collect();
        assert_eq!(ids, vec![91, 90]);
    }

    #[tokio::test]
    async fn test_chain_read_failure_propagates() {
        let indexer = MockIndexer::with_dots(&[10]);
        let chain = MockChain::new()
            .with_redemptions(1_000_000, &[10])
            .with_failure(1_000_001);

        let result = builder(indexer, chain, 4)
            .build(&Manifest::new(), &[token(0), token(1)])
            .await;

        assert!(matches!(result, Err(SyncError::ChainRead(_))));
    }

    #[tokio::test]
    async fn test_unindexed_dots_leave_token_pending() {
        let indexer = MockIndexer::with_dots(&[10]);
        let chain = MockChain::new().with_redemptions(1_000_000, &[10, 11]);

        let outcome = builder(indexer, chain, 2)
            .build(&Manifest::new(), &[token(0)])
            .await
            .unwrap();

        assert!(outcome.added.is_empty());
        assert_eq!(outcome.pending, vec![0]);
        assert!(outcome.candidate.is_empty());
    }

    #[test]
    fn test_fold_keeps_existing_entries() {
        let existing = ManifestEntry::new(vec![DotToken {
            token_id: 1,
            hash: "0x01".to_string(),
        }]);
        let current: Manifest = [(3, existing.clone())].into_iter().collect();
        let replacement = ManifestEntry::new(vec![]);

        let outcome = fold_resolutions(&current, vec![(3, TokenResolution::Resolved(replacement))]);

        assert!(outcome.added.is_empty());
        assert_eq!(outcome.candidate.get(3), Some(&existing));
    }
}
