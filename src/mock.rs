//! In-memory collaborators for tests.
//!
//! Token ids follow the engine convention `projectId * 1_000_000 + invocation`;
//! dot hashes are derived from the dot id.

use async_trait::async_trait;
use sha3::{Digest, Sha3_256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::chain::{CommitReceipt, ManifestCommitter, RedemptionReader};
use crate::indexer::{IndexerSource, PAGE_SIZE};
use crate::manifest::{DotToken, Manifest};
use crate::notify::{RefreshNotifier, RefreshTarget};
use crate::publisher::ContentStore;
use crate::types::{ProjectInfo, ProjectRef, Result, SyncError, TokenRecord};

const TOKENS_PER_PROJECT: u64 = 1_000_000;

/// Hash the mock indexer reports for a dot
pub fn dot_hash(token_id: u64) -> String {
    format!("0x{:064x}", token_id)
}

fn snapshot<T: Clone>(values: &Mutex<Vec<T>>) -> Vec<T> {
    values.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn record<T>(values: &Mutex<Vec<T>>, value: T) {
    values.lock().unwrap_or_else(|e| e.into_inner()).push(value);
}

// ============================================================================
// Indexer
// ============================================================================

/// Indexer over a fixed token range and dot table
pub struct MockIndexer {
    invocations: Vec<u64>,
    invocation_count: Option<u64>,
    dots: HashMap<u64, String>,
    manifest_cid: Mutex<Option<String>>,
    gateway: Option<String>,
    ignore_cursor: bool,
    available: AtomicBool,
    page_log: Mutex<Vec<Option<u64>>>,
    dot_log: Mutex<Vec<usize>>,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self {
            invocations: Vec::new(),
            invocation_count: None,
            dots: HashMap::new(),
            manifest_cid: Mutex::new(None),
            gateway: None,
            ignore_cursor: false,
            available: AtomicBool::new(true),
            page_log: Mutex::new(Vec::new()),
            dot_log: Mutex::new(Vec::new()),
        }
    }

    /// Project with invocations `0..count`
    pub fn with_tokens(count: u64) -> Self {
        Self::new().tokens(count)
    }

    /// Indexer that knows the given dots
    pub fn with_dots(ids: &[u64]) -> Self {
        Self::new().dots(ids)
    }

    pub fn tokens(mut self, count: u64) -> Self {
        self.invocations = (0..count).collect();
        self
    }

    pub fn dots(mut self, ids: &[u64]) -> Self {
        self.dots.extend(ids.iter().map(|id| (*id, dot_hash(*id))));
        self
    }

    /// Report an invocation count different from the token list
    pub fn invocation_count(mut self, count: u64) -> Self {
        self.invocation_count = Some(count);
        self
    }

    pub fn manifest_cid(self, cid: impl Into<String>) -> Self {
        self.set_manifest_cid(cid);
        self
    }

    pub fn gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    /// Always serve the first page, like a backend that drops the cursor
    pub fn ignoring_cursor(mut self) -> Self {
        self.ignore_cursor = true;
        self
    }

    /// Mirror an on-chain dependency update
    pub fn set_manifest_cid(&self, cid: impl Into<String>) {
        *self.manifest_cid.lock().unwrap_or_else(|e| e.into_inner()) = Some(cid.into());
    }

    /// Make every query fail with a transport error
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Cursors of every `tokens_page` call, in order
    pub fn page_requests(&self) -> Vec<Option<u64>> {
        snapshot(&self.page_log)
    }

    /// Chunk size of every `dot_tokens_page` call, in order
    pub fn dot_requests(&self) -> Vec<usize> {
        snapshot(&self.dot_log)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Network("mock indexer unavailable".to_string()))
        }
    }
}

impl Default for MockIndexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexerSource for MockIndexer {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn project_info(&self, _project: &ProjectRef) -> Result<ProjectInfo> {
        self.check_available()?;
        Ok(ProjectInfo {
            invocations: self
                .invocation_count
                .unwrap_or(self.invocations.len() as u64),
            manifest_cid: self.manifest_cid.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            gateway: self.gateway.clone(),
        })
    }

    async fn tokens_page(&self, project: &ProjectRef, since: Option<u64>) -> Result<Vec<TokenRecord>> {
        self.check_available()?;
        record(&self.page_log, since);

        let since = if self.ignore_cursor { None } else { since };
        Ok(self
            .invocations
            .iter()
            .filter(|inv| since.map(|s| **inv > s).unwrap_or(true))
            .take(PAGE_SIZE)
            .map(|inv| {
                let token_id = project.project_id * TOKENS_PER_PROJECT + inv;
                TokenRecord {
                    id: project.token_key(token_id),
                    token_id,
                    invocation: *inv,
                }
            })
            .collect())
    }

    async fn dot_tokens_page(&self, _project: &ProjectRef, token_ids: &[u64]) -> Result<Vec<DotToken>> {
        self.check_available()?;
        record(&self.dot_log, token_ids.len());

        Ok(token_ids
            .iter()
            .filter_map(|id| {
                self.dots.get(id).map(|hash| DotToken {
                    token_id: *id,
                    hash: hash.clone(),
                })
            })
            .collect())
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Minter and engine contracts in one
pub struct MockChain {
    redemptions: RwLock<HashMap<u64, Vec<u64>>>,
    delays: HashMap<u64, Duration>,
    failures: HashSet<u64>,
    commit_status: u64,
    commits: Mutex<Vec<(ProjectRef, String)>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            redemptions: RwLock::new(HashMap::new()),
            delays: HashMap::new(),
            failures: HashSet::new(),
            commit_status: 1,
            commits: Mutex::new(Vec::new()),
        }
    }

    pub fn with_redemptions(mut self, token_id: u64, dots: &[u64]) -> Self {
        self.redemptions.get_mut().insert(token_id, dots.to_vec());
        self
    }

    /// Delay the redemption read for `token_id`
    pub fn with_delay(mut self, token_id: u64, millis: u64) -> Self {
        self.delays.insert(token_id, Duration::from_millis(millis));
        self
    }

    /// Fail the redemption read for `token_id`
    pub fn with_failure(mut self, token_id: u64) -> Self {
        self.failures.insert(token_id);
        self
    }

    /// Receipt status for commits (1 = success)
    pub fn with_commit_status(mut self, status: u64) -> Self {
        self.commit_status = status;
        self
    }

    /// Record a new redemption between runs
    pub async fn redeem(&self, token_id: u64, dots: &[u64]) {
        self.redemptions
            .write()
            .await
            .entry(token_id)
            .or_default()
            .extend_from_slice(dots);
    }

    /// `(project, cid)` of every commit, in order
    pub fn commits(&self) -> Vec<(ProjectRef, String)> {
        snapshot(&self.commits)
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RedemptionReader for MockChain {
    async fn redeemed_dots_for(&self, _engine: &str, token_id: u64) -> Result<Vec<u64>> {
        if let Some(delay) = self.delays.get(&token_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(&token_id) {
            return Err(SyncError::ChainRead(format!("redeemedDotsFor({}) reverted", token_id)));
        }
        Ok(self
            .redemptions
            .read()
            .await
            .get(&token_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ManifestCommitter for MockChain {
    async fn commit(&self, project: &ProjectRef, cid: &str) -> Result<CommitReceipt> {
        let mut commits = self.commits.lock().unwrap_or_else(|e| e.into_inner());
        commits.push((project.clone(), cid.to_string()));

        let receipt = CommitReceipt {
            tx_hash: format!("0x{:064x}", commits.len()),
            block_number: Some(commits.len() as u64),
            status: self.commit_status,
        };
        if !receipt.succeeded() {
            return Err(SyncError::Commit(format!("transaction {} reverted", receipt.tx_hash)));
        }
        Ok(receipt)
    }
}

// ============================================================================
// Content store
// ============================================================================

/// Content-addressed map of pinned documents
pub struct InMemoryContentStore {
    documents: RwLock<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
    pin_count: AtomicU32,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            pin_count: AtomicU32::new(0),
        }
    }

    /// CIDv1 (json codec, sha3-256) of `bytes`
    pub fn content_id(bytes: &[u8]) -> Result<String> {
        let digest = Sha3_256::digest(bytes);
        let hash = cid::multihash::Multihash::<64>::wrap(0x16, &digest)
            .map_err(|e| SyncError::Publish(format!("multihash: {}", e)))?;
        Ok(cid::Cid::new_v1(0x0200, hash).to_string())
    }

    /// Make pins fail with a transport error
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    /// Pinned bytes, if any
    pub async fn document(&self, cid: &str) -> Option<Vec<u8>> {
        self.documents.read().await.get(cid).cloned()
    }

    /// Stored manifest, if any
    pub async fn manifest(&self, cid: &str) -> Option<Manifest> {
        let documents = self.documents.read().await;
        documents.get(cid).and_then(|bytes| Manifest::from_json(bytes).ok())
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn fetch_manifest(&self, cid: &str, _gateway_hint: Option<&str>) -> Result<Manifest> {
        let documents = self.documents.read().await;
        let bytes = documents
            .get(cid)
            .ok_or_else(|| SyncError::NotFound(format!("manifest {} not pinned", cid)))?;
        Manifest::from_json(bytes)
    }

    async fn pin_manifest(&self, manifest: &Manifest, _name: &str) -> Result<String> {
        self.pin_count.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::Publish("pinning service unreachable".to_string()));
        }

        let bytes = manifest.to_canonical_json()?;
        let cid = Self::content_id(&bytes)?;
        self.documents.write().await.insert(cid.clone(), bytes);
        Ok(cid)
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Records refresh requests
pub struct RecordingNotifier {
    available: AtomicBool,
    requests: Mutex<Vec<RefreshTarget>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail like a rejected auth challenge
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every attempted refresh, failed ones included
    pub fn requests(&self) -> Vec<RefreshTarget> {
        snapshot(&self.requests)
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefreshNotifier for RecordingNotifier {
    async fn refresh(&self, target: &RefreshTarget) -> Result<()> {
        record(&self.requests, target.clone());
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::Notify("getAuthMessage failed: challenge unavailable".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_content_store_is_content_addressed() {
        let store = InMemoryContentStore::new();
        let manifest = Manifest::new();

        let first = store.pin_manifest(&manifest, "a").await.unwrap();
        let second = store.pin_manifest(&manifest, "b").await.unwrap();

        assert_eq!(first, second);
        assert!(crate::publisher::validate_cid(&first).is_ok());
        assert_eq!(store.fetch_manifest(&first, None).await.unwrap(), manifest);
        assert!(matches!(
            store.fetch_manifest("bafy-missing", None).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_chain_redeem_appends() {
        let chain = MockChain::new().with_redemptions(7, &[1]);
        chain.redeem(7, &[2]).await;
        assert_eq!(chain.redeemed_dots_for("0xengine", 7).await.unwrap(), vec![1, 2]);
        assert!(chain.redeemed_dots_for("0xengine", 8).await.unwrap().is_empty());
    }
}
