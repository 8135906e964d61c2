//! Ledger access
//!
//! - **Redemptions**: `redeemedDotsFor(engine, tokenId)` view on the dots minter
//! - **Commit**: `updateProjectExternalAssetDependency` on the composite engine
//!
//! Both go through [`RpcClient`]; the contract encoding lives in [`abi`] and
//! transaction signing in [`wallet`].

pub mod abi;
pub mod committer;
pub mod minter;
pub mod rlp;
pub mod rpc;
pub mod wallet;

use async_trait::async_trait;

use crate::types::{ProjectRef, Result};

pub use committer::{CommitterConfig, EngineCommitter};
pub use minter::DotsMinterReader;
pub use rpc::{RpcClient, RpcError, TransactionReceipt};
pub use wallet::{LegacyTransaction, Wallet};

/// External asset dependency slot holding the manifest CID
pub const MANIFEST_DEPENDENCY_SLOT: u64 = 0;

/// Dependency type code for IPFS content
pub const DEPENDENCY_TYPE_IPFS: u64 = 0;

/// Reads redemption records from the dots minter
#[async_trait]
pub trait RedemptionReader: Send + Sync {
    /// Dot token ids redeemed toward `token_id` on `engine`, in redemption
    /// order. An empty list means "not redeemed yet"; a failed read is a
    /// `ChainRead` error.
    async fn redeemed_dots_for(&self, engine: &str, token_id: u64) -> Result<Vec<u64>>;
}

/// Included transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    /// 1 on success
    pub status: u64,
}

impl CommitReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// Points a project's manifest dependency slot at a new CID
#[async_trait]
pub trait ManifestCommitter: Send + Sync {
    async fn commit(&self, project: &ProjectRef, cid: &str) -> Result<CommitReceipt>;
}
