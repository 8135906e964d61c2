//! Manifest CID commit
//!
//! Writes the new CID into the project's external asset dependency slot with a
//! signed legacy transaction, then polls for the receipt until it is included
//! or the wait times out.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::abi::{self, Token};
use super::{
    CommitReceipt, LegacyTransaction, ManifestCommitter, RpcClient, Wallet, DEPENDENCY_TYPE_IPFS,
    MANIFEST_DEPENDENCY_SLOT,
};
use crate::types::{ProjectRef, Result, SyncError};

const UPDATE_DEPENDENCY: &str = "updateProjectExternalAssetDependency(uint256,uint256,string,uint8)";

#[derive(Debug, Clone)]
pub struct CommitterConfig {
    pub poll_interval: Duration,
    pub receipt_timeout: Duration,
    /// Added on top of `eth_estimateGas`
    pub gas_headroom_percent: u64,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(4),
            receipt_timeout: Duration::from_secs(300),
            gas_headroom_percent: 20,
        }
    }
}

/// Commits through the composite engine contract
pub struct EngineCommitter {
    rpc: Arc<RpcClient>,
    wallet: Arc<Wallet>,
    config: CommitterConfig,
}

/// Calldata for the dependency update
pub fn update_dependency_calldata(project_id: u64, cid: &str) -> Vec<u8> {
    abi::encode_call(
        UPDATE_DEPENDENCY,
        &[
            Token::Uint(project_id),
            Token::Uint(MANIFEST_DEPENDENCY_SLOT),
            Token::String(cid),
            Token::Uint(DEPENDENCY_TYPE_IPFS),
        ],
    )
}

fn commit_error(step: &str) -> impl Fn(super::RpcError) -> SyncError + '_ {
    move |e| SyncError::Commit(format!("{}: {}", step, e))
}

impl EngineCommitter {
    pub fn new(rpc: Arc<RpcClient>, wallet: Arc<Wallet>, config: CommitterConfig) -> Self {
        Self { rpc, wallet, config }
    }

    async fn build_transaction(&self, to: [u8; 20], to_hex: &str, data: Vec<u8>) -> Result<LegacyTransaction> {
        let from = self.wallet.address_hex();

        let chain_id = self.rpc.chain_id().await.map_err(commit_error("eth_chainId"))?;
        let nonce = self
            .rpc
            .transaction_count(&from)
            .await
            .map_err(commit_error("eth_getTransactionCount"))?;
        let gas_price = self.rpc.gas_price().await.map_err(commit_error("eth_gasPrice"))?;
        let estimate = self
            .rpc
            .estimate_gas(&from, to_hex, &data)
            .await
            .map_err(commit_error("eth_estimateGas"))?;
        let gas_limit = estimate.saturating_add(estimate.saturating_mul(self.config.gas_headroom_percent) / 100);

        debug!(
            chain_id = chain_id,
            nonce = nonce,
            gas_price = %gas_price,
            gas_limit = gas_limit,
            "Built dependency update transaction"
        );

        Ok(LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to,
            value: 0,
            data,
            chain_id,
        })
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<CommitReceipt> {
        let deadline = tokio::time::Instant::now() + self.config.receipt_timeout;

        loop {
            match self.rpc.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    return Ok(CommitReceipt {
                        tx_hash: receipt.transaction_hash.clone(),
                        block_number: receipt.block(),
                        status: receipt.status_code().unwrap_or(0),
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(tx_hash = tx_hash, error = %e, "Receipt poll failed, retrying"),
            }

            if tokio::time::Instant::now() + self.config.poll_interval > deadline {
                return Err(SyncError::Commit(format!(
                    "transaction {} not confirmed within {:?}",
                    tx_hash, self.config.receipt_timeout
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl ManifestCommitter for EngineCommitter {
    async fn commit(&self, project: &ProjectRef, cid: &str) -> Result<CommitReceipt> {
        let to = abi::parse_address(&project.contract)
            .map_err(|e| SyncError::Commit(format!("engine address: {}", e)))?;
        let to_hex = project.contract_lower();

        let data = update_dependency_calldata(project.project_id, cid);
        let tx = self.build_transaction(to, &to_hex, data).await?;
        let raw = self.wallet.sign_transaction(&tx)?;

        let tx_hash = self
            .rpc
            .send_raw_transaction(&raw)
            .await
            .map_err(commit_error("eth_sendRawTransaction"))?;
        info!(project = %project, cid = cid, tx_hash = %tx_hash, "Submitted dependency update");

        let receipt = self.wait_for_receipt(&tx_hash).await?;
        if !receipt.succeeded() {
            return Err(SyncError::Commit(format!(
                "transaction {} reverted (status {})",
                receipt.tx_hash, receipt.status
            )));
        }

        info!(
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            "Dependency update confirmed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const ENGINE: &str = "0x00000000000000000000000000000000000000AA";
    const TX_HASH: &str = "0x00000000000000000000000000000000000000000000000000000000000000f1";

    async fn answer(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": rpc_method})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result})),
            )
            .mount(server)
            .await;
    }

    async fn node_with_receipt(receipt: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        answer(&server, "eth_chainId", json!("0x1")).await;
        answer(&server, "eth_getTransactionCount", json!("0x5")).await;
        answer(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
        answer(&server, "eth_estimateGas", json!("0x186a0")).await;
        answer(&server, "eth_sendRawTransaction", json!(TX_HASH)).await;
        answer(&server, "eth_getTransactionReceipt", receipt).await;
        server
    }

    fn committer(server: &MockServer, receipt_timeout: Duration) -> EngineCommitter {
        let rpc = Arc::new(RpcClient::new(server.uri(), Duration::from_secs(5)));
        let wallet = Arc::new(Wallet::from_private_key(KEY).unwrap());
        EngineCommitter::new(
            rpc,
            wallet,
            CommitterConfig {
                poll_interval: Duration::from_millis(10),
                receipt_timeout,
                gas_headroom_percent: 20,
            },
        )
    }

    #[test]
    fn test_calldata_layout() {
        let data = update_dependency_calldata(3, "bafy");
        assert_eq!(&data[..4], &abi::selector(UPDATE_DEPENDENCY));
        // project id, slot, string offset, type, then length and padded bytes
        assert_eq!(data.len(), 4 + 32 * 6);
        assert_eq!(data[4 + 31], 3);
        assert_eq!(data[4 + 32 * 2 + 31], 0x80);
        assert_eq!(data[4 + 32 * 4 + 31], 4);
        assert_eq!(&data[4 + 32 * 5..4 + 32 * 5 + 4], b"bafy");
    }

    #[tokio::test]
    async fn test_commit_confirmed() {
        let server = node_with_receipt(json!({
            "transactionHash": TX_HASH, "blockNumber": "0x64", "status": "0x1"
        }))
        .await;
        let committer = committer(&server, Duration::from_secs(5));

        let receipt = committer
            .commit(&ProjectRef::new(ENGINE, 3), "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi")
            .await
            .unwrap();
        assert_eq!(receipt.tx_hash, TX_HASH);
        assert_eq!(receipt.block_number, Some(100));
        assert!(receipt.succeeded());
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_commit_error() {
        let server = node_with_receipt(json!({
            "transactionHash": TX_HASH, "blockNumber": "0x64", "status": "0x0"
        }))
        .await;
        let committer = committer(&server, Duration::from_secs(5));

        match committer.commit(&ProjectRef::new(ENGINE, 3), "bafy").await {
            Err(SyncError::Commit(msg)) => assert!(msg.contains("reverted")),
            other => panic!("expected commit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receipt_timeout_is_commit_error() {
        let server = node_with_receipt(serde_json::Value::Null).await;
        let committer = committer(&server, Duration::from_millis(50));

        match committer.commit(&ProjectRef::new(ENGINE, 3), "bafy").await {
            Err(SyncError::Commit(msg)) => assert!(msg.contains("not confirmed")),
            other => panic!("expected commit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_failure_is_commit_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "insufficient funds"}
            })))
            .mount(&server)
            .await;
        let committer = committer(&server, Duration::from_secs(1));

        assert!(matches!(
            committer.commit(&ProjectRef::new(ENGINE, 3), "bafy").await,
            Err(SyncError::Commit(_))
        ));
    }
}
