//! Dots minter view calls

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::abi::{self, Token};
use super::{RedemptionReader, RpcClient};
use crate::types::{Result, SyncError};

const REDEEMED_DOTS_FOR: &str = "redeemedDotsFor(address,uint256)";

/// Reads `redeemedDotsFor` from the minter contract
pub struct DotsMinterReader {
    rpc: Arc<RpcClient>,
    minter: String,
}

impl DotsMinterReader {
    pub fn new(rpc: Arc<RpcClient>, minter: impl Into<String>) -> Self {
        Self {
            rpc,
            minter: minter.into(),
        }
    }
}

#[async_trait]
impl RedemptionReader for DotsMinterReader {
    async fn redeemed_dots_for(&self, engine: &str, token_id: u64) -> Result<Vec<u64>> {
        let engine_address = abi::parse_address(engine)
            .map_err(|e| SyncError::ChainRead(format!("redeemedDotsFor({}): {}", token_id, e)))?;

        let data = abi::encode_call(
            REDEEMED_DOTS_FOR,
            &[Token::Address(engine_address), Token::Uint(token_id)],
        );

        let output = self
            .rpc
            .call(&self.minter, &data)
            .await
            .map_err(|e| SyncError::ChainRead(format!("redeemedDotsFor({}): {}", token_id, e)))?;

        let dots = abi::decode_uint_array(&output)
            .map_err(|e| SyncError::ChainRead(format!("redeemedDotsFor({}) returned bad data: {}", token_id, e)))?;

        debug!(token_id = token_id, dots = ?dots, "Read redeemed dots");
        Ok(dots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENGINE: &str = "0x00000000000000000000000000000000000000aa";

    fn encoded_array(values: &[u64]) -> String {
        let mut out = format!("{:064x}{:064x}", 32, values.len());
        for v in values {
            out.push_str(&format!("{:064x}", v));
        }
        format!("0x{}", out)
    }

    async fn reader_returning(result: serde_json::Value) -> (MockServer, DotsMinterReader) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(result))
            .mount(&server)
            .await;
        let rpc = Arc::new(RpcClient::new(server.uri(), Duration::from_secs(5)));
        let reader = DotsMinterReader::new(rpc, "0x00000000000000000000000000000000000000bb");
        (server, reader)
    }

    #[tokio::test]
    async fn test_reads_redeemed_dots() {
        let (_server, reader) =
            reader_returning(json!({"jsonrpc": "2.0", "id": 1, "result": encoded_array(&[10, 11])})).await;
        assert_eq!(reader.redeemed_dots_for(ENGINE, 7).await.unwrap(), vec![10, 11]);
    }

    #[tokio::test]
    async fn test_empty_redemptions_are_not_an_error() {
        let (_server, reader) =
            reader_returning(json!({"jsonrpc": "2.0", "id": 1, "result": encoded_array(&[])})).await;
        assert!(reader.redeemed_dots_for(ENGINE, 7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rpc_failure_is_chain_read_error() {
        let (_server, reader) = reader_returning(json!({
            "jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "header not found"}
        }))
        .await;
        assert!(matches!(
            reader.redeemed_dots_for(ENGINE, 7).await,
            Err(SyncError::ChainRead(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_return_data_is_chain_read_error() {
        let (_server, reader) = reader_returning(json!({"jsonrpc": "2.0", "id": 1, "result": "0x"})).await;
        assert!(matches!(
            reader.redeemed_dots_for(ENGINE, 7).await,
            Err(SyncError::ChainRead(_))
        ));
    }
}
