//! Subgraph indexer (`project(id)` entities)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{cursor_value, GraphQlClient, IndexerSource, PAGE_SIZE};
use crate::manifest::DotToken;
use crate::types::{deserialize_flexible_u64, ProjectInfo, ProjectRef, Result, SyncError, TokenRecord};

const PROJECT_INFO_QUERY: &str = r#"query GetCompositeDeps($projectId: ID!) {
  project(id: $projectId) {
    id
    invocations
    contract {
      preferredIPFSGateway
    }
    externalAssetDependencies(first: 1) {
      cid
    }
  }
}"#;

const TOKENS_QUERY: &str = r#"query GetCompositeTokens($projectId: ID!, $lastInvocation: BigInt!, $first: Int!) {
  project(id: $projectId) {
    tokens(where: {invocation_gt: $lastInvocation}, first: $first, orderBy: invocation, orderDirection: asc) {
      id
      tokenId
      invocation
    }
  }
}"#;

const DOTS_QUERY: &str = r#"query GetDotsTokens($projectId: ID!, $dotTokenIds: [BigInt!], $first: Int!) {
  project(id: $projectId) {
    tokens(where: {tokenId_in: $dotTokenIds}, first: $first) {
      hash
      tokenId
    }
  }
}"#;

#[derive(Debug, Deserialize)]
struct ProjectData<T> {
    project: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubgraphProject {
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    invocations: u64,
    contract: Option<SubgraphContract>,
    #[serde(default)]
    external_asset_dependencies: Vec<SubgraphDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubgraphContract {
    #[serde(rename = "preferredIPFSGateway")]
    preferred_ipfs_gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubgraphDependency {
    cid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubgraphTokens<T> {
    tokens: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubgraphToken {
    id: String,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    token_id: u64,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    invocation: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubgraphDot {
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    token_id: u64,
    hash: Option<String>,
}

/// Indexer backed by the public subgraph
pub struct SubgraphIndexer {
    client: GraphQlClient,
}

impl SubgraphIndexer {
    pub fn new(client: GraphQlClient) -> Self {
        Self { client }
    }

    async fn project_tokens<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        project: &ProjectRef,
        variables: serde_json::Value,
    ) -> Result<Vec<T>> {
        let data: ProjectData<SubgraphTokens<T>> = self.client.query(query, variables).await?;
        data.project
            .map(|p| p.tokens)
            .ok_or_else(|| SyncError::NotFound(format!("Project {} not found in subgraph", project)))
    }
}

#[async_trait]
impl IndexerSource for SubgraphIndexer {
    fn name(&self) -> &'static str {
        "subgraph"
    }

    async fn project_info(&self, project: &ProjectRef) -> Result<ProjectInfo> {
        let data: ProjectData<SubgraphProject> = self
            .client
            .query(PROJECT_INFO_QUERY, json!({ "projectId": project.indexer_id() }))
            .await?;

        let record = data
            .project
            .ok_or_else(|| SyncError::NotFound(format!("Project {} not found in subgraph", project)))?;

        Ok(ProjectInfo {
            invocations: record.invocations,
            manifest_cid: record
                .external_asset_dependencies
                .into_iter()
                .next()
                .and_then(|dep| dep.cid)
                .filter(|cid| !cid.is_empty()),
            gateway: record
                .contract
                .and_then(|c| c.preferred_ipfs_gateway)
                .filter(|g| !g.is_empty()),
        })
    }

    async fn tokens_page(&self, project: &ProjectRef, since: Option<u64>) -> Result<Vec<TokenRecord>> {
        let tokens: Vec<SubgraphToken> = self
            .project_tokens(
                TOKENS_QUERY,
                project,
                json!({
                    "projectId": project.indexer_id(),
                    "lastInvocation": cursor_value(since).to_string(),
                    "first": PAGE_SIZE,
                }),
            )
            .await?;

        Ok(tokens
            .into_iter()
            .map(|t| TokenRecord {
                id: t.id,
                token_id: t.token_id,
                invocation: t.invocation,
            })
            .collect())
    }

    async fn dot_tokens_page(&self, project: &ProjectRef, token_ids: &[u64]) -> Result<Vec<DotToken>> {
        let ids: Vec<String> = token_ids.iter().map(|id| id.to_string()).collect();
        let dots: Vec<SubgraphDot> = self
            .project_tokens(
                DOTS_QUERY,
                project,
                json!({
                    "projectId": project.indexer_id(),
                    "dotTokenIds": ids,
                    "first": PAGE_SIZE,
                }),
            )
            .await?;

        Ok(dots
            .into_iter()
            .filter_map(|d| d.hash.map(|hash| DotToken { token_id: d.token_id, hash }))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn indexer(server: &MockServer) -> SubgraphIndexer {
        SubgraphIndexer::new(GraphQlClient::new(server.uri(), Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_project_info_uses_contract_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"variables": {"projectId": "0xabc-7"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"project": {
                    "id": "0xabc-7",
                    "invocations": "42",
                    "contract": {"preferredIPFSGateway": "https://ipfs.example"},
                    "externalAssetDependencies": [{"cid": "bafycurrent"}]
                }}
            })))
            .mount(&server)
            .await;

        let info = indexer(&server).project_info(&ProjectRef::new("0xAbC", 7)).await.unwrap();
        assert_eq!(info.invocations, 42);
        assert_eq!(info.manifest_cid.as_deref(), Some("bafycurrent"));
        assert_eq!(info.gateway.as_deref(), Some("https://ipfs.example"));
    }

    #[tokio::test]
    async fn test_null_project_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"project": null}})))
            .mount(&server)
            .await;

        let result = indexer(&server).tokens_page(&ProjectRef::new("0xabc", 7), None).await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_tokens_page_passes_bigint_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"variables": {"lastInvocation": "899"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"project": {"tokens": [
                    {"id": "0xabc-7000900", "tokenId": "7000900", "invocation": "900"}
                ]}}
            })))
            .mount(&server)
            .await;

        let page = indexer(&server)
            .tokens_page(&ProjectRef::new("0xabc", 7), Some(899))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].invocation, 900);
        assert_eq!(page[0].token_id, 7_000_900);
    }
}
