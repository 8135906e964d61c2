//! Hasura metadata indexer (`projects_metadata` / `tokens_metadata`)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{cursor_value, GraphQlClient, IndexerSource, PAGE_SIZE};
use crate::manifest::DotToken;
use crate::types::{deserialize_flexible_u64, ProjectInfo, ProjectRef, Result, SyncError, TokenRecord};

const PROJECT_INFO_QUERY: &str = r#"query GetCompositeDeps($contractAddress: String!, $projectId: String!) {
  projects_metadata(where: {contract_address: {_eq: $contractAddress}, project_id: {_eq: $projectId}}) {
    id
    invocations
    project_id
    contract_address
    external_asset_dependencies {
      cid
    }
  }
}"#;

const TOKENS_QUERY: &str = r#"query GetCompositeTokens($contractAddress: String!, $projectId: String!, $lastTokenId: Int!, $limit: Int!) {
  tokens_metadata(where: {contract_address: {_eq: $contractAddress}, project_id: {_eq: $projectId}, invocation: {_gt: $lastTokenId}}, limit: $limit, order_by: {invocation: asc}) {
    id
    token_id
    invocation
  }
}"#;

const DOTS_QUERY: &str = r#"query GetDotsTokens($contractAddress: String!, $projectId: String!, $dotTokenIds: [String!], $limit: Int!) {
  tokens_metadata(where: {contract_address: {_eq: $contractAddress}, project_id: {_eq: $projectId}, token_id: {_in: $dotTokenIds}}, limit: $limit) {
    hash
    token_id
  }
}"#;

#[derive(Debug, Deserialize)]
struct ProjectsData {
    projects_metadata: Vec<HasuraProject>,
}

#[derive(Debug, Deserialize)]
struct HasuraProject {
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    invocations: u64,
    #[serde(default)]
    external_asset_dependencies: Vec<HasuraDependency>,
}

#[derive(Debug, Deserialize)]
struct HasuraDependency {
    cid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokensData {
    tokens_metadata: Vec<HasuraToken>,
}

#[derive(Debug, Deserialize)]
struct HasuraToken {
    id: String,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    token_id: u64,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    invocation: u64,
}

#[derive(Debug, Deserialize)]
struct DotsData {
    tokens_metadata: Vec<HasuraDot>,
}

#[derive(Debug, Deserialize)]
struct HasuraDot {
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    token_id: u64,
    hash: Option<String>,
}

/// Indexer backed by the Hasura metadata API
pub struct HasuraIndexer {
    client: GraphQlClient,
}

impl HasuraIndexer {
    pub fn new(client: GraphQlClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IndexerSource for HasuraIndexer {
    fn name(&self) -> &'static str {
        "hasura"
    }

    async fn project_info(&self, project: &ProjectRef) -> Result<ProjectInfo> {
        let data: ProjectsData = self
            .client
            .query(
                PROJECT_INFO_QUERY,
                json!({
                    "contractAddress": project.contract_lower(),
                    "projectId": project.project_id.to_string(),
                }),
            )
            .await?;

        let record = data
            .projects_metadata
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::NotFound(format!("Project {} not found in indexer", project)))?;

        let manifest_cid = record
            .external_asset_dependencies
            .into_iter()
            .next()
            .and_then(|dep| dep.cid)
            .filter(|cid| !cid.is_empty());

        Ok(ProjectInfo {
            invocations: record.invocations,
            manifest_cid,
            gateway: None,
        })
    }

    async fn tokens_page(&self, project: &ProjectRef, since: Option<u64>) -> Result<Vec<TokenRecord>> {
        let data: TokensData = self
            .client
            .query(
                TOKENS_QUERY,
                json!({
                    "contractAddress": project.contract_lower(),
                    "projectId": project.project_id.to_string(),
                    "lastTokenId": cursor_value(since),
                    "limit": PAGE_SIZE,
                }),
            )
            .await?;

        Ok(data
            .tokens_metadata
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
        let data: DotsData = self
            .client
            .query(
                DOTS_QUERY,
                json!({
                    "contractAddress": project.contract_lower(),
                    "projectId": project.project_id.to_string(),
                    "dotTokenIds": ids,
                    "limit": PAGE_SIZE,
                }),
            )
            .await?;

        let dots: Vec<DotToken> = data
            .tokens_metadata
            .into_iter()
            .filter_map(|d| d.hash.map(|hash| DotToken { token_id: d.token_id, hash }))
            .collect();
        debug!(requested = token_ids.len(), found = dots.len(), "Resolved dot tokens");
        Ok(dots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn indexer(server: &MockServer) -> HasuraIndexer {
        HasuraIndexer::new(GraphQlClient::new(server.uri(), Duration::from_secs(5)))
    }

    fn token_rows(range: std::ops::Range<u64>) -> Vec<serde_json::Value> {
        range
            .map(|i| json!({"id": format!("0xabc-{}", 5_000_000 + i), "token_id": (5_000_000 + i).to_string(), "invocation": i}))
            .collect()
    }

    #[tokio::test]
    async fn test_project_info() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"variables": {"contractAddress": "0xabc", "projectId": "5"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"projects_metadata": [{
                    "id": "0xabc-5", "invocations": 12, "project_id": "5", "contract_address": "0xabc",
                    "external_asset_dependencies": [{"cid": "bafyold"}]
                }]}
            })))
            .mount(&server)
            .await;

        let info = indexer(&server).project_info(&ProjectRef::new("0xABC", 5)).await.unwrap();
        assert_eq!(info.invocations, 12);
        assert_eq!(info.manifest_cid.as_deref(), Some("bafyold"));
    }

    #[tokio::test]
    async fn test_missing_project_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"projects_metadata": []}})))
            .mount(&server)
            .await;

        let result = indexer(&server).project_info(&ProjectRef::new("0xabc", 5)).await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_paginates_with_last_invocation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"variables": {"lastTokenId": -1}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"tokens_metadata": token_rows(0..900)}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"variables": {"lastTokenId": 899}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"tokens_metadata": token_rows(900..937)}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tokens = indexer(&server).all_tokens(&ProjectRef::new("0xabc", 5)).await.unwrap();
        assert_eq!(tokens.len(), 937);
        assert_eq!(tokens[936].token_id, 5_000_936);
        assert!(tokens.windows(2).all(|w| w[0].invocation < w[1].invocation));
    }

    #[tokio::test]
    async fn test_dots_without_hash_are_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"variables": {"dotTokenIds": ["10", "11"]}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"tokens_metadata": [
                    {"token_id": "10", "hash": "0xaa"},
                    {"token_id": "11", "hash": null}
                ]}
            })))
            .mount(&server)
            .await;

        let dots = indexer(&server)
            .dot_tokens(&ProjectRef::new("0xdots", 0), &[10, 11])
            .await
            .unwrap();
        assert_eq!(dots, vec![DotToken { token_id: 10, hash: "0xaa".to_string() }]);
    }
}
