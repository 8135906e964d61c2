//! Minimal GraphQL-over-HTTP client shared by the indexers and the notifier

use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::types::{Result, SyncError};

/// Bearer credentials for privileged Hasura operations
#[derive(Debug, Clone)]
pub struct BearerAuth {
    pub token: String,
    /// Sent as `x-hasura-role`
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    operation_name: Option<&'a str>,
    query: &'a str,
    variables: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorItem {
    message: String,
}

/// GraphQL endpoint client
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    endpoint: String,
    http: Client,
}

impl GraphQlClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("dots-refresh/0.1")
            .build()
            .unwrap_or_default();

        Self::with_client(endpoint, http)
    }

    pub fn with_client(endpoint: impl Into<String>, http: Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Anonymous query
    pub async fn query<T: DeserializeOwned>(&self, query: &str, variables: serde_json::Value) -> Result<T> {
        self.execute(None, query, &variables, None).await
    }

    /// Run an operation, optionally authenticated. Transport failures are
    /// `Network`; HTTP errors, GraphQL `errors` and undecodable payloads are
    /// `Protocol`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        operation_name: Option<&str>,
        query: &str,
        variables: &serde_json::Value,
        auth: Option<&BearerAuth>,
    ) -> Result<T> {
        let body = GraphQlRequest {
            operation_name,
            query,
            variables,
        };

        let mut request = self
            .http
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body);

        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", auth.token));
            if let Some(ref role) = auth.role {
                request = request.header("x-hasura-role", role);
            }
        }

        debug!(endpoint = %self.endpoint, operation = ?operation_name, "GraphQL request");

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("GraphQL request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::Protocol(format!(
                "GraphQL endpoint returned HTTP {}: {}",
                status, text
            )));
        }

        let payload: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("Invalid GraphQL response: {}", e)))?;

        if !payload.errors.is_empty() {
            let messages: Vec<String> = payload.errors.into_iter().map(|e| e.message).collect();
            return Err(SyncError::Protocol(format!("GraphQL errors: {}", messages.join("; "))));
        }

        payload
            .data
            .ok_or_else(|| SyncError::Protocol("GraphQL response has no data".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header as header_eq, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Answer {
        value: u32,
    }

    fn client(server: &MockServer) -> GraphQlClient {
        GraphQlClient::new(server.uri(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_returns_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"variables": {"x": 1}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"value": 7}})))
            .mount(&server)
            .await;

        let answer: Answer = client(&server).query("query { value }", json!({"x": 1})).await.unwrap();
        assert_eq!(answer.value, 7);
    }

    #[tokio::test]
    async fn test_graphql_errors_are_protocol_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": null, "errors": [{"message": "boom"}]})),
            )
            .mount(&server)
            .await;

        let result: Result<Answer> = client(&server).query("query { value }", json!({})).await;
        match result {
            Err(SyncError::Protocol(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sends_bearer_and_role() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_eq("authorization", "Bearer jwt-1"))
            .and(header_eq("x-hasura-role", "artist"))
            .and(body_partial_json(json!({"operationName": "Op"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"value": 1}})))
            .expect(1)
            .mount(&server)
            .await;

        let auth = BearerAuth {
            token: "jwt-1".to_string(),
            role: Some("artist".to_string()),
        };
        let answer: Answer = client(&server)
            .execute(Some("Op"), "mutation Op { value }", &json!({}), Some(&auth))
            .await
            .unwrap();
        assert_eq!(answer.value, 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let client = GraphQlClient::new("http://127.0.0.1:1", Duration::from_secs(2));
        let result: Result<Answer> = client.query("query { value }", json!({})).await;
        assert!(matches!(result, Err(SyncError::Network(_))));
    }
}
