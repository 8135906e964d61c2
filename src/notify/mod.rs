//! Downstream media refresh
//!
//! After a manifest commit the rendering service is asked to regenerate
//! features and renders, either for the whole project or for the composite
//! tokens whose entries changed. The call is authenticated with a JWT obtained
//! through [`auth::Authenticator`].

pub mod auth;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::indexer::{BearerAuth, GraphQlClient};
use crate::types::{ProjectRef, Result, SyncError};

pub use auth::{AuthToken, Authenticator};

const UPDATE_PROJECT_MEDIA: &str = r#"
mutation UpdateProjectMedia($projectId: String!, $features: Boolean!, $render: Boolean!, $renderVideo: Boolean!) {
  updateProjectMedia(projectId: $projectId, features: $features, render: $render, renderVideo: $renderVideo) {
    __typename
  }
}
"#;

const UPDATE_TOKEN_MEDIA: &str = r#"
mutation UpdateTokenMedia($tokenIds: [String], $features: Boolean!, $render: Boolean!, $renderVideo: Boolean) {
  updateTokenMedia(tokenIds: $tokenIds, features: $features, render: $render, renderVideo: $renderVideo) {
    token_ids
    __typename
  }
}
"#;

/// Which refresh to request after a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NotifyMode {
    /// Refresh every token of the project
    Project,
    /// Refresh only the composite tokens whose entries were added
    Tokens,
    /// Skip the refresh
    Off,
}

/// What to refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    Project(ProjectRef),
    /// `{contract}-{tokenId}` ids
    Tokens(Vec<String>),
}

impl RefreshTarget {
    pub fn is_empty(&self) -> bool {
        matches!(self, RefreshTarget::Tokens(ids) if ids.is_empty())
    }
}

/// Requests regeneration of derived media
#[async_trait]
pub trait RefreshNotifier: Send + Sync {
    /// Any failure is a `Notify` error
    async fn refresh(&self, target: &RefreshTarget) -> Result<()>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectMediaData {
    update_project_media: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenMediaData {
    update_token_media: Option<serde_json::Value>,
}

/// Media API notifier
pub struct MediaRefreshNotifier {
    client: GraphQlClient,
    authenticator: Authenticator,
    /// `x-hasura-role` for the mutation
    role: Option<String>,
}

impl MediaRefreshNotifier {
    pub fn new(client: GraphQlClient, authenticator: Authenticator, role: Option<String>) -> Self {
        Self {
            client,
            authenticator,
            role,
        }
    }

    async fn bearer(&self) -> Result<BearerAuth> {
        let token = self.authenticator.authenticate().await?;
        Ok(BearerAuth {
            token: token.jwt,
            role: self.role.clone(),
        })
    }
}

#[async_trait]
impl RefreshNotifier for MediaRefreshNotifier {
    async fn refresh(&self, target: &RefreshTarget) -> Result<()> {
        if target.is_empty() {
            return Ok(());
        }
        let auth = self.bearer().await?;

        match target {
            RefreshTarget::Project(project) => {
                let data: ProjectMediaData = self
                    .client
                    .execute(
                        Some("UpdateProjectMedia"),
                        UPDATE_PROJECT_MEDIA,
                        &json!({
                            "projectId": project.project_id.to_string(),
                            "features": true,
                            "render": true,
                            "renderVideo": false,
                        }),
                        Some(&auth),
                    )
                    .await
                    .map_err(|e| SyncError::Notify(format!("updateProjectMedia failed: {}", e)))?;
                if data.update_project_media.is_none() {
                    return Err(SyncError::Notify("updateProjectMedia returned nothing".to_string()));
                }
                info!(project = %project, "Requested project media refresh");
            }
            RefreshTarget::Tokens(token_ids) => {
                let data: TokenMediaData = self
                    .client
                    .execute(
                        Some("UpdateTokenMedia"),
                        UPDATE_TOKEN_MEDIA,
                        &json!({
                            "tokenIds": token_ids,
                            "features": true,
                            "render": true,
                            "renderVideo": false,
                        }),
                        Some(&auth),
                    )
                    .await
                    .map_err(|e| SyncError::Notify(format!("updateTokenMedia failed: {}", e)))?;
                if data.update_token_media.is_none() {
                    return Err(SyncError::Notify("updateTokenMedia returned nothing".to_string()));
                }
                info!(tokens = token_ids.len(), "Requested token media refresh");
            }
        }

        Ok(())
    }
}
