//! Indexer query clients
//!
//! Read-only access to the metadata index that tracks projects and tokens.
//! Two dialects are supported behind [`IndexerSource`]:
//!
//! - **Hasura**: `projects_metadata` / `tokens_metadata` tables
//! - **Subgraph**: `project(id)` entities keyed by `{contract}-{projectId}`
//!
//! Pagination is shared: pages of [`PAGE_SIZE`] records ordered by
//! invocation, the cursor being the last invocation returned.

pub mod graphql;
pub mod hasura;
pub mod subgraph;

use async_trait::async_trait;
use tracing::debug;

use crate::manifest::DotToken;
use crate::types::{ProjectRef, ProjectInfo, Result, SyncError, TokenRecord};

pub use graphql::{BearerAuth, GraphQlClient};
pub use hasura::HasuraIndexer;
pub use subgraph::SubgraphIndexer;

/// Records per indexer page
pub const PAGE_SIZE: usize = 900;

/// Indexer dialect selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum IndexerKind {
    Hasura,
    Subgraph,
}

/// Read queries the refresh job needs from an indexer
#[async_trait]
pub trait IndexerSource: Send + Sync {
    /// Dialect name, for logs
    fn name(&self) -> &'static str;

    /// Invocation count and external dependency slot 0
    async fn project_info(&self, project: &ProjectRef) -> Result<ProjectInfo>;

    /// Up to [`PAGE_SIZE`] tokens with invocation strictly greater than
    /// `since` (`None` for the first page), ascending
    async fn tokens_page(&self, project: &ProjectRef, since: Option<u64>) -> Result<Vec<TokenRecord>>;

    /// Dots for at most [`PAGE_SIZE`] token ids. Tokens the indexer does not
    /// know, or knows without a hash, are omitted.
    async fn dot_tokens_page(&self, project: &ProjectRef, token_ids: &[u64]) -> Result<Vec<DotToken>>;

    /// Batched dot lookup of any size
    async fn dot_tokens(&self, project: &ProjectRef, token_ids: &[u64]) -> Result<Vec<DotToken>> {
        let mut dots = Vec::with_capacity(token_ids.len());
        for chunk in token_ids.chunks(PAGE_SIZE) {
            dots.extend(self.dot_tokens_page(project, chunk).await?);
        }
        Ok(dots)
    }

    /// Every token of the project, strictly ascending by invocation
    async fn all_tokens(&self, project: &ProjectRef) -> Result<Vec<TokenRecord>> {
        let mut tokens: Vec<TokenRecord> = Vec::new();
        let mut cursor: Option<u64> = None;

        loop {
            let page = self.tokens_page(project, cursor).await?;
            let page_len = page.len();
            debug!(source = self.name(), cursor = ?cursor, page_len = page_len, "Fetched token page");

            if page_len >= PAGE_SIZE && page.last().map(|t| t.invocation) == cursor {
                return Err(SyncError::Protocol(format!(
                    "Indexer pagination cursor did not advance past {:?}",
                    cursor
                )));
            }

            for token in page {
                if let Some(last) = tokens.last() {
                    if token.invocation <= last.invocation {
                        return Err(SyncError::Protocol(format!(
                            "Indexer returned invocation {} after {}, expected strictly ascending",
                            token.invocation, last.invocation
                        )));
                    }
                }
                tokens.push(token);
            }

            if page_len < PAGE_SIZE {
                break;
            }
            cursor = tokens.last().map(|t| t.invocation);
        }

        Ok(tokens)
    }

    /// Invocation indices of every token, ascending
    async fn all_token_indices(&self, project: &ProjectRef) -> Result<Vec<u64>> {
        Ok(self
            .all_tokens(project)
            .await?
            .into_iter()
            .map(|t| t.invocation)
            .collect())
    }
}

/// Cursor value for `invocation > cursor` filters; the first page uses -1
pub(crate) fn cursor_value(since: Option<u64>) -> i64 {
    since.map(|v| v as i64).unwrap_or(-1)
}
