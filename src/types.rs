//! Shared types for the dots refresh job
//!
//! Error taxonomy, project/token records and the run result reported to the
//! triggering wrapper.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Errors that can terminate (or, for `Notify`, be logged by) a refresh run
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transport failure talking to the indexer, gateway or RPC node
    #[error("Network error: {0}")]
    Network(String),

    /// Project, dependency or document missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed or contract-violating response from a collaborator
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Ledger view call failed (never treated as "no redemptions")
    #[error("Chain read error: {0}")]
    ChainRead(String),

    /// Manifest upload failed, nothing mutable was touched
    #[error("Publish error: {0}")]
    Publish(String),

    /// Transaction reverted, timed out or could not be submitted
    #[error("Commit error: {0}")]
    Commit(String),

    /// Downstream refresh failed
    #[error("Notify error: {0}")]
    Notify(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Stable identifier of the error class, used in run results
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Network(_) => "TransientNetworkError",
            SyncError::NotFound(_) => "NotFoundError",
            SyncError::Protocol(_) => "ProtocolError",
            SyncError::ChainRead(_) => "ChainReadError",
            SyncError::Publish(_) => "PublishError",
            SyncError::Commit(_) => "CommitError",
            SyncError::Notify(_) => "NotifyError",
            SyncError::Config(_) => "ConfigError",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// A project on an engine contract
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectRef {
    pub contract: String,
    pub project_id: u64,
}

impl ProjectRef {
    pub fn new(contract: impl Into<String>, project_id: u64) -> Self {
        Self {
            contract: contract.into(),
            project_id,
        }
    }

    /// Contract address in the lowercase form indexers key on
    pub fn contract_lower(&self) -> String {
        self.contract.to_lowercase()
    }

    /// `{contract}-{projectId}` id used by the subgraph and media mutations
    pub fn indexer_id(&self) -> String {
        format!("{}-{}", self.contract_lower(), self.project_id)
    }

    /// `{contract}-{tokenId}` id of a token on this project's contract
    pub fn token_key(&self, token_id: u64) -> String {
        format!("{}-{}", self.contract_lower(), token_id)
    }
}

impl std::fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.contract, self.project_id)
    }
}

/// Project state as reported by the indexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    /// Total minted tokens
    pub invocations: u64,
    /// CID in external dependency slot 0, if any
    pub manifest_cid: Option<String>,
    /// Preferred IPFS gateway advertised by the contract
    pub gateway: Option<String>,
}

/// A minted token of the composite project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub id: String,
    pub token_id: u64,
    pub invocation: u64,
}

/// Error reported in a failed run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunError {
    pub kind: String,
    pub message: String,
}

impl From<&SyncError> for RunError {
    fn from(e: &SyncError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Outcome of one invocation, consumed by the host wrapper and monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: Uuid,
    pub success: bool,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Manifest keys appended by this run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<u64>,
    pub notified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunResult {
    pub fn unchanged(run_id: Uuid) -> Self {
        Self {
            run_id,
            success: true,
            changed: false,
            new_cid: None,
            tx_hash: None,
            added: Vec::new(),
            notified: false,
            error: None,
        }
    }

    pub fn failed(run_id: Uuid, error: &SyncError) -> Self {
        Self {
            run_id,
            success: false,
            changed: false,
            new_cid: None,
            tx_hash: None,
            added: Vec::new(),
            notified: false,
            error: Some(RunError::from(error)),
        }
    }
}

/// Accepts `7`, `"7"` and `"0x7"`; indexers disagree on how they encode ids.
pub fn deserialize_flexible_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Number(u64),
        Text(String),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Number(n) => Ok(n),
        Flexible::Text(s) => parse_u64(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a decimal or `0x`-prefixed hex integer
pub fn parse_u64(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|e| format!("invalid integer {:?}: {}", s, e))
}
