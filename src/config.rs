//! Configuration for the dots refresh job
//!
//! CLI arguments with environment fallbacks (clap). A `.env` file is loaded by
//! the binary before parsing.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::time::Duration;

use crate::indexer::IndexerKind;
use crate::notify::NotifyMode;
use crate::publisher::{DEFAULT_GATEWAY, DEFAULT_PINATA_API};
use crate::types::ProjectRef;

/// dots-refresh - keep the composite manifest in step with dot redemptions
#[derive(Parser, Debug, Clone)]
#[command(name = "dots-refresh")]
#[command(about = "Reconcile the composite dots manifest with on-chain redemptions")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub indexer: IndexerArgs,

    #[command(flatten)]
    pub chain: ChainArgs,

    #[command(flatten)]
    pub pinning: PinningArgs,

    #[command(flatten)]
    pub notify: NotifyArgs,

    /// Composite engine contract
    #[arg(long, env = "SECONDARY_CONTRACT_ADDRESS")]
    pub secondary_contract: String,

    /// Composite project id on the engine
    #[arg(long, env = "SECONDARY_PROJECT_ID")]
    pub secondary_project_id: u64,

    /// Contract the dots are minted on
    #[arg(long, env = "DOTS_CONTRACT_ADDRESS")]
    pub dots_contract: String,

    /// Dots project id
    #[arg(long, env = "DOTS_PROJECT_ID")]
    pub dots_project_id: u64,

    /// Maximum concurrent redemption lookups
    #[arg(long, env = "RESOLVE_CONCURRENCY", default_value = "8")]
    pub resolve_concurrency: usize,

    /// HTTP request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Start from an empty manifest when the project has no dependency CID yet
    #[arg(long, env = "BOOTSTRAP_EMPTY_MANIFEST", default_value = "false")]
    pub bootstrap_empty_manifest: bool,

    /// Build and diff only; never pin, commit or notify
    #[arg(long, env = "DRY_RUN", default_value = "false")]
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reconcile, publish, commit and notify (default)
    Run,
    /// Re-send the media refresh for the current manifest
    Notify,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Indexer endpoints
#[derive(ClapArgs, Debug, Clone)]
pub struct IndexerArgs {
    /// Which indexer answers project and token queries
    #[arg(long, env = "INDEXER_SOURCE", value_enum, default_value = "hasura")]
    pub indexer_source: IndexerKind,

    /// Hasura endpoint (metadata queries, auth and media mutations)
    #[arg(long, env = "HASURA_GRAPHQL_ENDPOINT")]
    pub hasura_endpoint: Option<String>,

    /// Subgraph endpoint
    #[arg(long, env = "AB_GRAPH_ENDPOINT")]
    pub subgraph_endpoint: Option<String>,
}

/// Ledger access
#[derive(ClapArgs, Debug, Clone)]
pub struct ChainArgs {
    /// JSON-RPC provider base URL
    #[arg(long, env = "RPC_PROVIDER_URL")]
    pub rpc_provider_url: String,

    /// Provider key appended to the base URL as a path segment
    #[arg(long, env = "ALCHEMY_API_KEY")]
    pub alchemy_api_key: Option<String>,

    /// Older name for the provider key; used when `ALCHEMY_API_KEY` is unset
    #[arg(long, env = "ALCHEMY_KEY", hide = true)]
    pub alchemy_key: Option<String>,

    /// Dots minter contract (`redeemedDotsFor`)
    #[arg(long, env = "DOTS_MINTER_CONTRACT_ADDRESS")]
    pub dots_minter_contract: String,

    /// Operator private key (hex)
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Expected operator address; checked against the key
    #[arg(long, env = "PUBLIC_ADDRESS")]
    pub public_address: Option<String>,

    /// Receipt poll interval in milliseconds
    #[arg(long, env = "RECEIPT_POLL_MS", default_value = "4000")]
    pub receipt_poll_ms: u64,

    /// Give up waiting for a receipt after this many seconds
    #[arg(long, env = "RECEIPT_TIMEOUT_SECS", default_value = "300")]
    pub receipt_timeout_secs: u64,
}

/// Pinning service
#[derive(ClapArgs, Debug, Clone)]
pub struct PinningArgs {
    #[arg(long, env = "PINATA_API_KEY", hide_env_values = true)]
    pub pinata_api_key: String,

    #[arg(long, env = "PINATA_SECRET_API_KEY", hide_env_values = true)]
    pub pinata_secret_api_key: String,

    #[arg(long, env = "PINATA_API_URL", default_value = DEFAULT_PINATA_API)]
    pub pinata_api_url: String,

    /// Gateway used when the project does not advertise one
    #[arg(long, env = "IPFS_GATEWAY", default_value = DEFAULT_GATEWAY)]
    pub ipfs_gateway: String,
}

/// Media refresh
#[derive(ClapArgs, Debug, Clone)]
pub struct NotifyArgs {
    #[arg(long, env = "NOTIFY_MODE", value_enum, default_value = "project")]
    pub notify_mode: NotifyMode,

    /// Domain in the sign-in challenge
    #[arg(long, env = "AUTH_DOMAIN", default_value = "r4v3n.art")]
    pub auth_domain: String,

    /// URI in the sign-in challenge
    #[arg(long, env = "AUTH_URI", default_value = "https://r4v3n.art/builder")]
    pub auth_uri: String,

    /// `x-hasura-role` for media mutations
    #[arg(long, env = "AUTH_ROLE", default_value = "artist")]
    pub auth_role: String,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }

    pub fn project(&self) -> ProjectRef {
        ProjectRef::new(self.secondary_contract.clone(), self.secondary_project_id)
    }

    pub fn dots_project(&self) -> ProjectRef {
        ProjectRef::new(self.dots_contract.clone(), self.dots_project_id)
    }

    /// `{RPC_PROVIDER_URL}/{ALCHEMY_API_KEY}`, or the base URL alone
    pub fn rpc_url(&self) -> String {
        let base = self.chain.rpc_provider_url.trim_end_matches('/');
        let key = [&self.chain.alchemy_api_key, &self.chain.alchemy_key]
            .into_iter()
            .filter_map(|k| k.as_deref())
            .find(|k| !k.is_empty());
        match key {
            Some(key) => format!("{}/{}", base, key),
            None => base.to_string(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Endpoint for the selected indexer
    pub fn indexer_endpoint(&self) -> Option<&str> {
        match self.indexer.indexer_source {
            IndexerKind::Hasura => self.indexer.hasura_endpoint.as_deref(),
            IndexerKind::Subgraph => self.indexer.subgraph_endpoint.as_deref(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.indexer_endpoint().is_none() {
            return Err(match self.indexer.indexer_source {
                IndexerKind::Hasura => "HASURA_GRAPHQL_ENDPOINT is required for the hasura indexer".to_string(),
                IndexerKind::Subgraph => "AB_GRAPH_ENDPOINT is required for the subgraph indexer".to_string(),
            });
        }

        if self.notify.notify_mode != NotifyMode::Off && self.indexer.hasura_endpoint.is_none() {
            return Err("HASURA_GRAPHQL_ENDPOINT is required unless NOTIFY_MODE=off".to_string());
        }

        if self.command() == Command::Notify && self.notify.notify_mode == NotifyMode::Off {
            return Err("notify subcommand needs NOTIFY_MODE project or tokens".to_string());
        }

        for (name, address) in [
            ("SECONDARY_CONTRACT_ADDRESS", &self.secondary_contract),
            ("DOTS_CONTRACT_ADDRESS", &self.dots_contract),
            ("DOTS_MINTER_CONTRACT_ADDRESS", &self.chain.dots_minter_contract),
        ] {
            if crate::chain::abi::parse_address(address).is_err() {
                return Err(format!("{} is not a 20-byte hex address: {}", name, address));
            }
        }

        if self.resolve_concurrency == 0 {
            return Err("RESOLVE_CONCURRENCY must be at least 1".to_string());
        }

        if self.chain.receipt_poll_ms == 0 {
            return Err("RECEIPT_POLL_MS must be greater than zero".to_string());
        }

        Ok(())
    }
}
