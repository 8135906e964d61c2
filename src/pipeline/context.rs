//! Per-run context
//!
//! Every collaborator the pipeline talks to is built here, once, and handed
//! to the stages by reference.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::chain::{
    CommitterConfig, DotsMinterReader, EngineCommitter, ManifestCommitter, RedemptionReader, RpcClient, Wallet,
};
use crate::config::Args;
use crate::indexer::{GraphQlClient, HasuraIndexer, IndexerKind, IndexerSource, SubgraphIndexer};
use crate::notify::{Authenticator, MediaRefreshNotifier, NotifyMode, RefreshNotifier};
use crate::publisher::{ContentStore, PinataConfig, PinataStore};
use crate::types::{ProjectRef, Result, SyncError};

/// Headroom added to `eth_estimateGas`
const GAS_HEADROOM_PERCENT: u64 = 20;

/// Run parameters
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Composite project whose manifest is maintained
    pub project: ProjectRef,
    /// Project the dots are minted on
    pub dots_project: ProjectRef,
    pub concurrency: usize,
    pub notify_mode: NotifyMode,
    pub bootstrap_empty_manifest: bool,
    pub dry_run: bool,
}

impl SyncSettings {
    pub fn new(project: ProjectRef, dots_project: ProjectRef) -> Self {
        Self {
            project,
            dots_project,
            concurrency: 8,
            notify_mode: NotifyMode::Project,
            bootstrap_empty_manifest: false,
            dry_run: false,
        }
    }

    /// Engine the redemptions are recorded against
    pub fn engine(&self) -> &str {
        &self.project.contract
    }
}

/// Collaborators for one run
pub struct SyncContext {
    pub settings: SyncSettings,
    pub indexer: Arc<dyn IndexerSource>,
    pub redemptions: Arc<dyn RedemptionReader>,
    pub store: Arc<dyn ContentStore>,
    pub committer: Arc<dyn ManifestCommitter>,
    /// `None` when notification is disabled
    pub notifier: Option<Arc<dyn RefreshNotifier>>,
}

impl SyncContext {
    /// Wire the production collaborators from validated arguments
    pub fn from_args(args: &Args) -> Result<Self> {
        let timeout = args.request_timeout();

        let wallet = Arc::new(Wallet::from_private_key(&args.chain.private_key)?);
        if let Some(expected) = args.chain.public_address.as_deref() {
            if !expected.trim().eq_ignore_ascii_case(&wallet.address_hex()) {
                return Err(SyncError::Config(format!(
                    "PUBLIC_ADDRESS {} does not match PRIVATE_KEY address {}",
                    expected,
                    wallet.checksum_address()
                )));
            }
        }

        let endpoint = args
            .indexer_endpoint()
            .ok_or_else(|| SyncError::Config("indexer endpoint is not configured".to_string()))?;
        let indexer: Arc<dyn IndexerSource> = match args.indexer.indexer_source {
            IndexerKind::Hasura => Arc::new(HasuraIndexer::new(GraphQlClient::new(endpoint, timeout))),
            IndexerKind::Subgraph => Arc::new(SubgraphIndexer::new(GraphQlClient::new(endpoint, timeout))),
        };

        let rpc = Arc::new(RpcClient::new(args.rpc_url(), timeout));
        let redemptions = Arc::new(DotsMinterReader::new(rpc.clone(), args.chain.dots_minter_contract.clone()));
        let committer = Arc::new(EngineCommitter::new(
            rpc,
            wallet.clone(),
            CommitterConfig {
                poll_interval: Duration::from_millis(args.chain.receipt_poll_ms),
                receipt_timeout: Duration::from_secs(args.chain.receipt_timeout_secs),
                gas_headroom_percent: GAS_HEADROOM_PERCENT,
            },
        ));

        let store = Arc::new(PinataStore::new(PinataConfig {
            api_url: args.pinning.pinata_api_url.clone(),
            api_key: args.pinning.pinata_api_key.clone(),
            secret_api_key: args.pinning.pinata_secret_api_key.clone(),
            gateway: args.pinning.ipfs_gateway.clone(),
            timeout,
        }));

        let notifier: Option<Arc<dyn RefreshNotifier>> = match args.notify.notify_mode {
            NotifyMode::Off => None,
            NotifyMode::Project | NotifyMode::Tokens => {
                let hasura = args.indexer.hasura_endpoint.as_deref().ok_or_else(|| {
                    SyncError::Config("HASURA_GRAPHQL_ENDPOINT is required for notification".to_string())
                })?;
                let client = GraphQlClient::new(hasura, timeout);
                let authenticator = Authenticator::new(
                    client.clone(),
                    wallet.clone(),
                    args.notify.auth_domain.clone(),
                    args.notify.auth_uri.clone(),
                );
                Some(Arc::new(MediaRefreshNotifier::new(
                    client,
                    authenticator,
                    Some(args.notify.auth_role.clone()),
                )))
            }
        };

        let settings = SyncSettings {
            project: args.project(),
            dots_project: args.dots_project(),
            concurrency: args.resolve_concurrency,
            notify_mode: args.notify.notify_mode,
            bootstrap_empty_manifest: args.bootstrap_empty_manifest,
            dry_run: args.dry_run,
        };

        info!(
            project = %settings.project,
            dots_project = %settings.dots_project,
            indexer = indexer.name(),
            operator = %wallet.checksum_address(),
            notify_mode = ?settings.notify_mode,
            dry_run = settings.dry_run,
            "Context ready"
        );

        Ok(Self {
            settings,
            indexer,
            redemptions,
            store,
            committer,
            notifier,
        })
    }
}
