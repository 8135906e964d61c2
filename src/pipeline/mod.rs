//! Reconciliation pipeline
//!
//! ## Run Flow
//!
//! 1. Load project info and the published manifest
//! 2. Page through every token; keys not in the manifest are missing
//! 3. Resolve redemptions for the missing tokens and build a candidate
//! 4. Diff against the published manifest; stop when nothing changed
//! 5. Pin the candidate, commit its CID, then request a media refresh
//!
//! Steps 1-5 abort on the first error, except the refresh, which is logged
//! and reported through `notified` only. A run succeeds when nothing changed
//! or the commit was confirmed.

pub mod context;

use std::collections::HashSet;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::manifest::{self, Manifest, ManifestBuilder};
use crate::notify::{NotifyMode, RefreshTarget};
use crate::types::{ProjectInfo, ProjectRef, Result, RunResult, SyncError, TokenRecord};

pub use context::{SyncContext, SyncSettings};

/// Run one reconciliation pass
pub async fn run_once(ctx: &SyncContext) -> RunResult {
    let run_id = Uuid::new_v4();
    let span = info_span!("refresh_run", run_id = %run_id, project = %ctx.settings.project);

    async {
        match reconcile(ctx, run_id).await {
            Ok(result) => result,
            Err(e) => {
                error!(kind = e.kind(), "Run failed: {}", e);
                RunResult::failed(run_id, &e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Re-send the media refresh for what the published manifest already holds
pub async fn run_notify(ctx: &SyncContext) -> RunResult {
    let run_id = Uuid::new_v4();
    let span = info_span!("notify_run", run_id = %run_id, project = %ctx.settings.project);

    async {
        match renotify(ctx).await {
            Ok(()) => RunResult {
                notified: true,
                ..RunResult::unchanged(run_id)
            },
            Err(e) => {
                error!(kind = e.kind(), "Refresh failed: {}", e);
                RunResult::failed(run_id, &e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Published manifest, or an empty one when bootstrapping
async fn load_current(ctx: &SyncContext) -> Result<(ProjectInfo, Manifest)> {
    let project = &ctx.settings.project;
    let info = ctx.indexer.project_info(project).await?;

    let current = match info.manifest_cid.as_deref() {
        Some(cid) => ctx.store.fetch_manifest(cid, info.gateway.as_deref()).await?,
        None if ctx.settings.bootstrap_empty_manifest => {
            warn!("Project has no manifest dependency yet, starting from an empty manifest");
            Manifest::new()
        }
        None => {
            return Err(SyncError::NotFound(format!(
                "no external asset dependency for project {}",
                project
            )))
        }
    };

    info!(
        invocations = info.invocations,
        manifest_cid = ?info.manifest_cid,
        entries = current.len(),
        "Loaded published manifest"
    );
    Ok((info, current))
}

/// Refresh target for `tokens` under `mode`; `None` when disabled or empty
fn refresh_target<'a>(
    mode: NotifyMode,
    project: &ProjectRef,
    tokens: impl Iterator<Item = &'a TokenRecord>,
) -> Option<RefreshTarget> {
    match mode {
        NotifyMode::Off => None,
        NotifyMode::Project => Some(RefreshTarget::Project(project.clone())),
        NotifyMode::Tokens => {
            let ids: Vec<String> = tokens.map(|t| project.token_key(t.token_id)).collect();
            (!ids.is_empty()).then_some(RefreshTarget::Tokens(ids))
        }
    }
}

async fn reconcile(ctx: &SyncContext, run_id: Uuid) -> Result<RunResult> {
    let settings = &ctx.settings;
    let (info, current) = load_current(ctx).await?;

    let tokens = ctx.indexer.all_tokens(&settings.project).await?;
    let indices: Vec<u64> = tokens.iter().map(|t| t.invocation).collect();
    let missing: HashSet<u64> = manifest::missing_keys(&indices, &current, info.invocations)
        .into_iter()
        .collect();

    if missing.is_empty() {
        info!(tokens = tokens.len(), "Manifest covers every token, nothing to do");
        return Ok(RunResult::unchanged(run_id));
    }

    let missing_tokens: Vec<TokenRecord> = tokens
        .iter()
        .filter(|t| missing.contains(&t.invocation))
        .cloned()
        .collect();

    let builder = ManifestBuilder::new(
        ctx.indexer.clone(),
        ctx.redemptions.clone(),
        settings.engine(),
        settings.dots_project.clone(),
        settings.concurrency,
    );
    let outcome = builder.build(&current, &missing_tokens).await?;

    let changes = manifest::diff(&current, &outcome.candidate);
    changes.ensure_append_only()?;

    if changes.is_unchanged() {
        info!(
            missing = missing_tokens.len(),
            unredeemed = outcome.unredeemed.len(),
            pending = outcome.pending.len(),
            "No new redemptions, manifest unchanged"
        );
        return Ok(RunResult::unchanged(run_id));
    }

    info!(
        added = ?changes.added,
        unredeemed = outcome.unredeemed.len(),
        pending = outcome.pending.len(),
        "Candidate manifest has new entries"
    );

    if settings.dry_run {
        info!("Dry run, skipping publish, commit and refresh");
        return Ok(RunResult {
            changed: true,
            added: changes.added,
            ..RunResult::unchanged(run_id)
        });
    }

    let name = format!("dots-manifest-{}", settings.project.indexer_id());
    let cid = ctx.store.pin_manifest(&outcome.candidate, &name).await?;
    info!(cid = %cid, entries = outcome.candidate.len(), "Published candidate manifest");

    let receipt = match ctx.committer.commit(&settings.project, &cid).await {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!(cid = %cid, "Commit failed, pinned manifest is orphaned");
            return Err(e);
        }
    };

    let added: HashSet<u64> = changes.added.iter().copied().collect();
    let target = refresh_target(
        settings.notify_mode,
        &settings.project,
        missing_tokens.iter().filter(|t| added.contains(&t.invocation)),
    );
    let notified = match (ctx.notifier.as_ref(), target) {
        (Some(notifier), Some(target)) => match notifier.refresh(&target).await {
            Ok(()) => true,
            Err(e) => {
                warn!(kind = e.kind(), "Media refresh failed, run `notify` to retry: {}", e);
                false
            }
        },
        _ => false,
    };

    Ok(RunResult {
        run_id,
        success: true,
        changed: true,
        new_cid: Some(cid),
        tx_hash: Some(receipt.tx_hash),
        added: changes.added,
        notified,
        error: None,
    })
}

async fn renotify(ctx: &SyncContext) -> Result<()> {
    let settings = &ctx.settings;
    let notifier = ctx
        .notifier
        .as_ref()
        .ok_or_else(|| SyncError::Config("notification is disabled".to_string()))?;

    let target = match settings.notify_mode {
        NotifyMode::Tokens => {
            let (_, current) = load_current(ctx).await?;
            let tokens = ctx.indexer.all_tokens(&settings.project).await?;
            refresh_target(
                settings.notify_mode,
                &settings.project,
                tokens.iter().filter(|t| current.contains(t.invocation)),
            )
        }
        mode => refresh_target(mode, &settings.project, std::iter::empty()),
    };

    match target {
        Some(target) => {
            notifier.refresh(&target).await?;
            info!("Media refresh requested");
        }
        None => info!("Nothing to refresh"),
    }
    Ok(())
}
