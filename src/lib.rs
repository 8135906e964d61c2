//! dots-refresh - composite manifest reconciliation
//!
//! Keeps the dots manifest of a composite generative-art project in step with
//! the redemptions recorded by the dots minter, then republishes it to IPFS
//! and points the project's external asset dependency at the new CID.
//!
//! ## Components
//!
//! - **Indexer**: project info and paginated token queries (Hasura or subgraph)
//! - **Chain**: `redeemedDotsFor` reads and the dependency update transaction
//! - **Manifest**: append-only model, concurrent builder and structural diff
//! - **Publisher**: Pinata pinning and gateway reads
//! - **Notify**: signed-challenge auth and media refresh mutations
//! - **Pipeline**: one reconciliation run over a [`pipeline::SyncContext`]

pub mod chain;
pub mod config;
pub mod indexer;
pub mod manifest;
pub mod mock;
pub mod notify;
pub mod pipeline;
pub mod publisher;
pub mod types;

pub use config::Args;
pub use pipeline::{run_notify, run_once, SyncContext, SyncSettings};
pub use types::{Result, RunResult, SyncError};
