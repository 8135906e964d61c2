//! dots-refresh - composite manifest reconciliation job

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dots_refresh::{
    config::{Args, Command, LogFormat},
    run_notify, run_once, SyncContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr; stdout carries the run result
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("dots_refresh={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(2);
    }

    info!("======================================");
    info!("  dots-refresh");
    info!("======================================");
    info!("Command: {:?}", args.command());
    info!("Project: {}", args.project());
    info!("Dots project: {}", args.dots_project());
    info!("Indexer: {:?}", args.indexer.indexer_source);
    info!("Notify: {:?}", args.notify.notify_mode);
    if args.dry_run {
        info!("Mode: DRY RUN");
    }
    info!("======================================");

    let ctx = match SyncContext::from_args(&args) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };

    let result = match args.command() {
        Command::Run => run_once(&ctx).await,
        Command::Notify => run_notify(&ctx).await,
    };

    println!("{}", serde_json::to_string(&result)?);

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
