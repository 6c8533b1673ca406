//! CLI entry point for the paper harvester.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::{
    AuditSink, Database, HarvestConfig, HttpClient, OpenAiMetadataExtractor, Orchestrator,
    PdfTextExtractor, RateLimiter, Retriever, SqliteMetadataStore, UrlCollector,
    discovery_spinner, processing_bar,
};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Harvester starting");

    let mut config = HarvestConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    config.apply_overrides(&args.overrides());
    config.validate().context("invalid configuration")?;
    debug!(?config, "configuration resolved");

    let db = Database::new(
        &config.database.path,
        config.db_max_connections(),
        Duration::from_millis(config.database.busy_timeout_ms),
    )
    .await
    .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
    let audit = AuditSink::sqlite(db.clone());

    let metadata = OpenAiMetadataExtractor::from_env(
        config.model.settings(),
        RateLimiter::per_minute(config.model.requests_per_minute),
        audit.clone(),
    )
    .context("metadata extraction is not configured")?;

    let show_progress = !args.quiet;

    let collector = UrlCollector::new(
        Duration::from_secs(config.discovery.timeout_secs),
        Duration::from_millis(config.discovery.page_delay_ms),
    )?
    .with_progress(discovery_spinner(show_progress));
    let candidates = collector
        .collect(&config.discovery.api_url, config.discovery.target_count)
        .await
        .context("discovery failed")?;
    info!(candidates = candidates.len(), "discovery complete");

    let retriever = Retriever::new(
        HttpClient::new(Duration::from_secs(config.retrieval.timeout_secs))?,
        Arc::new(RateLimiter::per_minute(config.retrieval.requests_per_minute)),
        config.retrieval.retry_policy(),
        audit,
    )
    .with_max_file_mb(config.retrieval.max_file_mb);

    let orchestrator = Orchestrator::new(
        config.retrieval.concurrency,
        retriever,
        Arc::new(PdfTextExtractor::new(config.extraction.max_pages)),
        Arc::new(metadata),
        Arc::new(SqliteMetadataStore::new(db.clone())),
        config.prompts.clone(),
        &config.retrieval.output_dir,
    )?
    .with_progress(processing_bar(show_progress, candidates.len()));

    let summary = orchestrator.run(candidates).await?;

    println!(
        "Successfully processed {}/{} documents.",
        summary.succeeded, summary.total
    );

    db.close().await;
    Ok(())
}
