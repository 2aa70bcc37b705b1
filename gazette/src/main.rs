/*
gazette - single-binary main.rs
One ingestion run: load config and archive, fetch the catalog politely,
merge once at the end, persist the two JSON artifacts.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::{ArchiveFile, Config, DisplayFile, FeedSource};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use gazette::archive;
use gazette::fetch::HttpTransport;
use gazette::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "gazette", about = "Gazette feed ingestion worker")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ingest only these catalog slugs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    sources: Vec<String>,

    /// Fetch and report, but do not touch the archive artifacts
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    report: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths: defaults, then config.toml, then --config override
    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() {
            Some(&default_path)
        } else {
            None
        },
        override_path.as_deref(),
    )
    .await
    .context("failed to load configuration")?;
    info!(defaults = ?default_path, overrides = ?override_path, "configuration loaded");

    let catalog = select_catalog(&config, &args.sources);
    if catalog.is_empty() {
        return Err(anyhow::anyhow!("catalog is empty; nothing to ingest"));
    }

    // Archive load is run-fatal on corruption, unlike per-source failures
    let archive_cfg = config.archive();
    let archive_file = common::load_archive(&archive_cfg.archive_path())
        .await
        .context("failed to load archive")?;
    info!(
        path = %archive_cfg.archive_path().display(),
        articles = archive_file.articles.len(),
        "archive loaded"
    );
    let existing_ids: HashSet<String> = archive_file.articles.keys().cloned().collect();
    // Slugs must stay unique across runs, not just within one, so seed the
    // run with every slug already in the archive.
    let existing_slugs: HashSet<String> = archive_file
        .articles
        .values()
        .map(|record| record.slug.clone())
        .collect();

    // Ctrl-C finishes the in-flight source, then the partial run is merged
    // and persisted like any other.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received; finishing current source, then persisting partial results");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let transport = Arc::new(HttpTransport::new(config.fetch().timeout())?);
    let mut orchestrator = Orchestrator::new(&config, transport);
    let outcome = orchestrator
        .run(&catalog, &existing_ids, &existing_slugs, &shutdown)
        .await;
    outcome.report.log_summary();

    let (merged, display) = archive::merge(
        archive_file.articles,
        &outcome.new_records,
        archive_cfg.display_limit(),
    );

    if args.dry_run {
        info!("dry run: skipping archive persistence");
    } else {
        let now = Utc::now();
        let total = merged.len();
        common::save_archive(
            &archive_cfg.archive_path(),
            &ArchiveFile {
                articles: merged,
                last_updated: Some(now),
                total_articles: total,
            },
        )
        .await
        .context("failed to persist archive")?;

        let display_total = display.len();
        common::save_display(
            &archive_cfg.display_path(),
            &DisplayFile {
                articles: display,
                last_updated: Some(now),
                total_articles: display_total,
            },
        )
        .await
        .context("failed to persist display set")?;
        info!(total, display = display_total, "artifacts persisted");
    }

    if args.report {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    }

    Ok(())
}

/// Applies the `--sources` slug filter to the configured catalog.
fn select_catalog(config: &Config, slugs: &[String]) -> Vec<FeedSource> {
    if slugs.is_empty() {
        return config.sources.clone();
    }
    let wanted: HashSet<&str> = slugs.iter().map(|s| s.as_str()).collect();
    let selected: Vec<FeedSource> = config
        .sources
        .iter()
        .filter(|s| wanted.contains(s.slug.as_str()))
        .cloned()
        .collect();
    for slug in &wanted {
        if !selected.iter().any(|s| s.slug == *slug) {
            warn!(slug = %slug, "unknown source slug in --sources filter");
        }
    }
    selected
}
