//! tapedeck - Batch analysis of digitized home-video footage
//!
//! Scans a directory of source tapes, runs the phased analysis pipeline
//! against the remote service, and writes NLE markers plus viewing logs
//! beside the footage. Every phase completion is checkpointed, so an
//! interrupted run resumes where it stopped.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tapedeck::catalog::Catalog;
use tapedeck::client::{RateLimitedClient, RetryPolicy};
use tapedeck::layout::WorkLayout;
use tapedeck::models::Phase;
use tapedeck::orchestrator::{Orchestrator, RunMode, RunOptions};
use tapedeck::prompts::PromptSet;
use tapedeck::service::GeminiService;
use tapedeck::store::CheckpointStore;
use tapedeck::tiers::{CostEstimate, TierSet};
use tapedeck::transcode::{FfmpegTranscoder, Transcoder};

/// Command-line arguments for tapedeck
#[derive(Parser, Debug)]
#[command(name = "tapedeck")]
#[command(about = "Batch analysis pipeline for digitized home-video footage")]
#[command(version)]
struct Args {
    /// Source directory (or single video file) to analyze
    source: PathBuf,

    /// Report what would run, without calling the remote service
    #[arg(long, conflicts_with_all = ["phase", "retry_failed"])]
    dry_run: bool,

    /// Run only the numbered phase (0=proxy 1=prescan 2=blind 3=deep
    /// 4=escalate 5=export 6=synthesis)
    #[arg(long, conflicts_with = "retry_failed")]
    phase: Option<u8>,

    /// Reset failed phases and re-run exactly those
    #[arg(long)]
    retry_failed: bool,

    /// Also run the unframed blind pass
    #[arg(long)]
    blind: bool,

    /// Upload source files as-is instead of transcoding proxies
    #[arg(long)]
    no_proxy: bool,

    /// Skip the corpus synthesis phase
    #[arg(long)]
    no_synthesis: bool,

    /// Skip the escalation phase
    #[arg(long)]
    no_escalation: bool,

    /// Items processed concurrently
    #[arg(long, env = "TAPEDECK_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Remote requests per minute
    #[arg(long, default_value = "9", env = "TAPEDECK_RPM")]
    rpm: u32,

    /// Configuration file (default: ~/.config/tapedeck/tapedeck.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tapedeck=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mode = if args.dry_run {
        RunMode::DryRun
    } else if args.retry_failed {
        RunMode::RetryFailed
    } else if let Some(n) = args.phase {
        let phase = Phase::from_number(n)
            .with_context(|| format!("No phase numbered {} (valid: 0..=6)", n))?;
        RunMode::SinglePhase(phase)
    } else {
        RunMode::Resume
    };

    let toml_config = tapedeck_common::config::load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    let api_key = match tapedeck_common::config::resolve_api_key(&toml_config) {
        Ok(key) => key,
        // A dry run touches nothing remote, so run it keyless
        Err(_) if mode == RunMode::DryRun => String::new(),
        Err(e) => return Err(e).context("API key required"),
    };

    let catalog = Catalog::new(&args.source);
    let items = catalog.scan().context("Source scan failed")?;
    info!(items = items.len(), source = %args.source.display(), "Catalog scanned");

    let layout = WorkLayout::for_source(&args.source);
    layout.ensure_work_dir().context("Cannot create work directory")?;
    let store = CheckpointStore::open(&layout.db_path())
        .await
        .context("Cannot open checkpoint database")?;

    let tiers = TierSet::default();
    let transcoder = FfmpegTranscoder;

    // Pre-run cost estimate from probed durations
    let mut durations = Vec::with_capacity(items.len());
    for item in &items {
        match transcoder.probe_duration(&item.path).await {
            Ok(d) => durations.push(d),
            Err(e) => warn!(item = %item.id, error = %e, "Duration probe failed, excluded from estimate"),
        }
    }
    let estimate = CostEstimate::compute(&durations, &tiers, args.blind);
    println!("Cost estimate:\n{}", estimate);

    let options = RunOptions {
        mode,
        blind_enabled: args.blind,
        proxy_enabled: !args.no_proxy,
        escalation_enabled: !args.no_escalation,
        synthesis_enabled: !args.no_synthesis,
        concurrency: args
            .concurrency
            .or(toml_config.concurrency)
            .unwrap_or(3),
        requests_per_minute: args.rpm,
        ..Default::default()
    };

    let policy = RetryPolicy {
        max_attempts: toml_config.max_attempts.unwrap_or(3),
        ..Default::default()
    };
    let service = GeminiService::new(api_key).context("Service client init failed")?;
    let client = RateLimitedClient::new(
        service,
        options.requests_per_minute,
        options.concurrency,
        policy,
    );

    let cancel = CancellationToken::new();
    spawn_shutdown_handler(cancel.clone());

    let orchestrator = Orchestrator::new(
        store,
        client,
        transcoder,
        layout,
        PromptSet::default(),
        tiers,
        options,
        cancel,
    );
    let summary = orchestrator.run(&items).await.context("Run aborted")?;

    if mode == RunMode::DryRun {
        println!("\nWould dispatch {} phase(s):", summary.planned.len());
        for (item, phase) in &summary.planned {
            println!("  {:<40} {}", item.to_string(), phase);
        }
        return Ok(());
    }

    println!(
        "\nDispatched {}, succeeded {}, failed {}.",
        summary.dispatched, summary.succeeded, summary.failed
    );
    if summary.failures_remaining > 0 {
        println!(
            "{} failed phase(s) remain; re-run to retry (or --retry-failed for only those).",
            summary.failures_remaining
        );
        std::process::exit(1);
    }
    Ok(())
}

/// First Ctrl+C finishes in-flight phases and checkpoints; second one
/// aborts immediately.
fn spawn_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Interrupt received: finishing in-flight phases, then stopping");
        cancel.cancel();
        if signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt: aborting now");
            std::process::exit(130);
        }
    });
}
