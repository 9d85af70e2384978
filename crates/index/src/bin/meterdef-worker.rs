//! meterdef-worker: file-backed driver for the matching engine.
//!
//! Loads MeterDefinitions from `--rules-dir` into the rule registry and
//! workload objects from `--objects-dir` into the object index, then keeps
//! both current:
//! - `--watch` hot-reloads definition files as they change
//! - every resync interval the definitions and objects are relisted, the
//!   registry and index reconciled, and idle rate-limiter buckets evicted
//! - a coordinator task applies rule changes to the index
//! - a second task drains association changes and logs them

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use meterdef_core::config::load_dotenv;
use meterdef_core::EngineConfig;
use meterdef_index::{load_objects, ObjectIndex, ResyncCoordinator};
use meterdef_queue::DeltaKind;
use meterdef_rules::{RuleLoader, RuleRegistry, SelectorCompiler};

// ── CLI ─────────────────────────────────────────────────────────────

/// Metering-rule matching worker.
#[derive(Parser, Debug)]
#[command(name = "meterdef-worker", version, about)]
struct Cli {
    /// Directory of MeterDefinition YAML files.
    #[arg(long, env = "METERDEF_RULES_DIR", default_value = "data/meterdefs")]
    rules_dir: PathBuf,

    /// Directory of workload object YAML files.
    #[arg(long, env = "METERDEF_OBJECTS_DIR", default_value = "data/objects")]
    objects_dir: PathBuf,

    /// Hot-reload definition files as they change.
    #[arg(long, env = "METERDEF_WATCH")]
    watch: bool,

    /// Load, match, print the associations and exit.
    #[arg(long)]
    once: bool,
}

// ── Resync tick ─────────────────────────────────────────────────────

fn resync_tick(
    loader: &RuleLoader,
    registry: &RuleRegistry,
    index: &ObjectIndex,
    objects_dir: &Path,
    config: &EngineConfig,
) {
    match loader.sync(registry) {
        Ok(report) if !report.is_noop() => info!(?report, "definitions resynced"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "definition resync incomplete"),
    }

    match load_objects(objects_dir) {
        Ok(objects) => {
            if let Err(e) = index.replace(objects) {
                warn!(error = %e, "object relist incomplete");
            }
        }
        Err(e) => warn!(error = %e, "object snapshot unreadable, keeping current index"),
    }

    let evicted = registry.limiter().evict_idle(config.rate_limit.idle_ttl);
    if evicted > 0 {
        info!(evicted, "evicted idle rate limiter buckets");
    }
}

fn log_associations(index: &ObjectIndex) {
    for association in index.list() {
        let rules: Vec<String> = association.rules.iter().map(|r| r.to_string()).collect();
        info!(object = %association.key, rules = ?rules, "association");
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    config.validate()?;
    config.log_summary();

    let registry = Arc::new(RuleRegistry::new(Arc::new(SelectorCompiler), &config));
    let index = Arc::new(ObjectIndex::new(Arc::clone(&registry)));
    let coordinator = Arc::new(ResyncCoordinator::new(Arc::clone(&registry), Arc::clone(&index)));

    // Initial listing: rules first, so objects are matched against the full set.
    let mut loader = RuleLoader::new(cli.rules_dir.clone());
    match loader.sync(&registry) {
        Ok(report) => info!(rules = registry.len(), ?report, "definitions loaded"),
        Err(e) => warn!(rules = registry.len(), error = %e, "some definitions were not admitted"),
    }
    coordinator.drain()?;

    match index.replace(load_objects(&cli.objects_dir)?) {
        Ok(tracked) => info!(tracked, "objects indexed"),
        Err(e) => warn!(tracked = index.len(), error = %e, "some objects were not indexed"),
    }

    if cli.once {
        log_associations(&index);
        return Ok(());
    }

    if cli.watch {
        loader.watch(Arc::clone(&registry))?;
    }

    let shutdown = Arc::new(Notify::new());

    let coordinator_task = {
        let coordinator = Arc::clone(&coordinator);
        let shutdown = Arc::clone(&shutdown);
        let backoff = config.retry_backoff;
        tokio::spawn(async move { coordinator.run(shutdown, backoff).await })
    };

    let association_task = {
        let changes = index.changes();
        tokio::spawn(async move {
            loop {
                let next = changes
                    .pop(|delta| {
                        match delta.kind {
                            DeltaKind::Deleted => info!(object = %delta.key, "association removed"),
                            kind => info!(
                                object = %delta.key,
                                action = %kind,
                                rules = delta.object.rules.len(),
                                "association changed"
                            ),
                        }
                        Ok::<(), Infallible>(())
                    })
                    .await;
                if matches!(next, Ok(None)) {
                    break;
                }
            }
        })
    };

    let mut ticker = tokio::time::interval(config.resync_interval);
    ticker.tick().await;
    info!(interval_secs = config.resync_interval.as_secs(), "meterdef-worker running");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                resync_tick(&loader, &registry, &index, &cli.objects_dir, &config);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    shutdown.notify_waiters();
    registry.changes().close();
    index.changes().close();
    let _ = coordinator_task.await;
    let _ = association_task.await;

    info!("meterdef-worker exited cleanly");
    Ok(())
}
