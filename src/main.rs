//! Module runtime host.
//!
//! # Architecture Overview
//!
//! ```text
//!   runtime.toml ──▶ RuntimeConfig ──▶ loader settings, sources, logging, admin
//!
//!   ┌──────────────────────────── ModuleTree "app" ────────────────────────────┐
//!   │                                                                          │
//!   │  wave i32::MIN   configuration (AggregatorUnit, required)                │
//!   │                     └─ ModuleTree "configuration"                        │
//!   │                          File(10) → Redis(20) → Database(30) → DotEnv(40)│
//!   │                                     │                                    │
//!   │                                     ▼                                    │
//!   │                               ConfigStore (ArcSwap effective tree)       │
//!   │                                     │                                    │
//!   │  later waves     application units ◀┘ read their slice at load           │
//!   └──────────────────────────────────────────────────────────────────────────┘
//!
//!   SIGHUP / source file change  → aggregator reload
//!   SIGTERM / SIGINT             → unload app tree, stop admin, exit
//!   admin (axum, bearer auth)    → read-only status / units / config queries
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use module_runtime::admin::{self, AdminState};
use module_runtime::aggregator::{self as aggregation, AggregatorUnit, ConfigStore, ConfigurationAggregator};
use module_runtime::config::{load_config, ConfigWatcher, RuntimeConfig};
use module_runtime::lifecycle::{wait_for_signal, HostSignal, Shutdown};
use module_runtime::observability::{self, metrics};
use module_runtime::tree::{LoadReport, ModuleTree};
use module_runtime::unit::{Unit, UnitSpec};

#[derive(Parser)]
#[command(name = "module-runtime")]
#[command(about = "Load an application tree and its layered configuration", long_about = None)]
struct Args {
    /// Host settings file; defaults apply when it does not exist.
    #[arg(short, long, env = "RUNTIME_CONFIG", default_value = "runtime.toml")]
    config: PathBuf,

    /// Load, print the load and unload reports, then exit.
    #[arg(long)]
    once: bool,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let from_file = args.config.exists();
    let config = if from_file {
        load_config(&args.config)?
    } else {
        RuntimeConfig::default()
    };

    observability::init_logging(&config.observability.log_level, config.observability.log_format)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        from_file,
        "module-runtime starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let settings = config.loader.settings();
    let store = Arc::new(ConfigStore::new());
    let aggregator = Arc::new(ConfigurationAggregator::from_config(
        &config.sources,
        store.clone(),
        settings.clone(),
    )?);

    let tree = Arc::new(ModuleTree::with_store("app", store.clone(), settings));
    let mounted = aggregator.clone();
    tree.register(
        tree.root(),
        UnitSpec::new(aggregation::ROOT).priority(i32::MIN).required(),
        move || Unit::service(AggregatorUnit::new(mounted.clone())),
    )?;

    let shutdown = Arc::new(Shutdown::new());

    // A shutdown signal during startup cancels the load between waves
    let startup_signals = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Ok(HostSignal::Shutdown) = wait_for_signal().await {
                shutdown.trigger();
            }
        }
    });
    let loaded = tree.load_with(tree.root(), &shutdown.cancel_token()).await;
    startup_signals.abort();
    let report = loaded?;
    log_report("Application loaded", &report)?;

    if args.once {
        println!("{}", serde_json::to_string_pretty(&report)?);
        let report = tree.unload(tree.root()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let router = admin::setup_admin_router(AdminState::new(
            tree.clone(),
            store.clone(),
            &config.admin.api_key,
        ));
        Some(tokio::spawn(admin::serve(listener, router, shutdown.subscribe())))
    } else {
        None
    };

    let poll_interval = Duration::from_millis(config.watch.poll_interval_ms);
    let (_watcher, mut changes) = if config.watch.enabled {
        let (watcher, rx) = ConfigWatcher::new(config.sources.watched_paths(), poll_interval);
        (Some(watcher.run()?), Some(rx))
    } else {
        (None, None)
    };

    loop {
        tokio::select! {
            signal = wait_for_signal() => match signal? {
                HostSignal::Shutdown => break,
                HostSignal::Reload => reload_configuration(&aggregator).await,
            },
            Some(path) = next_change(&mut changes) => {
                // Editors emit bursts of events; let them settle, then reload once
                tokio::time::sleep(poll_interval).await;
                if let Some(rx) = changes.as_mut() {
                    while rx.try_recv().is_ok() {}
                }
                tracing::info!(path = %path.display(), "Reloading configuration after file change");
                reload_configuration(&aggregator).await;
            }
        }
    }

    tracing::info!("Shutting down");
    match tree.unload(tree.root()).await {
        Ok(report) => log_report("Application unloaded", &report)?,
        Err(e) => tracing::error!(error = %e, "Unload failed"),
    }

    shutdown.trigger();
    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin interface failed"),
            Err(e) => tracing::error!(error = %e, "Admin task panicked"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn next_change(changes: &mut Option<mpsc::UnboundedReceiver<PathBuf>>) -> Option<PathBuf> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Re-read every source; units already loaded keep what they read at load time.
async fn reload_configuration(aggregator: &ConfigurationAggregator) {
    match aggregator.reload().await {
        Ok(report) => {
            if let Err(e) = log_report("Configuration reloaded", &report) {
                tracing::error!(error = %e, "Failed to encode reload report");
            }
        }
        Err(e) => tracing::error!(error = %e, "Configuration reload failed; keeping previous layers"),
    }
}

fn log_report(message: &'static str, report: &LoadReport) -> Result<(), serde_json::Error> {
    let failures = report.failures();
    let encoded = serde_json::to_string(report)?;
    if failures.is_empty() {
        tracing::info!(report = %encoded, "{}", message);
    } else {
        tracing::warn!(report = %encoded, failed = ?failures, "{}", message);
    }
    Ok(())
}
