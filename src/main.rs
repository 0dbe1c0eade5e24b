//! VMM Dispatch Service
//!
//! Loads configuration, wires the dispatch engine and keeps it running until
//! Ctrl+C or SIGTERM, then drains in-flight jobs and reports final metrics.

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};
use vmm_dispatch::commands::Operation;
use vmm_dispatch::core::types::LifecycleState;
use vmm_dispatch::notify::InMemoryResourceHome;
use vmm_dispatch::{create_app_state, AppState, Config, State};

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let matches = Command::new("vmm-dispatch")
        .version(vmm_dispatch::VERSION)
        .about("Elastic job dispatch for VM lifecycle commands.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("command-set")
                .long("command-set")
                .value_name("KEYWORD")
                .help("Backend command set (mock, xenlocal, xenssh)"),
        )
        .arg(
            Arg::new("initial-threads")
                .long("initial-threads")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Worker threads started up front"),
        )
        .arg(
            Arg::new("max-threads")
                .long("max-threads")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Ceiling on worker threads"),
        )
        .arg(
            Arg::new("high-water-mark")
                .long("high-water-mark")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Idle workers above which extra workers are retired"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .action(ArgAction::Set)
                .help("Create N in-memory VMs and start each of them"),
        )
        .get_matches();

    // Load configuration
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches);
    config.validate()?;

    vmm_dispatch::init(&config.logging)?;
    info!("Starting {} v{}", vmm_dispatch::NAME, vmm_dispatch::VERSION);

    let report_metrics = config.metrics.report_on_shutdown;
    let home = Arc::new(InMemoryResourceHome::default());
    let app = Arc::new(
        create_app_state(config, home.clone()).context("engine configuration is invalid")?,
    );
    app.start();

    if let Some(count) = matches.get_one::<usize>("demo").copied() {
        run_demo(&app, &home, count)?;
    }

    // Wait for shutdown signal
    shutdown_signal().await;
    warn!("Received shutdown signal, draining jobs...");

    let draining = Arc::clone(&app);
    tokio::task::spawn_blocking(move || draining.shutdown())
        .await
        .context("shutdown task failed")?;

    summarize(&home);
    if report_metrics {
        match app.metrics_report() {
            Ok(text) => println!("{}", text),
            Err(e) => error!(error = %e, "could not gather metrics"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) {
    if let Some(set) = matches.get_one::<String>("command-set") {
        config.commands.command_set = set.clone();
    }

    if let Some(n) = matches.get_one::<usize>("initial-threads") {
        config.dispatcher.initial_threads = *n;
    }

    if let Some(n) = matches.get_one::<usize>("max-threads") {
        config.dispatcher.max_threads = *n;
    }

    if let Some(n) = matches.get_one::<usize>("high-water-mark") {
        config.dispatcher.high_water_mark = *n;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
}

/// Submit a start for `count` fresh VMs
fn run_demo(app: &AppState, home: &InMemoryResourceHome, count: usize) -> anyhow::Result<()> {
    info!(count, "submitting demo workload");
    for i in 0..count {
        let name = format!("demo-{}", i);
        let vm = home.create(name.clone(), LifecycleState::Propagated.into());
        let id = vm.snapshot()?.id;
        if !app.submit(id, &name, Operation::Start, State::RUNNING)? {
            warn!(vm = %name, "demo job was not accepted");
        }
    }
    Ok(())
}

/// Log how many VMs ended up in each state
fn summarize(home: &InMemoryResourceHome) {
    let mut by_state = std::collections::BTreeMap::new();
    for snapshot in home.snapshots() {
        if let Ok(json) = serde_json::to_string(&snapshot) {
            debug!(resource = %snapshot.id, %json, "final snapshot");
        }
        *by_state.entry(snapshot.state.to_string()).or_insert(0usize) += 1;
    }
    for (state, count) in by_state {
        info!(%state, count, "final resource states");
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
