//! Front process entry point: owns the HTTP surface, the task registry,
//! and the coordinator that bridges to the worker process. Grounded in
//! `original_source/src/whisper_api/main.py`'s top-level wiring
//! (`setup_decoder_process_and_listener_thread` + the FastAPI app setup).

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;

use wapi_common::Config;
use wapi_front::{AlwaysAudio, AppState, Coordinator};
use wapi_registry::TtlRegistry;

#[derive(Parser)]
struct Args {
    /// Path to the worker binary. Defaults to a sibling `wapi-worker` next
    /// to this executable, falling back to `PATH` lookup.
    #[arg(long, env = "WORKER_BIN", default_value = "wapi-worker")]
    worker_bin: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Arc::new(Config::from_env().context("reading front configuration")?);

    let registry = TtlRegistry::new(
        config.delete_results_after_m,
        config.refresh_expiration_time_on_usage,
        config.run_result_expiry_check_m,
    )
    .context("constructing task registry")?;

    let coordinator = Coordinator::spawn(&args.worker_bin, registry, config.max_task_queue_size)
        .await
        .context("spawning worker process")?;

    let state = AppState { coordinator: Arc::clone(&coordinator), config: Arc::clone(&config), audio_probe: Arc::new(AlwaysAudio) };

    let bind_addr = format!("{}:{}", config.api_listen, config.api_port);

    let shutdown_coordinator = Arc::clone(&coordinator);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("received shutdown signal, stopping worker");
        shutdown_coordinator.shutdown().await;
        std::process::exit(0);
    });

    wapi_front::http::serve_forever(&bind_addr, state).await
}

/// Waits for SIGINT, SIGTERM, or SIGHUP, whichever arrives first.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed installing SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed installing SIGHUP handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
