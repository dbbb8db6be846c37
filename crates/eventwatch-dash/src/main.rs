use std::time::Duration;

use eventwatch_dash::api::ApiClient;
use eventwatch_dash::core::{DashboardCore, DashboardEvent};
use eventwatch_dash::view::DashboardUpdate;
use eventwatch_dash::{console, control};
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = eventwatch_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("eventwatch.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress noisy
    // connection-level DEBUG from HTTP client internals (hyper_util, reqwest).
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("eventwatch log: {}", log_path.display());

    tracing::info!("eventwatch starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = match eventwatch_proto::config::Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {}", e);
            eventwatch_proto::config::Config::default()
        }
    };

    let api = ApiClient::new(
        &config.backend.base_url,
        Duration::from_secs(config.backend.request_timeout_secs),
    )?;
    tracing::info!("backend: {}", api.base_url());

    // ── Optional session start ───────────────────────────────────────────────
    if let Some(section) = config.session.as_ref().filter(|s| s.auto_start) {
        tracing::info!("starting monitoring session for {}", section.session.rtsp_url);
        if let Err(e) = api.start(&section.session).await {
            // 409 when a session is already running; the dashboard attaches to it.
            tracing::warn!("session start failed: {}", e);
            eprintln!("session start failed: {}", e);
        }
    }

    // ── Broadcast channel (DashboardCore → consumers) ────────────────────────
    let (broadcast_tx, broadcast_rx) = broadcast::channel::<DashboardUpdate>(1024);

    // ── DashboardEvent channel (sources/operator → DashboardCore) ────────────
    let (event_tx, event_rx) = mpsc::channel::<DashboardEvent>(1024);

    let core = DashboardCore::new(config.clone(), api.clone(), broadcast_tx, event_tx.clone());
    let view = core.view();

    // ── Operator control API ─────────────────────────────────────────────────
    if config.control.enabled {
        control::start_server(
            config.control.bind_address.clone(),
            config.control.port,
            view.clone(),
            api.clone(),
            event_tx.clone(),
        );
    }

    // ── Spawn DashboardCore event loop ───────────────────────────────────────
    let core_task = tokio::spawn(async move {
        if let Err(e) = core.run(event_rx).await {
            tracing::error!("DashboardCore exited with error: {}", e);
        }
    });

    // ── Operator console ─────────────────────────────────────────────────────
    let updates = console::print_updates(view.clone(), broadcast_rx);
    tokio::pin!(updates);
    let leave = tokio::select! {
        _ = &mut updates => {
            tracing::info!("leaving dashboard: session ended");
            true
        }
        res = console::read_commands(view.clone(), api.clone(), event_tx.clone()) => match res {
            Ok(true) => {
                tracing::info!("leaving dashboard: operator quit");
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("console input error: {}", e);
                false
            }
        }
    };
    if !leave {
        // Headless (stdin closed): keep running for the control API until the
        // session ends.
        tracing::info!("console input closed, running until the session ends");
        updates.await;
    }

    let _ = event_tx.send(DashboardEvent::Shutdown).await;
    let _ = core_task.await;
    tracing::info!("eventwatch stopped");
    // The stdin reader may still be parked in the blocking pool, which would
    // hold the runtime open until the next line of input.
    std::process::exit(0)
}
