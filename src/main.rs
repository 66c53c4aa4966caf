mod alert;
mod api;
mod completeness;
mod config;
mod db;
mod error;
mod fetcher;
mod service;
mod sma;
mod types;
mod worker;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alert::AlertMonitor;
use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::SqliteSmaRepository;
use crate::error::Result;
use crate::fetcher::MercadoBitcoinClient;
use crate::service::SmaService;
use crate::worker::{BackfillSettings, BackfillWorker};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let mode = std::env::args().nth(1);
    let result = match mode.as_deref() {
        None | Some("serve") => serve(cfg).await,
        Some("backfill") => backfill_once(cfg).await,
        Some(other) => {
            eprintln!("Unknown command '{other}'. Usage: mms [serve|backfill]");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

struct App {
    service: SmaService,
    worker: BackfillWorker,
    health: Arc<HealthState>,
}

async fn build(cfg: &Config) -> Result<App> {
    // --- Database setup ---
    let pool = db::repository::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Ports ---
    let repo = Arc::new(SqliteSmaRepository::new(pool));
    let candles = Arc::new(MercadoBitcoinClient::new(cfg.mb_api_url.clone())?);
    let alerts = Arc::new(AlertMonitor::new(cfg.alert_enabled, cfg.alert_webhook_url.clone())?);
    if cfg.alert_enabled && cfg.alert_webhook_url.is_none() {
        warn!("ALERT_ENABLED is set but ALERT_WEBHOOK_URL is not; alerts will only be logged");
    }

    let service = SmaService::new(repo, candles);
    let health = Arc::new(HealthState::new());
    let worker = BackfillWorker::new(
        service.clone(),
        alerts,
        Arc::clone(&health),
        BackfillSettings::from(cfg),
    );

    Ok(App { service, worker, health })
}

/// Scheduled worker plus the HTTP API until Ctrl-C.
async fn serve(cfg: Config) -> Result<()> {
    let app = build(&cfg).await?;
    let cancel = CancellationToken::new();

    let pairs: Vec<&str> = cfg.pairs.iter().map(|p| p.as_str()).collect();
    info!(
        "Backfill scheduled every {:?} for {} (retry: {} attempts, {:?} apart)",
        cfg.run_interval,
        pairs.join(", "),
        cfg.retry_attempts,
        cfg.retry_interval,
    );
    let worker_cancel = cancel.clone();
    let run_interval = cfg.run_interval;
    let worker = app.worker;
    let worker_task = tokio::spawn(async move { worker.run_scheduled(run_interval, worker_cancel).await });

    // HTTP API server
    let api_state = ApiState { service: app.service, health: app.health };
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        shutdown.cancel();
    });

    axum::serve(listener, router(api_state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    if let Err(e) = worker_task.await {
        warn!("Backfill worker task ended abnormally: {e}");
    }
    Ok(())
}

/// One backfill pass over every configured pair, then exit.
async fn backfill_once(cfg: Config) -> Result<()> {
    let app = build(&cfg).await?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let report = app.worker.run_once(Utc::now().date_naive(), &cancel).await;
    for p in &report.pairs {
        let missing = p.completeness.as_ref().map(|c| c.missing_days.len());
        info!(pair = %p.pair, outcome = ?p.outcome, missing = ?missing, "Backfill result");
    }
    Ok(())
}
