use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lms_notify::config::NotifyConfig;
use lms_notify::dispatch::DispatchEngine;
use lms_notify::progress::{MoodleProvider, ProgressProvider, ProgressSync};
use lms_notify::scheduler::{self, Scheduler};
use lms_notify::store::{LibSqlBackend, Store};
use lms_notify::transport::{MessageTransport, WhatsAppTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = NotifyConfig::from_env().context("invalid configuration")?;

    eprintln!("📨 LMS Notify v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path);
    if !config.whatsapp.is_configured() {
        tracing::warn!("WhatsApp credentials not set; every send will be recorded as FAILED");
    }

    // ── Database ────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path))?,
    );

    // ── Dispatch engine ─────────────────────────────────────────────
    let transport: Arc<dyn MessageTransport> =
        Arc::new(WhatsAppTransport::new(config.whatsapp.clone()));
    let engine = Arc::new(DispatchEngine::new(
        Arc::clone(&store),
        transport,
        config.templates.clone(),
    ));

    // ── Progress sync (only with a Moodle endpoint) ─────────────────
    let sync = config.moodle.clone().map(|moodle| {
        let provider: Arc<dyn ProgressProvider> = Arc::new(MoodleProvider::new(moodle));
        Arc::new(ProgressSync::new(Arc::clone(&store), provider))
    });
    if sync.is_none() {
        tracing::warn!("MOODLE_URL not set; progress sync disabled");
    }

    // ── Scheduler ───────────────────────────────────────────────────
    let scheduler = Arc::new(Scheduler::new(&config, engine, sync)?);
    for (name, next) in scheduler.upcoming().await {
        tracing::info!(job = name, next = ?next, "Scheduled");
    }
    let ticker = scheduler::spawn_ticker(scheduler, Duration::from_secs(config.tick_secs));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl+C received, shutting down...");
    ticker.abort();
    Ok(())
}
