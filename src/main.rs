// =============================================================================
// Momentum Engine — Main Entry Point
// =============================================================================
//
// Real adapter implementations (Polygon, Alpaca, Benzinga, ...) are out of
// scope (§6.1, Non-goals): the binary starts with whichever adapters are
// configured via environment variables and runs the rest degraded if a
// credential is missing, per §7.
// =============================================================================

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use momentum_engine::clock::SystemClock;
use momentum_engine::config::MomentumConfig;
use momentum_engine::engine::MomentumEngine;
use momentum_engine::{adapters, api, audit_log::AuditLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          Momentum Engine — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = MomentumConfig::load("momentum_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        MomentumConfig::default()
    });
    config.apply_env_overrides();
    config.validate()?;

    let clock = Arc::new(SystemClock::new());
    let audit_log = Arc::new(AuditLog::new(config.log_root.clone()));

    // No real adapter implementations ship with this crate (§6.1); the
    // engine degrades gracefully when a credential is absent.
    let news_adapter: Option<Arc<dyn adapters::NewsAdapter>> = None;
    let quote_adapter: Option<Arc<dyn adapters::QuoteAdapter>> = None;
    let historical_adapter: Option<Arc<dyn adapters::HistoricalAdapter>> = None;

    if config.news_api_key.is_none() {
        warn!("NEWS_API_KEY not set — catalyst detector will run disabled");
    }

    let engine = Arc::new(MomentumEngine::new(
        &config,
        clock,
        audit_log.clone(),
        news_adapter,
        quote_adapter,
        historical_adapter,
    )?);

    let bind_addr = std::env::var("MOMENTUM_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3100".into());
    let server_engine = engine.clone();
    let server_addr = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(server_engine);
        let listener = tokio::net::TcpListener::bind(&server_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %server_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!(addr = %bind_addr, "momentum engine running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    engine.flush();
    if let Err(e) = config.save("momentum_config.json") {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("momentum engine shut down complete.");
    Ok(())
}
