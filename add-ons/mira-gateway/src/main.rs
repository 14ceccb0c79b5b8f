//! MIRA gateway: loads config, builds the pipeline and serves the JSON API.

mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use mira_core::{identity_from_settings, MiraConfig, Pipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Secrets (OPENROUTER_API_KEY, SUPABASE_*) usually live in .env.
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[mira-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = MiraConfig::load()?;
    let pipeline = Arc::new(Pipeline::from_config(&cfg)?);
    let identity = identity_from_settings(&cfg.identity)?;
    if cfg.admin_token.is_none() {
        tracing::info!(target: "mira::gateway", "admin_token unset; admin routes disabled");
    }

    let app = router(AppState::new(pipeline, identity, cfg.admin_token.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "mira::gateway", %addr, "MIRA gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
