/**
 * HIDROMET KERNEL - Point d'entrée principal du serveur Hidromet
 *
 * RÔLE : Orchestration des modules : config, débitmètre Arduino, Weathercloud,
 * visites, informes, HTTP. Bootstrap avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : API REST Axum devant deux services tiers + stockage JSON local.
 * UTILITÉ : Passerelle unique du tableau de bord hydrométéorologique.
 */

mod arduino;
mod clock;
mod config;
mod error;
mod flowmeter;
mod health;
mod http;
mod reports;
mod state;
mod visits;
mod weather;

#[cfg(test)]
mod testing;

use crate::clock::SystemClock;
use crate::config::load_config;
use crate::http::AppState;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    let cfg = load_config().await;

    // RUST_LOG prioritaire, sinon niveau de la config
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("[kernel] secrets: {:?}", cfg.secrets);

    // données persistantes
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("failed to create data dir {:?}", cfg.data_dir))?;

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let app_state = AppState::build(cfg, Arc::new(SystemClock))?;

    match app_state.visits.ensure_initialized().await {
        Ok(n) => info!("[kernel] visit counter at {n}"),
        Err(e) => warn!("[kernel] visit counter unavailable: {e}"),
    }

    // session Weathercloud ouverte d'emblée si les identifiants sont là
    if app_state.weather.has_credentials() {
        let outcome = app_state.weather.login().await;
        match outcome.error {
            None => info!("[kernel] weathercloud session ready"),
            Some(e) => warn!("[kernel] weathercloud login failed: {e}"),
        }
    }

    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("[kernel] listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
