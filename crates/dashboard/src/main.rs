use anyhow::{Context, Result};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use farm_dashboard::session::Session;
use farm_dashboard::web::{self, AppState};
use farm_dashboard::config;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Env + logging ───────────────────────────────────────────────
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("failed to read .env");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("farm_dashboard=info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "farm.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Mount ───────────────────────────────────────────────────────
    let session = Session::mount(&cfg)?;
    let web_state = AppState {
        reconciler: session.reconciler(),
        dispatcher: session.dispatcher(),
    };

    // ── Web API until ctrl-c ────────────────────────────────────────
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let served = web::serve(web_state, cfg.web.port, shutdown).await;

    info!("shutting down");
    session.unmount().await;
    served
}
