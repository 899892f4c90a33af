mod config;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use duet_api::state::{AppState, AppStateInner};
use duet_db::Database;
use duet_gateway::Gateway;
use duet_gateway::auth::JwtKeys;
use duet_gateway::connection::ws_upgrade;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "duet_server=debug,duet_gateway=debug,duet_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;
    if !config.session.require_token {
        warn!("DUET_REQUIRE_TOKEN is off: websocket clients may connect without a token");
    }

    let db = Arc::new(Database::open(&config.db_path)?);
    let keys = Arc::new(JwtKeys::new(&config.jwt_secret));

    let gateway = Gateway::new(db.clone(), keys.clone(), config.session.clone());
    let app_state: AppState = Arc::new(AppStateInner { db, verifier: keys });

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(gateway.clone());

    let app = Router::new()
        .merge(ws_route)
        .merge(duet_api::routes(app_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Duet server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let gateway = gateway.clone();
            async move {
                shutdown_signal().await;
                // Upgraded sockets outlive the HTTP drain, close them here.
                gateway.shutdown();
            }
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
