pub mod auth;
pub mod config;
pub mod error;
pub mod path;
pub mod service;
pub mod storage;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use config::{Config, Listener};
use service::AppState;
use storage::pg::PgStorage;

/// Builds the connection pool, wires up the Node Service router, and
/// serves it on the configured listener. A Unix socket path supersedes
/// the TCP port.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(config.backend.cp_min)
        .max_connections(config.backend.cp_max)
        .connect(&config.backend.dsn)
        .await?;

    let state = AppState {
        storage: Arc::new(PgStorage::new(pool)),
        admin: config.server.admin.clone(),
    };
    let app = service::router(state);

    match config.server.listener {
        Listener::Tcp(port) => {
            let addr = format!("0.0.0.0:{port}");
            info!(target: "treeconf", %addr, "listening on TCP");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await?;
        }
        Listener::Unix(ref path) => {
            info!(target: "treeconf", %path, "listening on Unix socket");
            let _ = std::fs::remove_file(path);
            let listener = tokio::net::UnixListener::bind(path)?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
