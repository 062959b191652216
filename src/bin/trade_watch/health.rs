//! Liveness endpoint for external process supervisors.
//!
//! Always responds `200 OK`, independent of the pipeline health.

use axum::{Router, routing::get};
use tokio::sync::watch;
use tracing::info;

const BODY: &str = "trade-watch is running";

pub fn router() -> Router {
    Router::new()
        .route("/", get(alive))
        .route("/health", get(alive))
}

async fn alive() -> &'static str {
    BODY
}

/// Serves the liveness endpoint until shutdown.
pub async fn serve(port: u16, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "liveness server listening");

    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
