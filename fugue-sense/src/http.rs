use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::manager::{Health, StatusBoard};

pub fn router(board: StatusBoard) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(board)
}

/// Serve the health surface until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    board: StatusBoard,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(board))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    info!("HTTP server shut down");
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn status_handler(State(board): State<StatusBoard>) -> Json<Health> {
    Json(board.health())
}
