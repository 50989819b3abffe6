//! HTTP server lifecycle.

use crate::routes::{router, AppState};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Errors from serving HTTP.
#[derive(Debug, Error)]
pub enum GatewayHttpError {
    /// The listen socket could not be bound or the server failed.
    #[error("http server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve the gateway routes until `shutdown` flips to `true`.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayHttpError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            // Either an explicit stop or the sender going away ends serving.
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("http server stopped");
    Ok(())
}
