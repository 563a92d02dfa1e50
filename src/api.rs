use std::{net::SocketAddr, path::Path, sync::Arc};

use axum::Router;
use encoder_bus::{FanOut, LiveOptions, ProcessLauncher};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

#[derive(Clone)]
pub(crate) struct AppState {
    pub fanout: Arc<FanOut>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub live: LiveOptions,
}

/// `/video` plus static files (the HLS output included) for every other path.
pub(crate) fn app_router(web_dir: &Path, state: AppState) -> Router {
    Router::new()
        .merge(crate::handler::video::video_router())
        .fallback_service(ServeDir::new(web_dir))
        .with_state(state)
}

pub(crate) fn start_api_server(
    cancel: CancellationToken,
    listen: SocketAddr,
    web_dir: &Path,
    state: AppState,
) {
    let app = app_router(web_dir, state);
    tokio::spawn(async move {
        let listener = match TcpListener::bind(listen).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("Error binding API server to {}: {}", listen, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API server started on {}", listen);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("Error starting API server: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {
            log::info!("Shutting down API server...");
        }
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
