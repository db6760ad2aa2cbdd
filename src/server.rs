//! HTTP surface: serves the registry in the text exposition format.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

struct AppState {
    registry: Registry,
    telemetry_path: String,
}

/// Builds the router: `telemetry_path` serves metrics, `/` a landing page.
pub fn router(registry: Registry, telemetry_path: &str) -> Router {
    let state = Arc::new(AppState {
        registry,
        telemetry_path: telemetry_path.to_string(),
    });
    let router = Router::new().route(telemetry_path, get(handle_metrics));
    let router = if telemetry_path == "/" {
        router
    } else {
        router.route("/", get(handle_index))
    };
    router.with_state(state)
}

/// Serves `router` on `listen` until Ctrl-C.
pub async fn serve(listen: &str, router: Router) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    let registry = state.registry.clone();
    // Scrapes block on the database client.
    let families = match tokio::task::spawn_blocking(move || registry.gather()).await {
        Ok(families) => families,
        Err(e) => {
            error!(error = %e, "scrape task failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "scrape failed").into_response();
        }
    };

    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut body) {
        error!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        body,
    )
        .into_response()
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>PgBouncer Exporter</title></head>\n<body>\n\
         <h1>PgBouncer Exporter {}</h1>\n<p><a href=\"{}\">Metrics</a></p>\n</body>\n</html>\n",
        crate::VERSION,
        state.telemetry_path
    ))
}
