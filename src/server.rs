//! HTTP surface: the relay WebSocket plus the static client UI.

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::relay::Relay;
use crate::transport::client::client_leg;
use crate::transport::ws::REQUEST_ID_HEADER;

/// Mounts the relay at `config.realtime_path` and serves `config.static_dir`
/// for everything else.
pub fn router(relay: Relay, config: &ServerConfig) -> Router {
    let static_files = ServeDir::new(&config.static_dir).append_index_html_on_directories(true);
    Router::new()
        .route(&config.realtime_path, get(realtime_handler))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

async fn realtime_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(relay): State<Relay>,
) -> Response {
    let request_id = request_id(&headers);
    ws.on_upgrade(move |socket| async move {
        relay.attach(client_leg(socket), request_id).await;
    })
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_id_is_taken_from_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), None);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" req-42 "));
        assert_eq!(request_id(&headers).as_deref(), Some("req-42"));
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(request_id(&headers), None);
    }
}
