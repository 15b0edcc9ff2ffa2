// src/mcp/http.rs
// MCP over HTTP (Streamable HTTP transport) plus the health surface

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::discovery::Discovery;
use crate::mcp::NetworkMcpServer;

/// Create the MCP HTTP service. Each session gets a clone of the handler;
/// all real state is shared behind it.
pub fn create_mcp_service(
    server: NetworkMcpServer,
    cancellation_token: CancellationToken,
) -> StreamableHttpService<NetworkMcpServer, LocalSessionManager> {
    let service_factory = move || Ok(server.clone());
    let session_manager = Arc::new(LocalSessionManager::default());
    let config = StreamableHttpServerConfig {
        sse_keep_alive: Some(std::time::Duration::from_secs(15)),
        sse_retry: None,
        stateful_mode: true,
        cancellation_token,
    };
    StreamableHttpService::new(service_factory, session_manager, config)
}

/// Router: the protocol endpoint at /mcp plus liveness and the readiness
/// gate backed by discovery's initial-scan predicate.
pub fn create_router(
    mcp_service: StreamableHttpService<NetworkMcpServer, LocalSessionManager>,
    discovery: Arc<Discovery>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(discovery)
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(discovery): State<Arc<Discovery>>) -> (StatusCode, &'static str) {
    if discovery.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "waiting for initial discovery scan")
    }
}
