//! Router assembly and the listening loop (§4.J, §4.L).
//!
//! Every accepted connection becomes its own tokio task — the idiomatic
//! stand-in for the reactor-plus-strand model described in §4.L, since a
//! tokio task already guarantees that a single connection's requests run
//! without interleaving with each other, just as a strand would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use viaduct_common::Result;

use crate::http::dispatch;
use crate::http::keepalive::{KeepAliveLayer, KeepAliveTracker};
use crate::http::state::ServerState;

/// The per-request timeout (§4.J names no explicit request deadline, but a
/// runaway query must not pin a worker forever).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/route/v1/{profile}/{coords}", get(dispatch::route_handler))
        .route("/nearest/v1/{profile}/{coords}", get(dispatch::nearest_handler))
        .route("/table/v1/{profile}/{coords}", get(dispatch::table_handler))
        .route("/trip/v1/{profile}/{coords}", get(dispatch::trip_handler))
        .route("/match/v1/{profile}/{coords}", get(dispatch::match_handler))
        .route("/health", get(dispatch::health_handler))
        .layer(KeepAliveLayer::new(KeepAliveTracker::new()))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves until the process is signaled to stop. The
/// per-connection peer address is threaded through as `ConnectInfo` so the
/// keep-alive layer can key its accounting on it.
pub async fn serve(state: Arc<ServerState>, addr: SocketAddr) -> Result<()> {
    let router = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| viaduct_common::Error::internal(format!("binding {addr}: {e}")))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router)
        .await
        .map_err(|e| viaduct_common::Error::internal(format!("server loop: {e}")))
}
