// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! HTTP/WebSocket transport: bearer-auth and security middleware layered
//! over a single `/ws` upgrade route, the one bidirectional transport
//! the Gateway protocol runs over.

pub mod auth;
pub mod security;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use conduit_node::NodeRegistry;
use tokio::sync::broadcast;

use crate::methods::MethodRegistry;
use crate::protocol::EventEnvelope;
use auth::AuthState;
use ws::WsState;

/// Builds the full axum router: security headers and CSRF guard on every
/// route, bearer auth gating the WebSocket upgrade, everything else
/// rejected (there is no other surface — the protocol lives entirely on
/// `/ws`). `node_registry` is consulted only by a node-tokened `connect`;
/// pass `None` to disable the node auth path entirely.
pub fn router(
    auth_state: AuthState,
    methods: Arc<MethodRegistry>,
    events: broadcast::Sender<EventEnvelope>,
    node_registry: Option<Arc<NodeRegistry>>,
) -> Router {
    let ws_state = WsState { methods, events, node_registry };

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(auth_state.clone(), auth::bearer_auth_mw::<AuthState>))
        .layer(middleware::from_fn(security::csrf_guard))
        .layer(middleware::from_fn(security::security_headers))
        .with_state(ws_state)
}

/// Binds and serves the router on `addr` until the process is signalled
/// to shut down.
pub async fn serve(
    addr: SocketAddr,
    auth_state: AuthState,
    methods: Arc<MethodRegistry>,
    events: broadcast::Sender<EventEnvelope>,
    node_registry: Option<Arc<NodeRegistry>>,
) -> anyhow::Result<()> {
    let app = router(auth_state, methods, events, node_registry);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
