// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! WebSocket bridge — the single bidirectional transport clients use to
//! speak the `{type:req/resp/err/event}` envelope (spec §6.1). The first
//! request on a new connection must be `connect`; every other method is
//! rejected with `AUTH_REQUIRED` until it succeeds.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use conduit_node::NodeRegistry;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayErrorCode};
use crate::methods::{CallerContext, MethodRegistry, Role};
use crate::protocol::{ConnectParams, ConnectResult, ErrorEnvelope, EventEnvelope, Request, Response as RpcResponse, PROTOCOL_VERSION};

/// Shared state the WebSocket handler dispatches requests against.
#[derive(Clone)]
pub struct WsState {
    pub methods: Arc<MethodRegistry>,
    pub events: broadcast::Sender<EventEnvelope>,
    pub node_registry: Option<Arc<NodeRegistry>>,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

pub async fn handle_socket(mut socket: WebSocket, state: WsState) {
    let mut events = state.events.subscribe();
    let mut caller: Option<CallerContext> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_inbound_text(&mut socket, &state, &mut caller, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket recv error: {e}");
                        break;
                    }
                }
            }
            result = events.recv() => {
                match result {
                    Ok(ev) => send_json(&mut socket, &ev).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {n} events");
                        let err = ErrorEnvelope {
                            kind: "err",
                            id: String::new(),
                            code: GatewayErrorCode::Unavailable,
                            message: format!("event stream lagged by {n} events"),
                            details: None,
                            retryable: true,
                            retry_after_ms: None,
                        };
                        send_json(&mut socket, &err).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    debug!("WebSocket connection closed");
}

/// Parses and dispatches one inbound text frame. Returns `false` if the
/// connection should be torn down.
async fn handle_inbound_text(
    socket: &mut WebSocket,
    state: &WsState,
    caller: &mut Option<CallerContext>,
    text: &str,
) -> bool {
    let req: Request = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            let err = ErrorEnvelope {
                kind: "err",
                id: String::new(),
                code: GatewayErrorCode::InvalidRequest,
                message: format!("invalid request envelope: {e}"),
                details: None,
                retryable: false,
                retry_after_ms: None,
            };
            send_json(socket, &err).await;
            return true;
        }
    };

    if req.method == "connect" {
        match handle_connect(req.params, state.node_registry.as_deref()) {
            Ok((result, established)) => {
                *caller = Some(established);
                send_json(socket, &RpcResponse::new(req.id, result)).await;
            }
            Err(e) => send_json(socket, &ErrorEnvelope::from_error(req.id, &e)).await,
        }
        return true;
    }

    let Some(caller_ctx) = caller.clone() else {
        let err = GatewayError::new(GatewayErrorCode::AuthRequired, "connect must be the first request");
        send_json(socket, &ErrorEnvelope::from_error(req.id, &err)).await;
        return true;
    };

    match state.methods.dispatch(&req.method, caller_ctx, req.params).await {
        Ok(result) => send_json(socket, &RpcResponse::new(req.id, result)).await,
        Err(e) => send_json(socket, &ErrorEnvelope::from_error(req.id, &e)).await,
    }
    true
}

fn handle_connect(
    params: serde_json::Value,
    node_registry: Option<&NodeRegistry>,
) -> Result<(serde_json::Value, CallerContext), GatewayError> {
    let params: ConnectParams = serde_json::from_value(params)
        .map_err(|e| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("invalid connect params: {e}")))?;

    if params.max_protocol < PROTOCOL_VERSION {
        return Err(GatewayError::new(
            GatewayErrorCode::InvalidRequest,
            format!("client max protocol {} is below {PROTOCOL_VERSION}", params.max_protocol),
        ));
    }

    // Transport-level auth (bearer token) already gated the HTTP upgrade;
    // a device-signed or node-tokened `connect` additionally proves a
    // narrower identity, scoped to just that caller's own methods — a
    // node never gets the `"*"` admin scope an operator does.
    let auth = params.auth.as_ref();
    let (role, scopes, session_id) = if let Some(node_auth) = auth.and_then(|a| a.node.as_ref()) {
        let registry = node_registry
            .ok_or_else(|| GatewayError::new(GatewayErrorCode::AuthRequired, "node auth is not available"))?;
        let node_id = registry
            .verify_token(&node_auth.token)
            .ok_or_else(|| GatewayError::new(GatewayErrorCode::AuthRequired, "invalid node token"))?;
        (Role::Node, Vec::new(), Some(node_id))
    } else if auth.and_then(|a| a.device.as_ref()).is_some() {
        (Role::Device, vec!["*".to_string()], None)
    } else {
        (Role::Operator, vec!["*".to_string()], None)
    };

    let caller = CallerContext { role, scopes, session_id };
    let result = serde_json::to_value(ConnectResult {
        protocol: PROTOCOL_VERSION,
        capabilities: vec!["chat".to_string(), "cron".to_string(), "approval".to_string()],
    })
    .expect("ConnectResult always serializes");

    Ok((result, caller))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bare_connect_params() -> serde_json::Value {
        json!({ "maxProtocol": PROTOCOL_VERSION, "client": { "name": "test", "version": "1" } })
    }

    #[test]
    fn bare_connect_yields_operator_with_admin_scope() {
        let (_, caller) = handle_connect(bare_connect_params(), None).unwrap();
        assert_eq!(caller.role, Role::Operator);
        assert!(caller.scopes.iter().any(|s| s == "*"));
    }

    #[test]
    fn stale_client_protocol_is_rejected() {
        let mut params = bare_connect_params();
        params["maxProtocol"] = json!(0);
        let err = handle_connect(params, None).unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::InvalidRequest);
    }

    #[test]
    fn node_connect_without_a_registry_is_auth_required() {
        let mut params = bare_connect_params();
        params["auth"] = json!({ "node": { "token": "whatever" } });
        let err = handle_connect(params, None).unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::AuthRequired);
    }

    #[test]
    fn node_connect_with_an_unknown_token_is_auth_required() {
        let registry = NodeRegistry::new();
        let mut params = bare_connect_params();
        params["auth"] = json!({ "node": { "token": "ghost" } });
        let err = handle_connect(params, Some(&registry)).unwrap_err();
        assert_eq!(err.code, GatewayErrorCode::AuthRequired);
    }

    #[test]
    fn node_connect_with_a_valid_token_yields_scoped_node_role() {
        let registry = NodeRegistry::new();
        registry.request_pairing("node-1", "nonce", "sig").unwrap();
        let token = registry.approve_pairing("node-1", "worker").unwrap().unwrap();

        let mut params = bare_connect_params();
        params["auth"] = json!({ "node": { "token": token } });
        let (_, caller) = handle_connect(params, Some(&registry)).unwrap();

        assert_eq!(caller.role, Role::Node);
        assert!(caller.scopes.is_empty());
        assert_eq!(caller.session_id.as_deref(), Some("node-1"));
    }
}

async fn send_json(socket: &mut WebSocket, value: &impl serde::Serialize) {
    if let Ok(json) = serde_json::to_string(value) {
        let _ = socket.send(Message::Text(json)).await;
    }
}
