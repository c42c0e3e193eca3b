// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! The Gateway wire protocol: a JSON envelope exchanged over a single
//! bidirectional transport (WebSocket). Clients send `req`; the Gateway
//! answers with `resp` or `err` and may push unsolicited `event` frames.
//! `connect` is itself a `req` whose result carries the negotiated
//! protocol version and capability set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayErrorCode;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub result: Value,
}

impl Response {
    pub fn new(id: impl Into<String>, result: Value) -> Self {
        Self { kind: "resp", id: id.into(), result }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub code: GatewayErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
    #[serde(rename = "retryAfterMs", skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorEnvelope {
    pub fn from_error(id: impl Into<String>, err: &crate::error::GatewayError) -> Self {
        Self {
            kind: "err",
            id: id.into(),
            code: err.code,
            message: err.message.clone(),
            details: err.details.clone(),
            retryable: err.code.retryable(),
            retry_after_ms: err.retry_after_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub method: String,
    pub data: Value,
    #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl EventEnvelope {
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self { kind: "event", method: method.into(), data, run_id: None }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Outbound server->client frame, the union of `resp`/`err`/`event`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Response(Response),
    Error(ErrorEnvelope),
    Event(EventEnvelope),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(default)]
    pub auth: Option<ConnectAuth>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectAuth {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub device: Option<crate::node_bridge::DeviceAuthParams>,
    #[serde(default)]
    pub node: Option<crate::node_bridge::NodeAuthParams>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectResult {
    pub protocol: u32,
    pub capabilities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_without_params() {
        let req: Request = serde_json::from_str(r#"{"id":"1","method":"connect"}"#).unwrap();
        assert_eq!(req.method, "connect");
        assert!(req.params.is_null());
    }

    #[test]
    fn response_serializes_with_type_tag() {
        let resp = Response::new("42", serde_json::json!({"ok": true}));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["type"], "resp");
        assert_eq!(v["id"], "42");
    }

    #[test]
    fn error_envelope_carries_retryable_flag() {
        let err = crate::error::GatewayError::new(GatewayErrorCode::Unavailable, "down");
        let env = ErrorEnvelope::from_error("7", &err);
        assert!(env.retryable);
        assert_eq!(env.code, GatewayErrorCode::Unavailable);
    }

    #[test]
    fn event_envelope_omits_run_id_when_absent() {
        let env = EventEnvelope::new("chat.message", serde_json::json!({}));
        let v = serde_json::to_value(&env).unwrap();
        assert!(v.get("runId").is_none());
    }
}
