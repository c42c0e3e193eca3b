// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Structured Gateway error codes (spec §6.1/§7). Every `{type:err,...}`
//! envelope carries one of these, plus a `retryable` flag the client uses
//! to decide whether to retry the call.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    NotLinked,
    NotPaired,
    AuthRequired,
    AuthFailed,
    InvalidRequest,
    MethodNotFound,
    PermissionDenied,
    AgentTimeout,
    AgentError,
    Unavailable,
    InternalError,
    SessionNotFound,
    ChannelNotFound,
    ChannelError,
}

impl GatewayErrorCode {
    /// Whether a client encountering this code should retry the call.
    /// User and auth errors are not retryable without changing the
    /// request; resource/transient errors are.
    pub fn retryable(self) -> bool {
        matches!(self, Self::Unavailable | Self::AgentTimeout)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retry_after_ms: Option<u64>,
}

impl GatewayError {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None, retry_after_ms: None }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    /// Logs `err` at the point it becomes unhandled and converts it to an
    /// `INTERNAL_ERROR` gateway error, per spec §7's unhandled-exception
    /// policy.
    pub fn from_unhandled(err: &anyhow::Error) -> Self {
        tracing::error!(error = ?err, "unhandled error at gateway boundary");
        Self::new(GatewayErrorCode::InternalError, err.to_string())
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}
