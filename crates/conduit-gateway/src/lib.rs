// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Gateway: the JSON-envelope RPC/event protocol that lets an operator
//! client or a paired device drive a conduit agent over one WebSocket
//! connection — `connect` handshake, typed method dispatch, in-flight
//! run tracking for `chat.abort`, and the event stream proxy that
//! forwards agent-turn events as `chat.message_update`.

pub mod error;
pub mod http;
pub mod methods;
pub mod node_bridge;
pub mod protocol;
pub mod runs;
pub mod stream_proxy;

pub use error::{GatewayError, GatewayErrorCode};
pub use methods::{CallerContext, MethodPolicy, MethodRegistry, Role};
pub use protocol::{ConnectParams, ConnectResult, ErrorEnvelope, EventEnvelope, Request, Response};
pub use runs::ActiveRuns;
