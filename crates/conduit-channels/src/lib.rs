// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Channel plugin base: the [`Channel`] trait, [`ConnectionManager`] and
//! [`HealthChecker`] lifecycle helpers, and outbound message chunking.
//! Concrete platform integrations (Telegram, Discord, Slack, …) live
//! outside this crate and compose these pieces.

mod channel;
mod chunker;
mod connection_manager;
mod health_checker;
mod loopback;

pub use channel::{Channel, ChannelConfig, InboundMessage, MediaAttachment, OutboundMessage};
pub use chunker::{chunk_text, ChunkMode, DISCORD_LIMIT, SLACK_LIMIT, TELEGRAM_LIMIT};
pub use connection_manager::{
    backoff_delay, BackoffConfig, ConnectionManager, ConnectionMetrics, ConnectionState, Connector,
};
pub use health_checker::{HealthCheck, HealthChecker};
pub use loopback::{LoopbackChannel, SentMessage};
