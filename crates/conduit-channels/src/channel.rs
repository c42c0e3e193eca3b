// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! The `Channel` plugin trait — a template-method lifecycle plus the
//! message hooks every messaging integration implements.
//!
//! Concrete platform SDKs (Telegram, Discord, Slack, …) are out of scope
//! here; this crate ships the trait, the two lifecycle helpers
//! ([`crate::ConnectionManager`], [`crate::HealthChecker`]), and
//! [`crate::LoopbackChannel`] for testing channel-driving code without a
//! real network.

use async_trait::async_trait;
use serde_json::Value;

/// Settings handed to a channel at `on_start`. Kept as a name plus a
/// free-form JSON bag rather than a per-platform struct, since concrete
/// channel configuration shapes live with the platform integration, not
/// with this trait.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    pub name: String,
    pub settings: Value,
}

/// A message arriving from the platform.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub text: String,
}

/// A message about to be (or just) sent to the platform.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    pub reply_to: Option<String>,
}

/// A media attachment for `send_media`. `data` carries the raw bytes —
/// channels that need a URL instead fetch it themselves from `filename`
/// metadata or a prior upload step; this trait doesn't prescribe one.
#[derive(Debug, Clone)]
pub struct MediaAttachment {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

/// The channel plugin lifecycle: `on_init -> on_start -> on_ready` to come
/// up, `on_stop -> on_destroy` to go down. Every hook has a no-op default
/// except `on_start`, `send_text`, and `send_media`, which a concrete
/// channel must implement.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// One-time setup before the first start (e.g. validating credentials).
    async fn on_init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Bring the channel up against `config`. Concrete channels open their
    /// connection here (often by calling into a [`crate::ConnectionManager`]).
    async fn on_start(&self, config: &ChannelConfig) -> anyhow::Result<()>;

    /// Called once the channel is fully connected and ready to send/receive.
    async fn on_ready(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Begin shutting down.
    async fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release any resources acquired in `on_init`/`on_start`.
    async fn on_destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs for every inbound message. Returning `None` filters it out
    /// before it reaches the agent loop.
    async fn on_message_received(&self, msg: InboundMessage) -> Option<InboundMessage> {
        Some(msg)
    }

    /// Runs for every outbound message, after it has been sent.
    async fn on_message_sent(&self, _msg: &OutboundMessage) {}

    /// Send a text message, returning the platform's message id.
    async fn send_text(
        &self,
        target: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<String>;

    /// Send a media attachment with an optional caption, returning the
    /// platform's message id.
    async fn send_media(
        &self,
        target: &str,
        media: MediaAttachment,
        caption: Option<&str>,
    ) -> anyhow::Result<String>;
}
