// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! An in-memory [`Channel`] used to exercise channel lifecycle and
//! message-hook code without a real network connection.

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::channel::{Channel, ChannelConfig, MediaAttachment, OutboundMessage};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub target: String,
    pub text: String,
    pub reply_to: Option<String>,
}

/// Records every lifecycle call and every sent message for assertions.
#[derive(Default)]
pub struct LoopbackChannel {
    pub sent: Mutex<Vec<SentMessage>>,
    pub lifecycle_calls: Mutex<Vec<&'static str>>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn lifecycle(&self) -> Vec<&'static str> {
        self.lifecycle_calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.lifecycle_calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn on_init(&self) -> anyhow::Result<()> {
        self.record("on_init");
        Ok(())
    }

    async fn on_start(&self, _config: &ChannelConfig) -> anyhow::Result<()> {
        self.record("on_start");
        Ok(())
    }

    async fn on_ready(&self) -> anyhow::Result<()> {
        self.record("on_ready");
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        self.record("on_stop");
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        self.record("on_destroy");
        Ok(())
    }

    async fn on_message_sent(&self, _msg: &OutboundMessage) {
        self.record("on_message_sent");
    }

    async fn send_text(
        &self,
        target: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<String> {
        self.sent.lock().unwrap().push(SentMessage {
            target: target.to_string(),
            text: text.to_string(),
            reply_to: reply_to.map(str::to_string),
        });
        Ok(Uuid::new_v4().to_string())
    }

    async fn send_media(
        &self,
        target: &str,
        media: MediaAttachment,
        caption: Option<&str>,
    ) -> anyhow::Result<String> {
        self.sent.lock().unwrap().push(SentMessage {
            target: target.to_string(),
            text: caption.unwrap_or(&media.filename).to_string(),
            reply_to: None,
        });
        Ok(Uuid::new_v4().to_string())
    }
}
