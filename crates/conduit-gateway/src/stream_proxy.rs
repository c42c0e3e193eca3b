// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Turns an agent's internal `conduit_bus::Event` stream into
//! `message_update` Gateway events, stripping fields that are internal
//! bookkeeping rather than wire payload (`text_delta`'s `cumulative`
//! field, used for resuming a dropped turn, never leaves the process).

use conduit_bus::events::{Event, EventKind};
use serde_json::{json, Value};

use crate::protocol::EventEnvelope;

/// Gateway method name all forwarded agent-turn events are published under.
pub const MESSAGE_UPDATE_METHOD: &str = "chat.message_update";

fn is_turn_boundary(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::MessageEnd
            | EventKind::TurnEnd
            | EventKind::ToolCallEnd
            | EventKind::ToolExecutionEnd
            | EventKind::ThinkingEnd
            | EventKind::AgentEnd
    )
}

/// Strips internal-only fields from an event's payload before it is
/// forwarded to a Gateway client. `text_delta` carries a `cumulative`
/// field used internally to resume an interrupted turn; clients only
/// ever need the incremental `text`.
fn sanitize_payload(kind: EventKind, payload: &Value) -> Value {
    if kind == EventKind::TextDelta {
        if let Some(obj) = payload.as_object() {
            let mut cleaned = obj.clone();
            cleaned.remove("cumulative");
            return Value::Object(cleaned);
        }
    }
    payload.clone()
}

/// Converts one internal event into the envelope sent to a Gateway client.
pub fn to_event_envelope(event: &Event) -> EventEnvelope {
    let data = json!({
        "kind": event.kind,
        "payload": sanitize_payload(event.kind, &event.payload),
    });
    EventEnvelope::new(MESSAGE_UPDATE_METHOD, data).with_run_id(event.run_id.clone())
}

/// Batches events for a single run, flushing at a turn boundary or once
/// `max_batch` events have accumulated. Used when a transport benefits
/// from coalescing high-frequency `text_delta`/`thinking_delta` events
/// rather than forwarding every one individually.
#[derive(Debug, Default)]
pub struct StreamBatcher {
    max_batch: usize,
    pending: Vec<Event>,
}

impl StreamBatcher {
    pub fn new(max_batch: usize) -> Self {
        Self { max_batch: max_batch.max(1), pending: Vec::new() }
    }

    /// Feeds one event in; returns the batch to flush if this event
    /// fills the batch or ends a turn, `None` otherwise.
    pub fn push(&mut self, event: Event) -> Option<Vec<Event>> {
        let boundary = is_turn_boundary(event.kind);
        self.pending.push(event);
        if boundary || self.pending.len() >= self.max_batch {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    pub fn flush(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending)
    }
}
