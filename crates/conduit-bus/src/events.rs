// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The exhaustive event taxonomy emitted during one agent turn (spec §4.3):
///
/// ```text
/// agent_start → turn_start → message_start
///   (thinking_start → thinking_delta* → thinking_end)?
///   (text_delta | tool_call_start → tool_call_delta* → tool_call_end)*
/// message_end → turn_end
///   (tool_execution_start → tool_execution_update* → tool_execution_end)*
/// [loop back to turn_start until no more tool calls]
/// agent_end
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentStart,
    TurnStart,
    MessageStart,
    ThinkingStart,
    ThinkingDelta,
    ThinkingEnd,
    TextDelta,
    ToolCallStart,
    ToolCallDelta,
    ToolCallEnd,
    MessageEnd,
    TurnEnd,
    ToolExecutionStart,
    ToolExecutionUpdate,
    ToolExecutionEnd,
    AgentEnd,
}

/// A single emitted event: its kind, a timestamp, and a free-form JSON
/// payload whose shape depends on `kind` (e.g. `text_delta` carries
/// `{"text": "..."}`, `tool_call_start` carries `{"id","name"}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// Session/run correlation id, present on every event in a turn.
    pub run_id: String,
    pub payload: Value,
}

impl Event {
    pub fn new(kind: EventKind, run_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            run_id: run_id.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_serializes_snake_case() {
        let s = serde_json::to_string(&EventKind::ToolCallStart).unwrap();
        assert_eq!(s, "\"tool_call_start\"");
    }

    #[test]
    fn event_round_trips_json() {
        let e = Event::new(EventKind::TextDelta, "run-1", json!({"text": "hi"}));
        let s = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&s).unwrap();
        assert_eq!(back.kind, EventKind::TextDelta);
        assert_eq!(back.run_id, "run-1");
        assert_eq!(back.payload["text"], "hi");
    }
}
