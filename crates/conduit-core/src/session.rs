// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Per-session message log and turn bookkeeping.
//!
//! A [`Session`] is identified by a session key (e.g. `telegram:<chat_id>`)
//! and owns the ordered message log, the turn counter, the current model
//! and thinking level, the steering/follow-up queues, and the session's
//! [`AbortToken`]. A session is mutated only from the single task driving
//! its turn (`AgentLoop::prompt`/`continue_conversation`); see §5.

use std::collections::VecDeque;

use conduit_bus::{abort_pair, AbortController, AbortToken};
use conduit_model::{Message, ThinkingMode};

/// Either mode the steering/follow-up queues can be drained in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Pop exactly one queued message per drain.
    OneAtATime,
    /// Pop every queued message, in order, per drain.
    All,
}

/// A complete tool call the assistant requested, pending sequential execution.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Per-session message log plus turn state.
///
/// Sessions are created on first reference and mutated only from the single
/// task driving that session's turn — never accessed by two agent turns
/// concurrently (enforced by the Gateway, which holds sessions behind a
/// `try_lock`'d mutex; see `conduit-gateway`).
pub struct Session {
    pub id: String,
    messages: Vec<Message>,
    pub turn_count: u64,
    pub model: String,
    pub thinking_level: ThinkingMode,
    pub max_tokens: usize,
    token_count: usize,

    steering_queue: VecDeque<String>,
    follow_up_queue: VecDeque<String>,

    /// Owns the write side of this session's abort token. Replaced on every
    /// `prompt`/`continue_conversation` call so a session remains usable
    /// after a prior turn was aborted (§4.4 failure semantics).
    abort_controller: AbortController,
    abort_token: AbortToken,

    /// Whether a provider stream is currently being consumed for this session.
    pub is_streaming: bool,
    /// The in-progress assistant message text, if a turn is mid-stream.
    pub stream_message: Option<String>,
    /// Tool calls accumulated from the current turn's provider stream,
    /// awaiting sequential execution.
    pub pending_tool_calls: Vec<PendingToolCall>,
}

impl Session {
    pub fn new(id: impl Into<String>, model: impl Into<String>, max_tokens: usize) -> Self {
        let (abort_controller, abort_token) = abort_pair();
        Self {
            id: id.into(),
            messages: Vec::new(),
            turn_count: 0,
            model: model.into(),
            thinking_level: ThinkingMode::Off,
            max_tokens,
            token_count: 0,
            steering_queue: VecDeque::new(),
            follow_up_queue: VecDeque::new(),
            abort_controller,
            abort_token,
            is_streaming: false,
            stream_message: None,
            pending_tool_calls: Vec::new(),
        }
    }

    // ── Message log ─────────────────────────────────────────────────────────

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.token_count += message.approx_tokens();
        self.messages.push(message);
    }

    pub fn push_many(&mut self, messages: impl IntoIterator<Item = Message>) {
        for m in messages {
            self.push(m);
        }
    }

    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }

    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(Message::approx_tokens).sum();
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        self.token_count as f32 / self.max_tokens as f32
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// The first message in the log, if it is the system message.
    pub fn system_message(&self) -> Option<&Message> {
        self.messages
            .first()
            .filter(|m| m.role == conduit_model::Role::System)
    }

    // ── Steering / follow-up queues ───────────────────────────────────────

    pub fn steer(&mut self, text: impl Into<String>) {
        self.steering_queue.push_back(text.into());
    }

    pub fn follow_up(&mut self, text: impl Into<String>) {
        self.follow_up_queue.push_back(text.into());
    }

    pub fn has_steering(&self) -> bool {
        !self.steering_queue.is_empty()
    }

    pub fn has_follow_up(&self) -> bool {
        !self.follow_up_queue.is_empty()
    }

    /// Drain the steering queue per `mode`, returning the drained texts in
    /// order. Does not mutate the message log — the caller appends them.
    pub fn drain_steering(&mut self, mode: DrainMode) -> Vec<String> {
        Self::drain(&mut self.steering_queue, mode)
    }

    pub fn drain_follow_up(&mut self, mode: DrainMode) -> Vec<String> {
        Self::drain(&mut self.follow_up_queue, mode)
    }

    fn drain(queue: &mut VecDeque<String>, mode: DrainMode) -> Vec<String> {
        match mode {
            DrainMode::OneAtATime => queue.pop_front().into_iter().collect(),
            DrainMode::All => queue.drain(..).collect(),
        }
    }

    // ── Abort ──────────────────────────────────────────────────────────────

    pub fn abort_token(&self) -> AbortToken {
        self.abort_token.clone()
    }

    pub fn abort(&self, reason: Option<String>) {
        self.abort_controller.trigger(reason);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_token.aborted()
    }

    /// Reset the abort token for a new turn. Per §4.4, "the session remains
    /// usable (subsequent prompt or continue_conversation resets the abort
    /// token)" after a prior abort.
    pub fn reset_abort(&mut self) {
        let (controller, token) = abort_pair();
        self.abort_controller = controller;
        self.abort_token = token;
    }

    /// No turn streaming, no tool calls pending, both queues empty.
    pub fn is_idle(&self) -> bool {
        !self.is_streaming
            && self.pending_tool_calls.is_empty()
            && !self.has_steering()
            && !self.has_follow_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("test:1", "test-model", 1000)
    }

    #[test]
    fn new_session_has_no_messages() {
        let s = session();
        assert!(s.messages().is_empty());
        assert_eq!(s.token_count(), 0);
    }

    #[test]
    fn push_updates_token_count() {
        let mut s = session();
        s.push(Message::user("12345678"));
        assert_eq!(s.token_count(), 2);
    }

    #[test]
    fn push_many_accumulates() {
        let mut s = session();
        s.push_many(vec![Message::user("hi"), Message::assistant("there")]);
        assert_eq!(s.messages().len(), 2);
    }

    #[test]
    fn context_fraction_zero_when_empty() {
        let s = session();
        assert_eq!(s.context_fraction(), 0.0);
    }

    #[test]
    fn context_fraction_computed_from_max_tokens() {
        let mut s = Session::new("t", "m", 100);
        s.push(Message::user("x".repeat(40))); // 10 tokens
        assert!((s.context_fraction() - 0.1).abs() < 0.001);
    }

    #[test]
    fn is_near_limit_respects_threshold() {
        let mut s = Session::new("t", "m", 100);
        s.push(Message::user("x".repeat(360))); // 90 tokens
        assert!(s.is_near_limit(0.8));
        assert!(!s.is_near_limit(0.95));
    }

    #[test]
    fn replace_messages_recalculates_tokens() {
        let mut s = session();
        s.push(Message::user("hello"));
        s.replace_messages(vec![Message::user("1234567890123456")]); // 4 tokens
        assert_eq!(s.token_count(), 4);
    }

    #[test]
    fn steer_and_drain_one_at_a_time() {
        let mut s = session();
        s.steer("a");
        s.steer("b");
        let drained = s.drain_steering(DrainMode::OneAtATime);
        assert_eq!(drained, vec!["a".to_string()]);
        assert!(s.has_steering());
    }

    #[test]
    fn steer_and_drain_all() {
        let mut s = session();
        s.steer("a");
        s.steer("b");
        let drained = s.drain_steering(DrainMode::All);
        assert_eq!(drained, vec!["a".to_string(), "b".to_string()]);
        assert!(!s.has_steering());
    }

    #[test]
    fn follow_up_queue_independent_of_steering() {
        let mut s = session();
        s.steer("steer-msg");
        s.follow_up("followup-msg");
        assert!(s.has_steering());
        assert!(s.has_follow_up());
        let drained = s.drain_follow_up(DrainMode::All);
        assert_eq!(drained, vec!["followup-msg".to_string()]);
        assert!(s.has_steering(), "draining follow-up must not touch steering");
    }

    #[test]
    fn fresh_session_not_aborted() {
        let s = session();
        assert!(!s.is_aborted());
    }

    #[test]
    fn abort_sets_token() {
        let s = session();
        s.abort(Some("user requested".into()));
        assert!(s.is_aborted());
        assert_eq!(s.abort_token().reason().as_deref(), Some("user requested"));
    }

    #[test]
    fn reset_abort_clears_previous_abort() {
        let mut s = session();
        s.abort(Some("x".into()));
        assert!(s.is_aborted());
        s.reset_abort();
        assert!(!s.is_aborted());
    }

    #[test]
    fn idle_by_default() {
        let s = session();
        assert!(s.is_idle());
    }

    #[test]
    fn not_idle_while_streaming() {
        let mut s = session();
        s.is_streaming = true;
        assert!(!s.is_idle());
    }

    #[test]
    fn not_idle_with_pending_tool_calls() {
        let mut s = session();
        s.pending_tool_calls.push(PendingToolCall {
            id: "1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({}),
        });
        assert!(!s.is_idle());
    }

    #[test]
    fn not_idle_with_queued_steering_or_follow_up() {
        let mut s = session();
        s.steer("x");
        assert!(!s.is_idle());
        s.drain_steering(DrainMode::All);
        assert!(s.is_idle());
        s.follow_up("y");
        assert!(!s.is_idle());
    }

    #[test]
    fn system_message_detected_as_first_message() {
        let mut s = session();
        s.push(Message::system("sys"));
        s.push(Message::user("hi"));
        assert!(s.system_message().is_some());
    }

    #[test]
    fn system_message_none_when_absent() {
        let mut s = session();
        s.push(Message::user("hi"));
        assert!(s.system_message().is_none());
    }
}
