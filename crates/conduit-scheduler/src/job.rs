// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! The `CronJob` entity: schedule, payload, delivery target, and the
//! mutable run state carried between fires.

use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

/// Which session an `AgentTurn` job runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTarget {
    /// Share the user's ongoing session.
    Main,
    /// Execute in a fresh session; state never leaks between scheduled runs.
    Isolated,
}

/// What a job does when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    /// Deliver `text` as a system-role message to `agent_id`'s session.
    SystemEvent { text: String, agent_id: Option<String> },
    /// Run an isolated agent turn with `prompt`, optionally overriding the model.
    AgentTurn { prompt: String, model: Option<String> },
}

/// `last_status` after a job finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

/// Mutable run state, recomputed/updated on every mutation and execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobState {
    pub next_run_ms: Option<i64>,
    pub last_run_at_ms: Option<i64>,
    pub last_status: Option<RunStatus>,
    pub last_duration_ms: Option<i64>,
    pub running_at_ms: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub session_target: SessionTarget,
    pub payload: Payload,
    /// One-shot job: removed from the store immediately after it runs.
    pub delete_after_run: bool,
    #[serde(default)]
    pub state: JobState,
}

impl CronJob {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        schedule: Schedule,
        session_target: SessionTarget,
        payload: Payload,
    ) -> Self {
        let delete_after_run = matches!(schedule, Schedule::At { .. });
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            schedule,
            session_target,
            payload,
            delete_after_run,
            state: JobState::default(),
        }
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.enabled && self.state.next_run_ms.is_some_and(|t| t <= now_ms)
    }
}
