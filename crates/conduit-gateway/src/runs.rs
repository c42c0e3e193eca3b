// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Tracks in-flight agent turns by `runId` so a `chat.abort` call can
//! cooperatively cancel the matching turn. Built directly on
//! `conduit_bus::abort`: each run gets its own controller/token pair;
//! the agent loop holds the token, this registry holds the controller.

use std::collections::HashMap;
use std::sync::Mutex;

use conduit_bus::abort::{abort_pair, AbortController, AbortToken};

struct RunEntry {
    controller: AbortController,
    session_id: String,
}

/// Registry of agent turns currently executing, keyed by `runId`.
#[derive(Default)]
pub struct ActiveRuns {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self { runs: Mutex::new(HashMap::new()) }
    }

    /// Registers a new run and returns the token the agent loop should
    /// check for cooperative cancellation.
    pub fn start(&self, run_id: impl Into<String>, session_id: impl Into<String>) -> AbortToken {
        let (controller, token) = abort_pair();
        let run_id = run_id.into();
        self.runs.lock().unwrap().insert(run_id, RunEntry { controller, session_id: session_id.into() });
        token
    }

    /// Triggers cancellation for `run_id`, if it is still active. Returns
    /// `true` if a matching run was found and aborted.
    pub fn abort(&self, run_id: &str, reason: Option<String>) -> bool {
        match self.runs.lock().unwrap().get(run_id) {
            Some(entry) => {
                entry.controller.trigger(reason);
                true
            }
            None => false,
        }
    }

    /// Removes a run once its turn has finished (success or error), per
    /// the unhandled-exception policy of removing the run from
    /// `active_runs` after an `agent_end` is emitted.
    pub fn finish(&self, run_id: &str) {
        self.runs.lock().unwrap().remove(run_id);
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.runs.lock().unwrap().contains_key(run_id)
    }

    pub fn session_id(&self, run_id: &str) -> Option<String> {
        self.runs.lock().unwrap().get(run_id).map(|e| e.session_id.clone())
    }

    pub fn len(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
