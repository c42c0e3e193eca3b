// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Runtime context for an agent session.
//!
//! This is separate from [`conduit_config::AgentConfig`], which holds only
//! config-file fields.  [`AgentRuntimeContext`] carries values detected or
//! specified at runtime (project root, dynamic environment notes, prompt
//! overrides).

use std::path::PathBuf;

/// Environment-detected context injected into an agent at construction time.
#[derive(Debug, Default, Clone)]
pub struct AgentRuntimeContext {
    /// Absolute path to the project/workspace root, if any.
    pub project_root: Option<PathBuf>,
    /// Contents of a bootstrap project-instructions file, injected verbatim
    /// into the stable (cacheable) portion of the system prompt.
    pub project_context_file: Option<String>,
    /// Pre-formatted context that changes between turns (e.g. which channel
    /// or node this session is bound to). Kept out of the cached prefix —
    /// see [`crate::prompts::PromptContext::dynamic_block`].
    pub dynamic_context_note: Option<String>,
    /// Text appended to the default system prompt (from `--append-system-prompt`).
    pub append_system_prompt: Option<String>,
    /// Full system prompt override (from `--system-prompt-file`).
    /// When set, replaces `AgentConfig::system_prompt` entirely.
    pub system_prompt_override: Option<String>,
}
