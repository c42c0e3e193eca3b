// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
mod agent;
mod compact;
mod prompts;
mod runtime_context;
mod session;

pub use agent::{AgentLoop, ContextHooks, DefaultHooks};
pub use compact::{
    compact_session, compact_session_with_strategy, emergency_compact, smart_truncate,
};
pub use prompts::{system_prompt, PromptContext};
pub use runtime_context::AgentRuntimeContext;
pub use session::{DrainMode, PendingToolCall, Session};
