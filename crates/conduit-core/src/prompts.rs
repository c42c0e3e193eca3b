// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! System-prompt assembly for the agent loop.
//!
//! The prompt is split into a *stable* slice (mode instructions, project
//! instructions, guidelines — identical across every turn of a session, so a
//! provider's prompt cache can pin it) and a *dynamic* slice (anything that
//! changes between turns), mirroring the stable/volatile split the teacher's
//! prompt builder already used for its git/CI context blocks.

use std::path::Path;

use conduit_config::AgentMode;

/// Optional contextual blocks that can be injected into the system prompt.
#[derive(Debug, Default)]
pub struct PromptContext<'a> {
    /// Absolute path to the project/workspace root.
    pub project_root: Option<&'a Path>,
    /// Contents of a bootstrap project-instructions file.
    pub project_context_file: Option<&'a str>,
    /// Pre-formatted context that changes between turns.
    ///
    /// **Caching note**: this field is *volatile*. When prompt caching is
    /// enabled this content is placed in a separate, uncached system block
    /// so the stable prefix remains cacheable across turns.
    pub dynamic_note: Option<&'a str>,
    /// Text appended verbatim after the default guidelines section.
    pub append: Option<&'a str>,
}

impl<'a> PromptContext<'a> {
    /// Return a version of this context with the volatile field cleared.
    /// Used to build the *stable* (cacheable) portion of the system prompt.
    pub fn stable_only(&self) -> Self {
        Self {
            project_root: self.project_root,
            project_context_file: self.project_context_file,
            dynamic_note: None,
            append: self.append,
        }
    }

    /// Format the volatile field as a block suitable for appending to the
    /// system prompt outside the cached region.
    pub fn dynamic_block(&self) -> Option<String> {
        self.dynamic_note
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
    }
}

// ─── Guidelines ────────────────────────────────────────────────────────────

mod guidelines {
    pub fn general() -> &'static str {
        "- Be concise and precise. Use tools instead of guessing.\n\
         - Confirm destructive or hard-to-reverse actions before taking them."
    }

    pub fn tool_usage() -> &'static str {
        "- Prefer the most specific tool available over a general-purpose shell command.\n\
         - Batch independent tool calls in one turn when their inputs don't depend on each other.\n\
         - Re-read a tool's output before deciding the next step; don't assume success."
    }

    pub fn conversation() -> &'static str {
        "- Keep replies proportional to what was asked; don't pad a short answer.\n\
         - When a request is ambiguous, ask a single clarifying question rather than guessing.\n\
         - Track open steps across turns; don't silently drop part of a multi-part request."
    }

    pub fn error_handling() -> &'static str {
        "- When a tool fails, report what happened and try a different approach rather than retrying blindly.\n\
         - Never claim an action succeeded without tool output confirming it."
    }
}

fn build_guidelines_section() -> String {
    format!(
        "## Guidelines\n\n\
         ### General Principles\n\
         {}\n\n\
         ### Tool Usage\n\
         {}\n\n\
         ### Conversation\n\
         {}\n\n\
         ### Error Handling\n\
         {}",
        guidelines::general(),
        guidelines::tool_usage(),
        guidelines::conversation(),
        guidelines::error_handling(),
    )
}

/// Build the system prompt for the given agent mode.
///
/// `ctx` carries optional project context injected at runtime.
pub fn system_prompt(mode: AgentMode, custom: Option<&str>, ctx: PromptContext<'_>) -> String {
    if let Some(custom) = custom {
        // Even with a custom prompt, honour append if set.
        if let Some(extra) = ctx.append {
            return format!("{}\n\n{}", custom.trim_end(), extra);
        }
        return custom.to_string();
    }

    let agent_identity = format!(
        "You are Conduit, a conversational agent that bridges messaging platforms to \
         tool-using LLM turns.\n\n\
         Operating Mode: `{mode}`",
    );

    let mode_instructions = match mode {
        AgentMode::Research => {
            "You may read and look up information using tools. You MUST NOT perform any \
             action that writes, modifies, deletes, or sends anything on the user's behalf. \
             Focus on gathering the information needed to satisfy the request."
        }
        AgentMode::Plan => {
            "Analyse the request and produce a clear, structured plan with numbered steps. \
             You may use read-only tools to inform the plan, but MUST NOT take any \
             side-effecting action. Output the plan in Markdown."
        }
        AgentMode::Agent => {
            "You may use the full set of available tools, including side-effecting ones. \
             Work systematically, verify the result of each tool call, and report progress \
             clearly. Complete the task the user asked for before ending your turn."
        }
    };

    let project_section = if let Some(root) = ctx.project_root {
        format!(
            "\n\n## Project Context\n\
             Working root: `{}`\n\
             Prefer absolute paths under this root in every tool call.",
            root.display()
        )
    } else {
        String::new()
    };

    let context_file_section = if let Some(content) = ctx.project_context_file {
        format!("\n\n## Project Instructions\n\n{content}")
    } else {
        String::new()
    };

    let dynamic_section = if let Some(note) = ctx.dynamic_note.filter(|s| !s.trim().is_empty()) {
        format!("\n\n{note}")
    } else {
        String::new()
    };

    let guidelines_section = build_guidelines_section();

    let append_section = if let Some(extra) = ctx.append {
        format!("\n\n{extra}")
    } else {
        String::new()
    };

    format!(
        "{agent_identity}\n\n\
         {mode_instructions}{project_section}{context_file_section}{dynamic_section}\n\n\
         {guidelines_section}\
         {append_section}",
    )
}

// ─── Unit tests ───────────────────────────────────────────────────────────
