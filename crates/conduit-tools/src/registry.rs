// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use conduit_config::{AgentMode, ToolsConfig};

use crate::metrics::ToolMetrics;
use crate::truncate::truncate_output;
use crate::{Tool, ToolCall, ToolOutput};

/// A tool schema for presenting the registry's contents to a Provider.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Per-tool runtime configuration consumed by the execution wrapper.
///
/// `allowed_permissions` is the set of permissions the deployment grants to
/// this tool; a call is rejected unless `Tool::required_permissions()` is a
/// subset of it. Empty by default — deny-by-default for anything that
/// declares a requirement.
#[derive(Debug, Clone)]
pub struct ToolRuntimeConfig {
    pub timeout_secs: u64,
    pub max_output_size: usize,
    pub allowed_permissions: HashSet<String>,
    pub rate_limit_per_minute: u32,
}

impl ToolRuntimeConfig {
    pub fn from_tools_config(cfg: &ToolsConfig) -> Self {
        Self {
            timeout_secs: cfg.timeout_secs,
            max_output_size: 50_000,
            allowed_permissions: HashSet::new(),
            rate_limit_per_minute: 60,
        }
    }

    pub fn with_allowed_permissions(mut self, perms: impl IntoIterator<Item = String>) -> Self {
        self.allowed_permissions = perms.into_iter().collect();
        self
    }
}

impl Default for ToolRuntimeConfig {
    fn default() -> Self {
        Self::from_tools_config(&ToolsConfig::default())
    }
}

/// Central registry holding all available tools and driving their
/// execution wrapper: permission check → rate limit → timeout → truncate →
/// metrics, in that order (spec §4.5).
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_config: ToolRuntimeConfig,
    overrides: HashMap<String, ToolRuntimeConfig>,
    rate_windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    metrics: Mutex<HashMap<String, ToolMetrics>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_config(ToolRuntimeConfig::default())
    }

    pub fn with_config(default_config: ToolRuntimeConfig) -> Self {
        Self {
            tools: HashMap::new(),
            default_config,
            overrides: HashMap::new(),
            rate_windows: Mutex::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Register a tool with a per-tool runtime config override (e.g. a
    /// tool that requires a permission the deployment explicitly grants).
    pub fn register_with_config(&mut self, tool: impl Tool + 'static, config: ToolRuntimeConfig) {
        let name = tool.name().to_string();
        self.tools.insert(name.clone(), Arc::new(tool));
        self.overrides.insert(name, config);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    fn config_for(&self, name: &str) -> &ToolRuntimeConfig {
        self.overrides.get(name).unwrap_or(&self.default_config)
    }

    /// Produce schemas for ALL registered tools (mode-unfiltered).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Produce schemas only for tools available in the given mode.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Run the full execution wrapper for `call`: permission check, rate
    /// limit (60s sliding window), timeout, output truncation, metrics.
    /// Any failure is folded into a `ToolOutput` with `is_error = true` —
    /// this method never returns `Err`.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let tool = match self.tools.get(&call.name) {
            Some(t) => t.clone(),
            None => return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        };
        let config = self.config_for(&call.name).clone();

        // (a) permission check
        let required = tool.required_permissions();
        if !required
            .iter()
            .all(|p| config.allowed_permissions.contains(*p))
        {
            self.record(&call.name, |m| m.record_permission_denied());
            return ToolOutput::err(
                &call.id,
                format!(
                    "permission denied: tool '{}' requires {:?}",
                    call.name, required
                ),
            );
        }

        // (b) rate-limit check against a 60-second sliding window
        if !self.check_rate_limit(&call.name, config.rate_limit_per_minute) {
            self.record(&call.name, |m| m.record_rate_limited());
            return ToolOutput::err(
                &call.id,
                format!("rate limit exceeded for tool '{}'", call.name),
            );
        }

        // (c) run under a timeout
        let started = Instant::now();
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let mut output = match tokio::time::timeout(timeout, tool.execute(call)).await {
            Ok(out) => out,
            Err(_) => {
                self.record(&call.name, |m| m.record_timeout());
                return ToolOutput::err(
                    &call.id,
                    format!(
                        "tool '{}' timed out after {}s",
                        call.name, config.timeout_secs
                    ),
                );
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        output.execution_time_ms = elapsed_ms;

        // (d) truncate content to max_output_size
        output.content = truncate_output(
            &output.content,
            tool.output_category(),
            config.max_output_size,
        );

        // (e) record metrics
        self.record(&call.name, |m| {
            if output.is_error {
                m.record_failure(elapsed_ms);
            } else {
                m.record_success(elapsed_ms);
            }
        });

        output
    }

    fn check_rate_limit(&self, tool_name: &str, limit_per_minute: u32) -> bool {
        let now = Instant::now();
        let window = Duration::from_secs(60);
        let mut windows = self.rate_windows.lock().unwrap();
        let calls = windows.entry(tool_name.to_string()).or_default();
        while let Some(front) = calls.front() {
            if now.duration_since(*front) > window {
                calls.pop_front();
            } else {
                break;
            }
        }
        if calls.len() as u32 >= limit_per_minute {
            return false;
        }
        calls.push_back(now);
        true
    }

    fn record(&self, tool_name: &str, f: impl FnOnce(&mut ToolMetrics)) {
        let mut metrics = self.metrics.lock().unwrap();
        f(metrics.entry(tool_name.to_string()).or_default());
    }

    /// A snapshot of the accumulated metrics for one tool.
    pub fn metrics_for(&self, tool_name: &str) -> Option<ToolMetrics> {
        self.metrics.lock().unwrap().get(tool_name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn names_for_mode(&self, mode: AgentMode) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
