// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod tool;
pub mod truncate;

pub use metrics::ToolMetrics;
pub use policy::{ApprovalPolicy, ToolPolicy};
pub use registry::{ToolRegistry, ToolRuntimeConfig, ToolSchema};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};
pub use truncate::truncate_output;
