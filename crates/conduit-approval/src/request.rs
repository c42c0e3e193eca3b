// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! The pending-approval entity and its terminal states.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub context: Value,
    pub requested_at_ms: i64,
    pub status: ApprovalStatus,
    pub approved_by: Option<String>,
    pub resolved_at_ms: Option<i64>,
}

impl ApprovalRequest {
    pub fn new(id: impl Into<String>, command: impl Into<String>, context: Value) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            context,
            requested_at_ms: now_ms(),
            status: ApprovalStatus::Pending,
            approved_by: None,
            resolved_at_ms: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
