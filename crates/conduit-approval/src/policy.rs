// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Approval policies: `(pattern, auto_approve, require_approval,
//! allowed_users)` tuples evaluated against a command before a request is
//! raised.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub pattern: String,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default = "default_require_approval")]
    pub require_approval: bool,
    /// `None` means any user; `Some(vec![])` means no user qualifies.
    pub allowed_users: Option<Vec<String>>,
}

fn default_require_approval() -> bool {
    true
}

impl ApprovalPolicy {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            auto_approve: false,
            require_approval: true,
            allowed_users: None,
        }
    }

    pub fn auto_approve(mut self) -> Self {
        self.auto_approve = true;
        self
    }

    pub fn restrict_to_users(mut self, users: Vec<String>) -> Self {
        self.allowed_users = Some(users);
        self
    }

    fn matches_command(&self, command: &str) -> bool {
        glob_to_regex(&self.pattern).is_some_and(|re| re.is_match(command))
    }

    fn allows_user(&self, user: Option<&str>) -> bool {
        match &self.allowed_users {
            None => true,
            Some(allowed) => user.is_some_and(|u| allowed.iter().any(|a| a == u)),
        }
    }
}

/// The outcome of evaluating a command (and optional acting user) against
/// the policy set, in registration order; first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Matched a policy with `auto_approve = true`: skip the wait entirely.
    AutoApprove,
    /// Matched a policy with `require_approval = false`: run without asking.
    SkipApproval,
    /// No matching policy allowed the user/command pair, or a policy matched
    /// but restricted to other users: raise a normal approval request.
    RequireApproval,
}

#[derive(Debug, Default)]
pub struct PolicySet {
    policies: Vec<(String, ApprovalPolicy)>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, policy_id: impl Into<String>, policy: ApprovalPolicy) {
        let policy_id = policy_id.into();
        if let Some(existing) = self.policies.iter_mut().find(|(id, _)| *id == policy_id) {
            existing.1 = policy;
        } else {
            self.policies.push((policy_id, policy));
        }
    }

    pub fn remove(&mut self, policy_id: &str) -> bool {
        let before = self.policies.len();
        self.policies.retain(|(id, _)| id != policy_id);
        self.policies.len() != before
    }

    pub fn get(&self, policy_id: &str) -> Option<&ApprovalPolicy> {
        self.policies.iter().find(|(id, _)| id == policy_id).map(|(_, p)| p)
    }

    pub fn list(&self) -> Vec<(&str, &ApprovalPolicy)> {
        self.policies.iter().map(|(id, p)| (id.as_str(), p)).collect()
    }

    /// Evaluates `command`/`user` against every policy in order; the first
    /// matching policy decides.
    pub fn decide(&self, command: &str, user: Option<&str>) -> PolicyDecision {
        for (_, policy) in &self.policies {
            if !policy.matches_command(command) {
                continue;
            }
            if !policy.allows_user(user) {
                continue;
            }
            if policy.auto_approve {
                return PolicyDecision::AutoApprove;
            }
            if !policy.require_approval {
                return PolicyDecision::SkipApproval;
            }
        }
        PolicyDecision::RequireApproval
    }
}

/// Converts a shell glob pattern to a [`Regex`]. Only `*` and `?` are
/// treated as wildcards; everything else is matched literally.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}
