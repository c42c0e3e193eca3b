// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! `ApprovalManager`: the pending-request map, the approve/reject
//! resolution path, and a polling wait-with-timeout helper for callers
//! that raised a request and now need to block on its outcome.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::policy::{PolicyDecision, PolicySet};
use crate::request::{now_ms, ApprovalRequest, ApprovalStatus};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Invoked after a request is approved or rejected, with the resolved
/// request and whether it was approved.
pub type ApprovalCallback = Arc<dyn Fn(ApprovalRequest, bool) -> BoxFuture<'static, ()> + Send + Sync>;

/// How a caller should proceed after consulting policy, before ever
/// raising a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightOutcome {
    /// Run immediately; no request was raised.
    Proceed,
    /// Raise a request and wait for a human decision.
    AskUser,
}

pub struct ApprovalManager {
    pending: Mutex<HashMap<String, ApprovalRequest>>,
    policies: Mutex<PolicySet>,
    callbacks: Mutex<Vec<ApprovalCallback>>,
    default_timeout: Duration,
}

impl Default for ApprovalManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl ApprovalManager {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            policies: Mutex::new(PolicySet::new()),
            callbacks: Mutex::new(Vec::new()),
            default_timeout,
        }
    }

    /// Checks `command`/`user` against the policy set without creating a
    /// pending request; callers use this to skip the approval wait
    /// entirely for auto-approved or approval-exempt commands.
    pub async fn preflight(&self, command: &str, user: Option<&str>) -> PreflightOutcome {
        match self.policies.lock().await.decide(command, user) {
            PolicyDecision::AutoApprove | PolicyDecision::SkipApproval => PreflightOutcome::Proceed,
            PolicyDecision::RequireApproval => PreflightOutcome::AskUser,
        }
    }

    /// Stores a new pending request and returns its id. Does not consult
    /// policy; call [`Self::preflight`] first if a policy check should be
    /// able to skip the request entirely.
    pub async fn request_approval(&self, command: impl Into<String>, context: Value) -> String {
        let id = Uuid::new_v4().to_string();
        let request = ApprovalRequest::new(id.clone(), command, context);
        self.pending.lock().await.insert(id.clone(), request);
        tracing::info!(approval_id = %id, "approval requested");
        id
    }

    pub async fn get_approval(&self, approval_id: &str) -> Option<ApprovalRequest> {
        self.pending.lock().await.get(approval_id).cloned()
    }

    pub async fn list_pending(&self) -> Vec<ApprovalRequest> {
        self.pending.lock().await.values().filter(|r| r.is_pending()).cloned().collect()
    }

    pub async fn approve(&self, approval_id: &str, approved_by: Option<String>) -> bool {
        self.resolve(approval_id, approved_by, ApprovalStatus::Approved).await
    }

    pub async fn reject(&self, approval_id: &str, rejected_by: Option<String>) -> bool {
        self.resolve(approval_id, rejected_by, ApprovalStatus::Rejected).await
    }

    /// Forces a still-pending request to expire immediately, without
    /// waiting out its timeout. Used by the Gateway's `exec.approval.timeout`
    /// method, distinct from the natural expiry [`Self::wait_for_approval`]
    /// applies once its deadline passes.
    pub async fn expire(&self, approval_id: &str) -> bool {
        self.resolve(approval_id, None, ApprovalStatus::Expired).await
    }

    async fn resolve(&self, approval_id: &str, resolved_by: Option<String>, status: ApprovalStatus) -> bool {
        let resolved = {
            let mut pending = self.pending.lock().await;
            match pending.get_mut(approval_id) {
                Some(request) if request.is_pending() => {
                    request.status = status;
                    request.approved_by = resolved_by;
                    request.resolved_at_ms = Some(now_ms());
                    Some(request.clone())
                }
                Some(_) => {
                    tracing::warn!(approval_id, "approval request already resolved");
                    None
                }
                None => {
                    tracing::warn!(approval_id, "approval request not found");
                    None
                }
            }
        };

        let Some(request) = resolved else { return false };
        self.pending.lock().await.remove(approval_id);

        let approved = status == ApprovalStatus::Approved;
        let callbacks = self.callbacks.lock().await.clone();
        for callback in callbacks {
            callback(request.clone(), approved).await;
        }
        true
    }

    pub async fn register_callback(&self, callback: ApprovalCallback) {
        self.callbacks.lock().await.push(callback);
    }

    /// Polls [`Self::get_approval`] until the request leaves `Pending`, or
    /// `timeout` elapses (after which the request is marked `Expired` and
    /// removed). Mirrors the bash-style tool's 5-minute wait.
    pub async fn wait_for_approval(&self, approval_id: &str, timeout: Duration) -> ApprovalStatus {
        let deadline = tokio::time::Instant::now() + timeout;
        let poll_interval = Duration::from_millis(250);

        loop {
            match self.get_approval(approval_id).await {
                Some(request) if !request.is_pending() => return request.status,
                Some(_) => {}
                None => return ApprovalStatus::Expired,
            }

            if tokio::time::Instant::now() >= deadline {
                let mut pending = self.pending.lock().await;
                pending.remove(approval_id);
                return ApprovalStatus::Expired;
            }

            tokio::time::sleep(poll_interval.min(deadline.saturating_duration_since(tokio::time::Instant::now())))
                .await;
        }
    }

    pub async fn wait_for_approval_default(&self, approval_id: &str) -> ApprovalStatus {
        self.wait_for_approval(approval_id, self.default_timeout).await
    }

    pub async fn set_policy(&self, policy_id: impl Into<String>, policy: crate::policy::ApprovalPolicy) {
        self.policies.lock().await.set(policy_id, policy);
    }

    pub async fn remove_policy(&self, policy_id: &str) -> bool {
        self.policies.lock().await.remove(policy_id)
    }

    pub async fn get_policy(&self, policy_id: &str) -> Option<crate::policy::ApprovalPolicy> {
        self.policies.lock().await.get(policy_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn request_then_approve_resolves_and_removes_from_pending() {
        let manager = ApprovalManager::default();
        let id = manager.request_approval("rm -rf /tmp/x", json!({"user": "bob"})).await;

        assert!(manager.get_approval(&id).await.unwrap().is_pending());
        assert!(manager.approve(&id, Some("alice".to_string())).await);
        assert!(manager.get_approval(&id).await.is_none());
    }

    #[tokio::test]
    async fn approving_twice_fails_the_second_time() {
        let manager = ApprovalManager::default();
        let id = manager.request_approval("ls", json!({})).await;
        assert!(manager.approve(&id, None).await);
        assert!(!manager.approve(&id, None).await);
    }

    #[tokio::test]
    async fn reject_unknown_id_fails() {
        let manager = ApprovalManager::default();
        assert!(!manager.reject("no-such-id", None).await);
    }

    #[tokio::test]
    async fn callbacks_fire_on_resolution_with_approved_flag() {
        let manager = ApprovalManager::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        manager
            .register_callback(Arc::new(move |_req, approved| {
                let seen = Arc::clone(&seen2);
                Box::pin(async move {
                    if approved {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                })
            }))
            .await;

        let id = manager.request_approval("ls", json!({})).await;
        manager.approve(&id, None).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_for_approval_returns_once_resolved() {
        let manager = Arc::new(ApprovalManager::default());
        let id = manager.request_approval("ls", json!({})).await;

        let manager2 = Arc::clone(&manager);
        let id2 = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            manager2.approve(&id2, None).await;
        });

        let status = manager.wait_for_approval(&id, Duration::from_secs(5)).await;
        assert_eq!(status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn wait_for_approval_expires_after_timeout() {
        let manager = ApprovalManager::default();
        let id = manager.request_approval("ls", json!({})).await;
        let status = manager.wait_for_approval(&id, Duration::from_millis(50)).await;
        assert_eq!(status, ApprovalStatus::Expired);
        assert!(manager.get_approval(&id).await.is_none());
    }

    #[tokio::test]
    async fn expire_forces_a_pending_request_out_of_pending() {
        let manager = ApprovalManager::default();
        let id = manager.request_approval("ls", json!({})).await;
        assert!(manager.expire(&id).await);
        assert!(manager.get_approval(&id).await.is_none());
    }

    #[tokio::test]
    async fn expiring_twice_fails_the_second_time() {
        let manager = ApprovalManager::default();
        let id = manager.request_approval("ls", json!({})).await;
        assert!(manager.expire(&id).await);
        assert!(!manager.expire(&id).await);
    }

    #[tokio::test]
    async fn preflight_auto_approve_policy_proceeds_without_request() {
        let manager = ApprovalManager::default();
        manager
            .set_policy("cat", crate::policy::ApprovalPolicy::new("cat *").auto_approve())
            .await;
        assert_eq!(manager.preflight("cat /etc/hosts", None).await, PreflightOutcome::Proceed);
        assert_eq!(manager.preflight("rm -rf /", None).await, PreflightOutcome::AskUser);
    }
}
