// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Method dispatch table. REDESIGN FLAG §9 replaces dynamic dispatch by
//! string method name with a `HashMap` lookup into typed handler
//! descriptors, each carrying its own role/scope policy. Dispatch is
//! deny-by-default: an unregistered method is `METHOD_NOT_FOUND`, and a
//! registered one whose policy the caller doesn't satisfy is
//! `PERMISSION_DENIED` — never a silent no-op.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{GatewayError, GatewayErrorCode};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identity of the caller making a request, established during `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub role: Role,
    pub scopes: Vec<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Operator,
    Node,
    Device,
    Guest,
}

/// Policy a handler requires of the caller: a minimum role and a set of
/// scopes the caller must hold all of.
#[derive(Debug, Clone)]
pub struct MethodPolicy {
    pub role: Role,
    pub scopes: Vec<&'static str>,
}

impl MethodPolicy {
    pub fn new(role: Role) -> Self {
        Self { role, scopes: Vec::new() }
    }

    pub fn with_scopes(mut self, scopes: &[&'static str]) -> Self {
        self.scopes = scopes.to_vec();
        self
    }

    /// A caller satisfies a policy by holding the exact required role, or
    /// by holding the `"*"` admin scope — an explicit grant, not an
    /// implicit role bypass. This keeps the deny-by-default model intact
    /// once roles other than `Operator` are registered: a `Device` or
    /// `Node` caller without `"*"` can never reach a method scoped to a
    /// different role no matter what other scopes it holds.
    fn permits(&self, caller: &CallerContext) -> bool {
        let role_ok = caller.role == self.role || caller.scopes.iter().any(|s| s == "*");
        if !role_ok {
            return false;
        }
        self.scopes
            .iter()
            .all(|required| caller.scopes.iter().any(|held| held == "*" || held == required))
    }
}

pub type Handler = Arc<dyn Fn(CallerContext, Value) -> BoxFuture<'static, Result<Value, GatewayError>> + Send + Sync>;

struct MethodEntry {
    policy: MethodPolicy,
    handler: Handler,
}

/// Table of `method name -> (policy, handler)`, looked up once per
/// request. Populated at startup; never mutated per-connection.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<&'static str, MethodEntry>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self { methods: HashMap::new() }
    }

    pub fn register(&mut self, name: &'static str, policy: MethodPolicy, handler: Handler) {
        self.methods.insert(name, MethodEntry { policy, handler });
    }

    /// Dispatches one request. Deny-by-default: an unknown method is
    /// `METHOD_NOT_FOUND`; a known one the caller's role/scopes don't
    /// satisfy is `PERMISSION_DENIED`.
    pub async fn dispatch(&self, method: &str, caller: CallerContext, params: Value) -> Result<Value, GatewayError> {
        let entry = self
            .methods
            .get(method)
            .ok_or_else(|| GatewayError::new(GatewayErrorCode::MethodNotFound, format!("unknown method: {method}")))?;

        if !entry.policy.permits(&caller) {
            return Err(GatewayError::new(
                GatewayErrorCode::PermissionDenied,
                format!("caller lacks permission for method: {method}"),
            ));
        }

        (entry.handler)(caller, params).await
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
