// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Registry of distributed compute nodes: registration, the pairing
//! handshake (request → approve/reject → bearer token), and status
//! tracking. Distinct from [`crate::registry::DeviceRegistry`] — a device
//! is a paired client that drives the agent; a node is a paired worker
//! the agent can invoke commands on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::token::RawToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    pub status: NodeStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequest {
    pub node_id: String,
    pub nonce: String,
    pub signature: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeRegistryFile {
    nodes: Vec<NodeRecord>,
    pending_pairs: Vec<PairRequest>,
    /// `token -> node_id`. Kept in plaintext like `DeviceRegistry`'s shared
    /// secrets: a node token is a symmetric credential the node presents
    /// verbatim on every `connect`, not a password the server only ever
    /// compares a hash of.
    tokens: HashMap<String, String>,
}

/// Thread-safe node directory, optionally backed by a YAML file on disk.
/// Mirrors `original_source` `NodeManager`'s register/request_pairing/
/// approve_pairing/reject_pairing/list_nodes/list_pending_pairs/get_node/
/// verify_token shape, adapted to Rust ownership (no global singleton).
pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, NodeRecord>>,
    pending_pairs: Mutex<HashMap<String, PairRequest>>,
    tokens: Mutex<HashMap<String, String>>,
    path: Option<PathBuf>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            pending_pairs: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (nodes, pending_pairs, tokens) = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading node registry {}", path.display()))?;
            let file: NodeRegistryFile = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing node registry {}", path.display()))?;
            (
                file.nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
                file.pending_pairs.into_iter().map(|p| (p.node_id.clone(), p)).collect(),
                file.tokens,
            )
        } else {
            (HashMap::new(), HashMap::new(), HashMap::new())
        };
        Ok(Self {
            nodes: Mutex::new(nodes),
            pending_pairs: Mutex::new(pending_pairs),
            tokens: Mutex::new(tokens),
            path: Some(path),
        })
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating node registry directory {}", parent.display()))?;
        }
        let file = NodeRegistryFile {
            nodes: self.nodes.lock().unwrap().values().cloned().collect(),
            pending_pairs: self.pending_pairs.lock().unwrap().values().cloned().collect(),
            tokens: self.tokens.lock().unwrap().clone(),
        };
        let yaml = serde_yaml::to_string(&file).context("serializing node registry")?;
        std::fs::write(path, yaml).with_context(|| format!("writing node registry {}", path.display()))
    }

    /// Register (or re-register) a node. Re-registering an existing id
    /// updates its capabilities and label but leaves `registered_at` and
    /// `status` untouched.
    pub fn register(&self, id: impl Into<String>, label: impl Into<String>, capabilities: serde_json::Value) -> Result<NodeRecord> {
        let id = id.into();
        let record = {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get_mut(&id) {
                Some(existing) => {
                    existing.label = label.into();
                    existing.capabilities = capabilities;
                    existing.clone()
                }
                None => {
                    let record = NodeRecord {
                        id: id.clone(),
                        label: label.into(),
                        capabilities,
                        status: NodeStatus::Active,
                        registered_at: Utc::now(),
                        last_seen_at: None,
                    };
                    nodes.insert(id, record.clone());
                    record
                }
            }
        };
        self.persist()?;
        Ok(record)
    }

    pub fn unregister(&self, id: &str) -> Result<bool> {
        let removed = self.nodes.lock().unwrap().remove(id).is_some();
        if removed {
            self.tokens.lock().unwrap().retain(|_, node_id| node_id != id);
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<NodeRecord> {
        self.nodes.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<NodeRecord> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn set_status(&self, id: &str, status: NodeStatus) -> Result<bool> {
        let updated = {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get_mut(id) {
                Some(node) => {
                    node.status = status;
                    node.last_seen_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist()?;
        }
        Ok(updated)
    }

    pub fn touch(&self, id: &str) -> Result<bool> {
        let updated = {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get_mut(id) {
                Some(node) => {
                    node.last_seen_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist()?;
        }
        Ok(updated)
    }

    /// Record a pairing request, overwriting any prior pending request for
    /// the same node (a retried handshake supersedes the earlier one).
    pub fn request_pairing(&self, node_id: impl Into<String>, nonce: impl Into<String>, signature: impl Into<String>) -> Result<PairRequest> {
        let request = PairRequest {
            node_id: node_id.into(),
            nonce: nonce.into(),
            signature: signature.into(),
            requested_at: Utc::now(),
        };
        self.pending_pairs.lock().unwrap().insert(request.node_id.clone(), request.clone());
        self.persist()?;
        Ok(request)
    }

    pub fn list_pending_pairs(&self) -> Vec<PairRequest> {
        self.pending_pairs.lock().unwrap().values().cloned().collect()
    }

    /// Approves the pending request for `node_id`, minting a fresh bearer
    /// token and registering the node as `active` if it isn't already
    /// known. Returns `None` if there is no pending request.
    pub fn approve_pairing(&self, node_id: &str, label: impl Into<String>) -> Result<Option<String>> {
        let had_request = self.pending_pairs.lock().unwrap().remove(node_id).is_some();
        if !had_request {
            return Ok(None);
        }

        {
            let mut nodes = self.nodes.lock().unwrap();
            nodes.entry(node_id.to_string()).or_insert_with(|| NodeRecord {
                id: node_id.to_string(),
                label: label.into(),
                capabilities: serde_json::Value::Null,
                status: NodeStatus::Active,
                registered_at: Utc::now(),
                last_seen_at: None,
            });
        }

        let token = RawToken::generate().as_str().to_string();
        self.tokens.lock().unwrap().insert(token.clone(), node_id.to_string());
        self.persist()?;
        Ok(Some(token))
    }

    pub fn reject_pairing(&self, node_id: &str) -> Result<bool> {
        let removed = self.pending_pairs.lock().unwrap().remove(node_id).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Resolves a bearer token to the node id it was minted for.
    pub fn verify_token(&self, token: &str) -> Option<String> {
        self.tokens.lock().unwrap().get(token).cloned()
    }

    pub fn revoke_token(&self, token: &str) -> Result<bool> {
        let removed = self.tokens.lock().unwrap().remove(token).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_node_registry_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/conduit/gateway/nodes.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get_round_trips() {
        let registry = NodeRegistry::new();
        registry.register("node-1", "worker", serde_json::json!({"shell": true})).unwrap();
        let record = registry.get("node-1").unwrap();
        assert_eq!(record.label, "worker");
        assert_eq!(record.status, NodeStatus::Active);
    }

    #[test]
    fn pairing_flow_yields_token_that_resolves_to_node() {
        let registry = NodeRegistry::new();
        registry.request_pairing("node-1", "nonce-1", "sig-1").unwrap();
        assert_eq!(registry.list_pending_pairs().len(), 1);

        let token = registry.approve_pairing("node-1", "worker").unwrap().expect("approval must mint a token");
        assert!(registry.list_pending_pairs().is_empty());
        assert_eq!(registry.verify_token(&token).as_deref(), Some("node-1"));
        assert!(registry.get("node-1").is_some());
    }

    #[test]
    fn approving_unknown_node_returns_none() {
        let registry = NodeRegistry::new();
        assert!(registry.approve_pairing("ghost", "worker").unwrap().is_none());
    }

    #[test]
    fn reject_pairing_clears_pending_without_minting_token() {
        let registry = NodeRegistry::new();
        registry.request_pairing("node-1", "nonce-1", "sig-1").unwrap();
        assert!(registry.reject_pairing("node-1").unwrap());
        assert!(registry.list_pending_pairs().is_empty());
        assert!(registry.get("node-1").is_none());
    }

    #[test]
    fn unregister_revokes_its_tokens() {
        let registry = NodeRegistry::new();
        registry.request_pairing("node-1", "n", "s").unwrap();
        let token = registry.approve_pairing("node-1", "worker").unwrap().unwrap();
        assert!(registry.unregister("node-1").unwrap());
        assert!(registry.verify_token(&token).is_none());
    }

    #[test]
    fn load_and_persist_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");

        let registry = NodeRegistry::load(&path).unwrap();
        registry.register("node-1", "worker", serde_json::Value::Null).unwrap();
        assert!(path.exists());

        let reloaded = NodeRegistry::load(&path).unwrap();
        assert_eq!(reloaded.get("node-1").unwrap().label, "worker");
    }

    #[test]
    fn set_status_updates_last_seen() {
        let registry = NodeRegistry::new();
        registry.register("node-1", "worker", serde_json::Value::Null).unwrap();
        assert!(registry.get("node-1").unwrap().last_seen_at.is_none());
        registry.set_status("node-1", NodeStatus::Inactive).unwrap();
        let record = registry.get("node-1").unwrap();
        assert_eq!(record.status, NodeStatus::Inactive);
        assert!(record.last_seen_at.is_some());
    }
}
