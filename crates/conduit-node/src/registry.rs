// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! In-memory, persistable directory of paired devices. A device earns an
//! entry here after completing the pairing handshake; afterward its
//! requests are authenticated via [`crate::device_auth`] against the
//! shared secret recorded at registration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub label: String,
    #[serde(with = "hex_secret")]
    pub shared_secret: Vec<u8>,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// A device's in-flight pairing handshake, raised before an operator has
/// approved or rejected it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequest {
    pub device_id: String,
    pub nonce: String,
    pub signature: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    devices: Vec<DeviceRecord>,
    #[serde(default)]
    pending_pairs: Vec<PairRequest>,
}

/// Thread-safe device directory, optionally backed by a YAML file on disk.
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceRecord>>,
    pending_pairs: Mutex<HashMap<String, PairRequest>>,
    path: Option<PathBuf>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { devices: Mutex::new(HashMap::new()), pending_pairs: Mutex::new(HashMap::new()), path: None }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (devices, pending_pairs) = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading device registry {}", path.display()))?;
            let file: RegistryFile = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing device registry {}", path.display()))?;
            (
                file.devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
                file.pending_pairs.into_iter().map(|p| (p.device_id.clone(), p)).collect(),
            )
        } else {
            (HashMap::new(), HashMap::new())
        };
        Ok(Self { devices: Mutex::new(devices), pending_pairs: Mutex::new(pending_pairs), path: Some(path) })
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating device registry directory {}", parent.display()))?;
        }
        let devices: Vec<DeviceRecord> = self.devices.lock().unwrap().values().cloned().collect();
        let pending_pairs: Vec<PairRequest> = self.pending_pairs.lock().unwrap().values().cloned().collect();
        let yaml =
            serde_yaml::to_string(&RegistryFile { devices, pending_pairs }).context("serializing device registry")?;
        std::fs::write(path, yaml).with_context(|| format!("writing device registry {}", path.display()))
    }

    pub fn register(&self, id: impl Into<String>, label: impl Into<String>, shared_secret: Vec<u8>) -> Result<()> {
        let record = DeviceRecord {
            id: id.into(),
            label: label.into(),
            shared_secret,
            registered_at: Utc::now(),
            last_seen_at: None,
        };
        self.devices.lock().unwrap().insert(record.id.clone(), record);
        self.persist()
    }

    pub fn revoke(&self, id: &str) -> Result<bool> {
        let removed = self.devices.lock().unwrap().remove(id).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.devices.lock().unwrap().get(id).cloned()
    }

    pub fn touch(&self, id: &str) -> Result<()> {
        let updated = {
            let mut devices = self.devices.lock().unwrap();
            match devices.get_mut(id) {
                Some(record) => {
                    record.last_seen_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist()?;
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<DeviceRecord> {
        self.devices.lock().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.devices.lock().unwrap().len()
    }

    /// Records a pairing request, overwriting any prior pending request for
    /// the same device.
    pub fn request_pairing(
        &self,
        device_id: impl Into<String>,
        nonce: impl Into<String>,
        signature: impl Into<String>,
    ) -> Result<PairRequest> {
        let request =
            PairRequest { device_id: device_id.into(), nonce: nonce.into(), signature: signature.into(), requested_at: Utc::now() };
        self.pending_pairs.lock().unwrap().insert(request.device_id.clone(), request.clone());
        self.persist()?;
        Ok(request)
    }

    pub fn list_pending_pairs(&self) -> Vec<PairRequest> {
        self.pending_pairs.lock().unwrap().values().cloned().collect()
    }

    /// Approves the pending request for `device_id`, minting a fresh shared
    /// secret and registering the device. Returns the raw secret (shown only
    /// this once) or `None` if there was no pending request.
    pub fn approve_pairing(&self, device_id: &str, label: impl Into<String>) -> Result<Option<Vec<u8>>> {
        let had_request = self.pending_pairs.lock().unwrap().remove(device_id).is_some();
        if !had_request {
            return Ok(None);
        }
        let mut secret = vec![0u8; 32];
        OsRng.fill_bytes(&mut secret);
        self.register(device_id, label, secret.clone())?;
        Ok(Some(secret))
    }

    pub fn reject_pairing(&self, device_id: &str) -> Result<bool> {
        let removed = self.pending_pairs.lock().unwrap().remove(device_id).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Rotates `id`'s shared secret, invalidating the old one. Returns the
    /// new raw secret, or `None` if the device isn't registered.
    pub fn rotate_secret(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let Some(existing) = self.get(id) else { return Ok(None) };
        let mut secret = vec![0u8; 32];
        OsRng.fill_bytes(&mut secret);
        self.register(id, existing.label, secret.clone())?;
        Ok(Some(secret))
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

mod hex_secret {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(D::Error::custom)
    }
}

pub fn default_registry_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/conduit/gateway/devices.yaml")
}
