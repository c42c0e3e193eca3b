// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Wire-format adapters over `conduit-node`'s pairing/token types.
//! `conduit-node` stays free of serde-on-the-wire concerns; this module
//! is where the Gateway's JSON envelope meets it.

use chrono::{DateTime, Utc};
use conduit_node::DeviceIdentity;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthParams {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub signature: String,
    #[serde(rename = "signedAt")]
    pub signed_at: DateTime<Utc>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl From<DeviceAuthParams> for DeviceIdentity {
    fn from(params: DeviceAuthParams) -> Self {
        DeviceIdentity {
            device_id: params.device_id,
            signature: params.signature,
            signed_at: params.signed_at,
            nonce: params.nonce,
        }
    }
}

/// A node presenting the bearer token it was issued by `node.pair.approve`.
/// Unlike `DeviceAuthParams` this carries no signature: the token itself,
/// minted by `NodeRegistry::approve_pairing`, is the credential.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeAuthParams {
    pub token: String,
}
