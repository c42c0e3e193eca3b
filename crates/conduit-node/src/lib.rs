// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Device and node pairing/token lifecycle for conduit's bearer-token
//! handshakes: bearer-token generation/storage ([`crypto::token`]), the
//! HMAC device-identity signature scheme ([`device_auth`]), a persisted
//! directory of paired devices ([`registry`]), and a persisted directory
//! of paired compute nodes ([`node_registry`]).

pub mod crypto;
pub mod device_auth;
pub mod node_registry;
pub mod registry;

pub use crypto::token::{RawToken, StoredToken, StoredTokenFile};
pub use device_auth::{authorize_device, verify_device_signature, DeviceAuthError, DeviceIdentity};
pub use node_registry::{default_node_registry_path, NodeRecord, NodeRegistry, NodeStatus, PairRequest};
pub use registry::{default_registry_path, DeviceRecord, DeviceRegistry};
