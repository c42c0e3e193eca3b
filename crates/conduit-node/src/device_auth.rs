// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Device identity verification: an HMAC-SHA256 signature over
//! `device_id|signed_at|nonce`, keyed by the device's registered shared
//! secret. This stands in for real public-key device attestation until a
//! client SDK does Ed25519/RSA signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Max signature age before it is rejected as stale.
pub const MAX_AGE_SECONDS: i64 = 300;
/// Max clock skew tolerated for a signature claiming to be from the future.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAuthError {
    SignatureTooOld { age_seconds: i64 },
    SignatureFromFuture { age_seconds: i64 },
    NonceRequired,
    NonceMismatch,
    InvalidSignature,
}

impl std::fmt::Display for DeviceAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignatureTooOld { age_seconds } => {
                write!(f, "signature too old: {age_seconds}s > {MAX_AGE_SECONDS}s")
            }
            Self::SignatureFromFuture { age_seconds } => {
                write!(f, "signature from future: {age_seconds}s")
            }
            Self::NonceRequired => write!(f, "nonce required but not provided"),
            Self::NonceMismatch => write!(f, "nonce mismatch (replay protection)"),
            Self::InvalidSignature => write!(f, "invalid signature"),
        }
    }
}

impl std::error::Error for DeviceAuthError {}

fn expected_signature(shared_secret: &[u8], device_id: &str, signed_at: &str, nonce: Option<&str>) -> String {
    let mut message = format!("{device_id}|{signed_at}");
    if let Some(nonce) = nonce {
        message.push('|');
        message.push_str(nonce);
    }
    let mut mac = HmacSha256::new_from_slice(shared_secret).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `identity`'s signature against `shared_secret`, checking
/// timestamp freshness but not nonce matching — see [`authorize_device`]
/// for the nonce-checked variant used during challenge/response pairing.
pub fn verify_device_signature(identity: &DeviceIdentity, shared_secret: &[u8]) -> Result<(), DeviceAuthError> {
    let now = Utc::now();
    let age_seconds = (now - identity.signed_at).num_seconds();

    if age_seconds > MAX_AGE_SECONDS {
        return Err(DeviceAuthError::SignatureTooOld { age_seconds });
    }
    if age_seconds < -MAX_CLOCK_SKEW_SECONDS {
        return Err(DeviceAuthError::SignatureFromFuture { age_seconds });
    }

    let signed_at_rfc3339 = identity.signed_at.to_rfc3339();
    let expected = expected_signature(shared_secret, &identity.device_id, &signed_at_rfc3339, identity.nonce.as_deref());

    let provided = identity.signature.as_bytes();
    let expected_bytes = expected.as_bytes();
    let equal_length = provided.len() == expected_bytes.len();
    let ct_equal = equal_length && bool::from(provided.ct_eq(expected_bytes));

    if ct_equal {
        Ok(())
    } else {
        Err(DeviceAuthError::InvalidSignature)
    }
}

/// Verifies `identity` against `shared_secret` and, when `expected_nonce`
/// is `Some`, also requires the identity's nonce to match it exactly
/// (replay protection during a challenge/response handshake).
pub fn authorize_device(
    identity: &DeviceIdentity,
    shared_secret: &[u8],
    expected_nonce: Option<&str>,
) -> Result<(), DeviceAuthError> {
    if let Some(expected_nonce) = expected_nonce {
        match identity.nonce.as_deref() {
            None => return Err(DeviceAuthError::NonceRequired),
            Some(nonce) if nonce != expected_nonce => return Err(DeviceAuthError::NonceMismatch),
            Some(_) => {}
        }
    }
    verify_device_signature(identity, shared_secret)
}
