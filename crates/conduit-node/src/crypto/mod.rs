// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
pub mod token;

pub use token::{RawToken, StoredToken, StoredTokenFile};
