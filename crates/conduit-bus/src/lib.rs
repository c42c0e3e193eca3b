// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
pub mod abort;
pub mod bus;
pub mod events;

pub use abort::{abort_pair, AbortController, Aborted, AbortToken, ListenerId};
pub use bus::{EventBus, SubscriptionId};
pub use events::{Event, EventKind};
