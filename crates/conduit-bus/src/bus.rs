// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;

use crate::events::{Event, EventKind};

type SyncHandler = Arc<dyn Fn(&Event) + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque subscription handle returned by `subscribe`/`subscribe_async`,
/// usable with `off` to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

#[derive(Clone)]
struct Entry {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
}

/// Typed publish/subscribe event bus. Subscribers are keyed by
/// [`EventKind`]; both synchronous callbacks (dispatched inline) and async
/// callbacks (awaited sequentially, in subscription order) are supported.
/// Subscriber panics are caught and logged; they never abort emission for
/// the remaining subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<Entry>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe a synchronous callback to `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.push(kind, Handler::Sync(Arc::new(handler)), false)
    }

    /// Subscribe an async callback to `kind`.
    pub fn subscribe_async<F, Fut>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |ev| Box::pin(handler(ev)));
        self.push(kind, Handler::Async(handler), false)
    }

    /// Subscribe a synchronous callback that auto-unsubscribes after its
    /// first delivery.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.push(kind, Handler::Sync(Arc::new(handler)), true)
    }

    fn push(&self, kind: EventKind, handler: Handler, once: bool) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUB_ID.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(Entry { id, handler, once });
        id
    }

    /// Remove a subscription by its handle. A no-op if already removed.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) {
        if let Some(entries) = self.subscribers.lock().unwrap().get_mut(&kind) {
            entries.retain(|e| e.id != id);
        }
    }

    /// Count of live subscribers for `kind` (for tests/observability).
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(&kind)
            .map_or(0, |v| v.len())
    }

    /// Publish `event` to every subscriber of `event.kind`. Sync handlers
    /// run inline; async handlers are awaited one at a time, in
    /// subscription order. `once` subscribers are removed after firing.
    pub async fn publish(&self, event: Event) {
        let kind = event.kind;
        // Snapshot the subscriber list so the lock isn't held across an
        // await point (an async handler could otherwise deadlock trying to
        // subscribe/unsubscribe on the same bus).
        let snapshot: Vec<Entry> = {
            let entries = self.subscribers.lock().unwrap();
            entries.get(&kind).cloned().unwrap_or_default()
        };

        let mut fired_once = Vec::new();
        for entry in &snapshot {
            match &entry.handler {
                Handler::Sync(f) => {
                    let f = f.clone();
                    let ev = &event;
                    if let Err(panic) =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(ev)))
                    {
                        tracing::warn!(?panic, ?kind, "sync subscriber panicked; swallowed");
                    }
                }
                Handler::Async(f) => {
                    let fut = f(event.clone());
                    if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        tracing::warn!(?panic, ?kind, "async subscriber panicked; swallowed");
                    }
                }
            }
            if entry.once {
                fired_once.push(entry.id);
            }
        }

        if !fired_once.is_empty() {
            let mut entries = self.subscribers.lock().unwrap();
            if let Some(list) = entries.get_mut(&kind) {
                list.retain(|e| !fired_once.contains(&e.id));
            }
        }
    }
}
