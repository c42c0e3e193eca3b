// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Listener = Box<dyn Fn(Option<&str>) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle returned by `AbortToken::add_listener`, usable with
/// `remove_listener` to unsubscribe before the token fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Error surfaced by `throw_if_aborted` — carries the abort reason, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aborted(pub Option<String>);

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(reason) => write!(f, "aborted: {reason}"),
            None => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for Aborted {}

struct Inner {
    aborted: bool,
    reason: Option<String>,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Cooperative-cancellation token: many tasks hold clones of the same token
/// and cooperatively check `aborted()`/`throw_if_aborted()`, or register a
/// listener to be notified exactly once when the paired controller fires.
#[derive(Clone)]
pub struct AbortToken {
    inner: Arc<Mutex<Inner>>,
}

/// Owns the write side of an abort token pair. Only the holder of the
/// controller can trigger the abort; tokens handed to cooperating tasks are
/// read-only.
#[derive(Clone)]
pub struct AbortController {
    inner: Arc<Mutex<Inner>>,
}

/// Create a fresh controller/token pair, both initially not aborted.
pub fn abort_pair() -> (AbortController, AbortToken) {
    let inner = Arc::new(Mutex::new(Inner {
        aborted: false,
        reason: None,
        listeners: Vec::new(),
    }));
    (
        AbortController {
            inner: inner.clone(),
        },
        AbortToken { inner },
    )
}

impl AbortController {
    /// Trigger the paired token's abort. A no-op if already aborted.
    /// Fires every registered listener exactly once, in insertion order;
    /// a listener that panics is caught and logged, never propagated.
    pub fn trigger(&self, reason: Option<String>) {
        let listeners = {
            let mut inner = self.inner.lock().unwrap();
            if inner.aborted {
                return;
            }
            inner.aborted = true;
            inner.reason = reason;
            std::mem::take(&mut inner.listeners)
        };
        let reason = self.inner.lock().unwrap().reason.clone();
        for (_, listener) in listeners {
            let reason_ref = reason.as_deref();
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(reason_ref)
            })) {
                tracing::warn!(?panic, "abort listener panicked; swallowed");
            }
        }
    }

    pub fn token(&self) -> AbortToken {
        AbortToken {
            inner: self.inner.clone(),
        }
    }

    pub fn aborted(&self) -> bool {
        self.inner.lock().unwrap().aborted
    }
}

impl AbortToken {
    pub fn aborted(&self) -> bool {
        self.inner.lock().unwrap().aborted
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.lock().unwrap().reason.clone()
    }

    /// Returns `Err(Aborted)` if the token has fired; otherwise `Ok(())`.
    pub fn throw_if_aborted(&self) -> Result<(), Aborted> {
        let inner = self.inner.lock().unwrap();
        if inner.aborted {
            Err(Aborted(inner.reason.clone()))
        } else {
            Ok(())
        }
    }

    /// Register a listener to run exactly once when this token aborts. If
    /// the token is already aborted, the listener is invoked synchronously
    /// before this call returns.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&str>) + Send + Sync + 'static,
    {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.lock().unwrap();
        if inner.aborted {
            let reason = inner.reason.clone();
            drop(inner);
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(reason.as_deref())
            })) {
                tracing::warn!(?panic, "abort listener panicked; swallowed");
            }
        } else {
            inner.listeners.push((id, Box::new(listener)));
        }
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|(lid, _)| *lid != id);
    }

    /// A token that aborts as soon as any of `tokens` aborts, carrying
    /// whichever reason fired first.
    pub fn combine(tokens: &[AbortToken]) -> AbortToken {
        let (controller, token) = abort_pair();
        for t in tokens {
            if t.aborted() {
                controller.trigger(t.reason());
                return token;
            }
            let ctl = controller.clone();
            t.add_listener(move |reason| {
                ctl.trigger(reason.map(|s| s.to_string()));
            });
        }
        token
    }

    /// A token that aborts on its own after `duration` elapses, with reason
    /// `"timeout"`. Requires a Tokio runtime to be running.
    pub fn timeout(duration: Duration) -> AbortToken {
        let (controller, token) = abort_pair();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            controller.trigger(Some("timeout".to_string()));
        });
        token
    }
}
