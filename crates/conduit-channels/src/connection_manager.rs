// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Connection lifecycle state machine with exponential backoff.
//!
//! `ConnectionManager` wraps a [`Connector`] (the `(connect_fn,
//! disconnect_fn)` pair) and drives it through:
//!
//! ```text
//! disconnected ──connect──▶ connecting ──success──▶ connected
//!                               │                        │
//!                               ├──fail──▶ error         ├── conn_err ──▶ reconnecting
//!                               ▼                        ▼                       │
//!                          reconnecting ◀──────── reconnecting ◀────retry────────┘
//!                               │
//!                               ├── success ──▶ connected
//!                               └── exhausted ─▶ error
//! disconnect() from any state ─▶ stopped
//! ```
//!
//! State transitions are serialised by a single lock — the reconnect loop
//! and an external caller can never drive two transitions concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;

/// Connects and disconnects a channel's underlying transport. Implemented
/// per platform; this crate only drives the state machine around it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;
    async fn disconnect(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Error { message: String },
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Jitter up to 25% of the computed delay.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
            jitter: true,
        }
    }
}

/// `delay = min(base * 2^(attempt-1), max_delay)`, then up to 25% jitter
/// added on top. `attempt` is 1-based.
pub fn backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let scaled = config.base_delay.saturating_mul(1u32 << exp);
    let capped = scaled.min(config.max_delay);
    if !config.jitter {
        return capped;
    }
    let jitter_fraction: f64 = rand::thread_rng().gen_range(0.0..0.25);
    capped + capped.mul_f64(jitter_fraction)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    pub reconnect_count: u64,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    backoff: BackoffConfig,
    state: Mutex<ConnectionState>,
    metrics: Mutex<ConnectionMetrics>,
    on_state_change: Option<Box<dyn Fn(&ConnectionState) + Send + Sync>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, backoff: BackoffConfig) -> Self {
        Self {
            connector,
            backoff,
            state: Mutex::new(ConnectionState::Disconnected),
            metrics: Mutex::new(ConnectionMetrics::default()),
            on_state_change: None,
        }
    }

    pub fn with_state_change_callback(
        mut self,
        cb: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(cb));
        self
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.lock().await.clone()
    }

    pub async fn metrics(&self) -> ConnectionMetrics {
        *self.metrics.lock().await
    }

    async fn set_state(&self, new_state: ConnectionState) {
        let mut guard = self.state.lock().await;
        *guard = new_state.clone();
        drop(guard);
        if let Some(cb) = &self.on_state_change {
            cb(&new_state);
        }
    }

    /// `disconnected -> connecting -> {connected, error}`.
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.set_state(ConnectionState::Connecting).await;
        match self.connector.connect().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Error { message: e.to_string() }).await;
                Err(e)
            }
        }
    }

    /// Called when a connected session drops unexpectedly. Drives the
    /// reconnect loop with exponential backoff until it succeeds or
    /// `max_attempts` is exhausted, at which point the channel is marked
    /// `error` and reconnection stops.
    pub async fn on_connection_lost(&self) {
        let mut attempt = 1;
        loop {
            self.set_state(ConnectionState::Reconnecting { attempt }).await;
            let delay = backoff_delay(&self.backoff, attempt);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::time::sleep(delay).await;

            if matches!(self.state().await, ConnectionState::Stopped) {
                return;
            }

            match self.connector.connect().await {
                Ok(()) => {
                    self.metrics.lock().await.reconnect_count += 1;
                    self.set_state(ConnectionState::Connected).await;
                    return;
                }
                Err(e) => {
                    self.metrics.lock().await.errors += 1;
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    if attempt >= self.backoff.max_attempts {
                        self.set_state(ConnectionState::Error { message: e.to_string() }).await;
                        return;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Disconnect from any state.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        let result = self.connector.disconnect().await;
        self.set_state(ConnectionState::Stopped).await;
        result
    }

    pub async fn record_sent(&self) {
        self.metrics.lock().await.messages_sent += 1;
    }

    pub async fn record_received(&self) {
        self.metrics.lock().await.messages_received += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyConnector {
        fail_until_attempt: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(&self) -> anyhow::Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.fail_until_attempt {
                anyhow::bail!("not yet");
            }
            Ok(())
        }
        async fn disconnect(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_attempts: 5,
            jitter: false,
        }
    }

    #[test]
    fn backoff_delay_doubles_until_capped() {
        let cfg = BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
            jitter: false,
        };
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&cfg, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(&cfg, 5), Duration::from_secs(10), "must cap at max_delay");
    }

    #[test]
    fn backoff_delay_jitter_stays_within_25_percent() {
        let cfg = BackoffConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(100),
            max_attempts: 10,
            jitter: true,
        };
        for _ in 0..50 {
            let d = backoff_delay(&cfg, 1);
            assert!(d >= Duration::from_secs(10));
            assert!(d <= Duration::from_millis(12500));
        }
    }

    #[tokio::test]
    async fn connect_success_transitions_to_connected() {
        let connector = Arc::new(FlakyConnector { fail_until_attempt: 1, attempts: AtomicU32::new(0) });
        let mgr = ConnectionManager::new(connector, fast_backoff());
        mgr.connect().await.unwrap();
        assert_eq!(mgr.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn connect_failure_transitions_to_error() {
        let connector = Arc::new(FlakyConnector { fail_until_attempt: 99, attempts: AtomicU32::new(0) });
        let mgr = ConnectionManager::new(connector, fast_backoff());
        assert!(mgr.connect().await.is_err());
        assert!(matches!(mgr.state().await, ConnectionState::Error { .. }));
    }

    #[tokio::test]
    async fn reconnect_succeeds_after_transient_failures() {
        let connector = Arc::new(FlakyConnector { fail_until_attempt: 3, attempts: AtomicU32::new(0) });
        let mgr = ConnectionManager::new(connector, fast_backoff());
        mgr.on_connection_lost().await;
        assert_eq!(mgr.state().await, ConnectionState::Connected);
        assert_eq!(mgr.metrics().await.reconnect_count, 1);
    }

    #[tokio::test]
    async fn reconnect_exhausts_attempts_and_moves_to_error() {
        let connector = Arc::new(FlakyConnector { fail_until_attempt: 999, attempts: AtomicU32::new(0) });
        let mgr = ConnectionManager::new(connector, fast_backoff());
        mgr.on_connection_lost().await;
        assert!(matches!(mgr.state().await, ConnectionState::Error { .. }));
    }

    #[tokio::test]
    async fn disconnect_moves_to_stopped_from_any_state() {
        let connector = Arc::new(FlakyConnector { fail_until_attempt: 1, attempts: AtomicU32::new(0) });
        let mgr = ConnectionManager::new(connector, fast_backoff());
        mgr.connect().await.unwrap();
        mgr.disconnect().await.unwrap();
        assert_eq!(mgr.state().await, ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn state_change_callback_invoked_on_every_transition() {
        use std::sync::atomic::AtomicUsize;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let connector = Arc::new(FlakyConnector { fail_until_attempt: 1, attempts: AtomicU32::new(0) });
        let mgr = ConnectionManager::new(connector, fast_backoff())
            .with_state_change_callback(move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            });
        mgr.connect().await.unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 2, "connecting + connected at least");
    }
}
