// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Periodic health checking with a consecutive-failure threshold.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// One probe against the channel's live connection (e.g. a ping or a
/// lightweight API call). Implemented per platform.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> bool;
}

pub struct HealthChecker {
    check: Arc<dyn HealthCheck>,
    interval: Duration,
    timeout: Duration,
    unhealthy_threshold: u32,
    consecutive_failures: Mutex<u32>,
    on_unhealthy: Option<Box<dyn Fn() + Send + Sync>>,
}

impl HealthChecker {
    pub fn new(check: Arc<dyn HealthCheck>) -> Self {
        Self {
            check,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            unhealthy_threshold: 3,
            consecutive_failures: Mutex::new(0),
            on_unhealthy: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_threshold = threshold;
        self
    }

    /// Called once consecutive failures reach the threshold. Typically
    /// hands control back to a [`crate::ConnectionManager`] to trigger
    /// reconnection.
    pub fn on_unhealthy(mut self, cb: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_unhealthy = Some(Box::new(cb));
        self
    }

    /// Run a single check, respecting the per-check timeout. Returns
    /// whether the channel is currently healthy (below the threshold).
    pub async fn run_once(&self) -> bool {
        let healthy = tokio::time::timeout(self.timeout, self.check.check())
            .await
            .unwrap_or(false);

        let mut failures = self.consecutive_failures.lock().await;
        if healthy {
            *failures = 0;
            true
        } else {
            *failures += 1;
            let unhealthy = *failures >= self.unhealthy_threshold;
            if unhealthy {
                tracing::warn!(
                    consecutive_failures = *failures,
                    "channel health check failed threshold; marking unhealthy"
                );
                if let Some(cb) = &self.on_unhealthy {
                    cb();
                }
            }
            !unhealthy
        }
    }

    /// Run checks on `interval` until `stop` resolves. Intended to be
    /// spawned as a background task per channel instance.
    pub async fn run_loop(&self, mut stop: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = &mut stop => {
                    return;
                }
            }
        }
    }
}
