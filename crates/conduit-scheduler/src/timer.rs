// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Pure helpers for picking which jobs are due and when the single timer
//! should next wake up. No I/O, no async: the service owns the actual
//! `tokio::time::sleep`/re-arm loop.

use crate::job::CronJob;

/// Jobs with `next_run_ms <= now_ms`, ordered by schedule time and then by
/// id so ties fire in a stable order.
pub fn due_jobs<'a>(jobs: &'a [CronJob], now_ms: i64) -> Vec<&'a CronJob> {
    let mut due: Vec<&CronJob> = jobs.iter().filter(|j| j.is_due(now_ms)).collect();
    due.sort_by(|a, b| {
        a.state
            .next_run_ms
            .cmp(&b.state.next_run_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
    due
}

/// The next instant the timer needs to fire, the minimum `next_run_ms`
/// across enabled jobs. `None` means nothing is scheduled and the timer
/// can sleep indefinitely until a job is added or updated.
pub fn next_wakeup_ms(jobs: &[CronJob]) -> Option<i64> {
    jobs.iter()
        .filter(|j| j.enabled)
        .filter_map(|j| j.state.next_run_ms)
        .min()
}
