// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Schedule kinds and the pure next-run-time computation shared by the
//! timer and the store.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    /// Fires exactly once at `timestamp` (epoch ms), then the job is deleted.
    At { timestamp: i64 },
    /// Fires every `interval_ms`, anchored at `anchor` (epoch ms).
    Every { interval_ms: i64, anchor: i64 },
    /// Standard 5-field cron expression, evaluated in `timezone` (IANA name).
    Cron { expression: String, timezone: String },
}

/// Computes the next fire time strictly greater than `after_ms`, or `None`
/// if the schedule has no more occurrences (an elapsed `At`).
pub fn compute_next_run(schedule: &Schedule, after_ms: i64) -> Option<i64> {
    match schedule {
        Schedule::At { timestamp } => {
            if *timestamp > after_ms {
                Some(*timestamp)
            } else {
                None
            }
        }
        Schedule::Every { interval_ms, anchor } => {
            if *interval_ms <= 0 {
                return None;
            }
            if after_ms < *anchor {
                return Some(*anchor);
            }
            let elapsed = after_ms - anchor;
            let ticks = elapsed / interval_ms + 1;
            Some(anchor + ticks * interval_ms)
        }
        Schedule::Cron { expression, timezone } => compute_next_cron_run(expression, timezone, after_ms),
    }
}

/// `after_ms` is exclusive: a job whose schedule matches `after_ms` exactly
/// fires on its *next* occurrence, not immediately again.
fn compute_next_cron_run(expression: &str, timezone: &str, after_ms: i64) -> Option<i64> {
    let tz: chrono_tz::Tz = timezone.parse().ok()?;
    let normalized = normalize_cron_expression(expression);
    let schedule = cron::Schedule::from_str(&normalized).ok()?;

    let after = tz.timestamp_millis_opt(after_ms).single()?;
    schedule
        .after(&after)
        .next()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// The `cron` crate requires a leading seconds field (6-7 fields); jobs are
/// authored with standard 5-field expressions, so prepend a literal `"0"`.
fn normalize_cron_expression(expression: &str) -> String {
    let field_count = expression.split_whitespace().count();
    if field_count <= 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}
