// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! Atomic on-disk persistence for the job set, and an append-only
//! per-job run log.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::job::{CronJob, RunStatus};

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobFile {
    jobs: Vec<CronJob>,
}

/// Job set persisted as a single JSON file, written via temp-file-plus-rename
/// so a crash mid-write never leaves a truncated or partially-written file.
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<CronJob>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading job store at {}", self.path.display()))?;
        let file: JobFile = serde_json::from_str(&data)
            .with_context(|| format!("parsing job store at {}", self.path.display()))?;
        Ok(file.jobs)
    }

    pub fn save(&self, jobs: &[CronJob]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating job store directory {}", parent.display()))?;
        }
        let file = JobFile { jobs: jobs.to_vec() };
        let serialized =
            serde_json::to_string_pretty(&file).context("serializing job store")?;

        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, serialized)
            .with_context(|| format!("writing temp job store at {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming temp job store to {}", self.path.display()))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// One line of a job's run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub job_id: String,
    pub started_at_ms: i64,
    pub duration_ms: i64,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// Append-only run log: one JSON-lines file per job under `log_dir`.
pub struct RunLog {
    log_dir: PathBuf,
}

impl RunLog {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self { log_dir: log_dir.into() }
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        self.log_dir.join(format!("{job_id}.jsonl"))
    }

    pub fn append(&self, entry: &RunLogEntry) -> Result<()> {
        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("creating run log directory {}", self.log_dir.display()))?;
        let line = serde_json::to_string(entry).context("serializing run log entry")?;
        let path = self.path_for(&entry.job_id);

        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening run log {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("appending to run log {}", path.display()))?;
        Ok(())
    }

    pub fn read_all(&self, job_id: &str) -> Result<Vec<RunLogEntry>> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("reading run log {}", path.display()))?;
        data.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("parsing run log entry"))
            .collect()
    }
}
