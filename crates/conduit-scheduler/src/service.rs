// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
//! `CronService`: owns the job set, the single re-armed timer, and
//! dispatches due jobs to injected callbacks. Has no compile-time
//! dependency on `conduit-core` or `conduit-bus` — callers wire it to an
//! agent runtime by passing closures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::job::{CronJob, JobState, Payload, RunStatus};
use crate::schedule::compute_next_run;
use crate::store::{JobStore, RunLog, RunLogEntry};
use crate::timer::{due_jobs, next_wakeup_ms};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Deliver a system-event payload into a session. `agent_id` is `None` for
/// the default/main agent.
pub type SystemEventCallback =
    Arc<dyn Fn(String, Option<String>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Run an isolated agent turn for `job`; returns the turn's final text.
pub type IsolatedAgentCallback =
    Arc<dyn Fn(CronJob) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Broadcast events to whatever transport the caller wires up (gateway,
/// logging, tests). Not the same taxonomy as `conduit_bus::EventKind`:
/// scheduler events are job-lifecycle events, not agent-turn events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CronEvent {
    JobAdded { job_id: String },
    JobUpdated { job_id: String },
    JobRemoved { job_id: String },
    JobStarted { job_id: String },
    JobFinished { job_id: String, status: RunStatus, duration_ms: i64, error: Option<String> },
    ServiceStarted,
    ServiceStopped,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct CronServiceConfig {
    pub store_path: Option<std::path::PathBuf>,
    pub log_dir: Option<std::path::PathBuf>,
    pub on_system_event: Option<SystemEventCallback>,
    pub on_isolated_agent: Option<IsolatedAgentCallback>,
}

impl Default for CronServiceConfig {
    fn default() -> Self {
        Self { store_path: None, log_dir: None, on_system_event: None, on_isolated_agent: None }
    }
}

pub struct CronService {
    jobs: Mutex<Vec<CronJob>>,
    store: Option<JobStore>,
    run_log: Option<RunLog>,
    on_system_event: Option<SystemEventCallback>,
    on_isolated_agent: Option<IsolatedAgentCallback>,
    events: broadcast::Sender<CronEvent>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CronService {
    pub fn new(config: CronServiceConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            jobs: Mutex::new(Vec::new()),
            store: config.store_path.map(JobStore::new),
            run_log: config.log_dir.map(RunLog::new),
            on_system_event: config.on_system_event,
            on_isolated_agent: config.on_isolated_agent,
            events,
            timer_handle: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CronEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CronEvent) {
        let _ = self.events.send(event);
    }

    /// Loads persisted jobs, recomputes next-run times, and runs at most one
    /// makeup pass for anything that came due while the process was down.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut jobs = match &self.store {
            Some(store) => store.load()?,
            None => Vec::new(),
        };
        let now = now_ms();
        for job in &mut jobs {
            if job.enabled && job.state.next_run_ms.is_none() {
                job.state.next_run_ms = initial_next_run(job, now);
            }
        }
        *self.jobs.lock().await = jobs;
        self.persist().await?;

        self.emit(CronEvent::ServiceStarted);

        // At most one makeup pass: anything already overdue fires once now,
        // rather than the timer looping to drain a backlog.
        self.tick(now).await?;

        let service = Arc::clone(self);
        let handle = tokio::spawn(async move { service.run_timer_loop().await });
        *self.timer_handle.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.abort();
        }
        self.emit(CronEvent::ServiceStopped);
    }

    async fn run_timer_loop(self: Arc<Self>) {
        loop {
            let wakeup = {
                let jobs = self.jobs.lock().await;
                next_wakeup_ms(&jobs)
            };
            let sleep_ms = match wakeup {
                Some(t) => (t - now_ms()).max(0),
                None => 60_000,
            };
            tokio::time::sleep(std::time::Duration::from_millis(sleep_ms as u64)).await;
            if let Err(err) = self.tick(now_ms()).await {
                tracing::error!(error = %err, "cron tick failed");
            }
        }
    }

    /// Fires every job whose `next_run_ms <= now`, in order. Exposed so tests
    /// can advance time deterministically instead of sleeping on a wall clock.
    pub async fn tick(&self, now: i64) -> Result<()> {
        let due_ids: Vec<String> = {
            let jobs = self.jobs.lock().await;
            due_jobs(&jobs, now).into_iter().map(|j| j.id.clone()).collect()
        };
        for id in due_ids {
            self.execute_job(&id).await?;
        }
        Ok(())
    }

    async fn execute_job(&self, job_id: &str) -> Result<()> {
        let job = {
            let jobs = self.jobs.lock().await;
            match jobs.iter().find(|j| j.id == job_id) {
                Some(j) => j.clone(),
                None => return Ok(()),
            }
        };

        self.emit(CronEvent::JobStarted { job_id: job.id.clone() });
        let started_at = now_ms();
        {
            let mut jobs = self.jobs.lock().await;
            if let Some(j) = jobs.iter_mut().find(|j| j.id == job_id) {
                j.state.running_at_ms = Some(started_at);
            }
        }

        let result = self.run_payload(&job).await;
        let duration_ms = now_ms() - started_at;
        let (status, error) = match &result {
            Ok(_) => (RunStatus::Success, None),
            Err(err) => (RunStatus::Error, Some(err.to_string())),
        };

        let removed = {
            let mut jobs = self.jobs.lock().await;
            if let Some(j) = jobs.iter_mut().find(|j| j.id == job_id) {
                j.state.running_at_ms = None;
                j.state.last_run_at_ms = Some(started_at);
                j.state.last_status = Some(status);
                j.state.last_duration_ms = Some(duration_ms);
                j.state.last_error = error.clone();

                if j.delete_after_run {
                    true
                } else {
                    j.state.next_run_ms = compute_next_run(&j.schedule, started_at);
                    false
                }
            } else {
                false
            }
        };

        if removed {
            self.jobs.lock().await.retain(|j| j.id != job_id);
        }

        if let Some(run_log) = &self.run_log {
            run_log.append(&RunLogEntry {
                job_id: job.id.clone(),
                started_at_ms: started_at,
                duration_ms,
                status,
                error: error.clone(),
            })?;
        }
        self.persist().await?;

        self.emit(CronEvent::JobFinished {
            job_id: job.id.clone(),
            status,
            duration_ms,
            error,
        });
        Ok(())
    }

    async fn run_payload(&self, job: &CronJob) -> Result<()> {
        match &job.payload {
            Payload::SystemEvent { text, agent_id } => {
                if let Some(cb) = &self.on_system_event {
                    cb(text.clone(), agent_id.clone()).await?;
                }
                Ok(())
            }
            Payload::AgentTurn { .. } => {
                if let Some(cb) = &self.on_isolated_agent {
                    cb(job.clone()).await?;
                }
                Ok(())
            }
        }
    }

    pub async fn add_job(&self, mut job: CronJob) -> Result<()> {
        job.state.next_run_ms = initial_next_run(&job, now_ms());
        let id = job.id.clone();
        self.jobs.lock().await.push(job);
        self.persist().await?;
        self.emit(CronEvent::JobAdded { job_id: id });
        Ok(())
    }

    pub async fn update_job(&self, job_id: &str, mutate: impl FnOnce(&mut CronJob)) -> Result<bool> {
        let updated = {
            let mut jobs = self.jobs.lock().await;
            match jobs.iter_mut().find(|j| j.id == job_id) {
                Some(j) => {
                    mutate(j);
                    j.state.next_run_ms = initial_next_run(j, now_ms());
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist().await?;
            self.emit(CronEvent::JobUpdated { job_id: job_id.to_string() });
        }
        Ok(updated)
    }

    pub async fn remove_job(&self, job_id: &str) -> Result<bool> {
        let removed = {
            let mut jobs = self.jobs.lock().await;
            let before = jobs.len();
            jobs.retain(|j| j.id != job_id);
            jobs.len() != before
        };
        if removed {
            self.persist().await?;
            self.emit(CronEvent::JobRemoved { job_id: job_id.to_string() });
        }
        Ok(removed)
    }

    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.jobs.lock().await.clone()
    }

    pub async fn get_job(&self, job_id: &str) -> Option<CronJob> {
        self.jobs.lock().await.iter().find(|j| j.id == job_id).cloned()
    }

    pub async fn get_job_status(&self, job_id: &str) -> Option<JobState> {
        self.get_job(job_id).await.map(|j| j.state)
    }

    /// Runs a job immediately, out of band from its schedule. Does not
    /// consume/advance `next_run_ms` for recurring jobs.
    pub async fn run_job_now(&self, job_id: &str) -> Result<()> {
        self.execute_job(job_id).await
    }

    /// Past runs recorded for `job_id`, oldest first. Empty if the service
    /// was built without a `log_dir` or the job has never run.
    pub fn list_runs(&self, job_id: &str) -> Result<Vec<RunLogEntry>> {
        match &self.run_log {
            Some(log) => log.read_all(job_id),
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self) -> Result<()> {
        if let Some(store) = &self.store {
            let jobs = self.jobs.lock().await;
            store.save(&jobs)?;
        }
        Ok(())
    }
}

fn initial_next_run(job: &CronJob, now: i64) -> Option<i64> {
    if !job.enabled {
        return None;
    }
    compute_next_run(&job.schedule, now - 1)
}
