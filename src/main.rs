// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
mod cli;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

use conduit_approval::ApprovalManager;
use conduit_bus::{Event, EventBus, EventKind};
use conduit_core::{AgentLoop, AgentRuntimeContext, Session};
use conduit_gateway::http::auth::AuthState;
use conduit_gateway::methods::{BoxFuture as MethodFuture, CallerContext, Handler, MethodPolicy, MethodRegistry, Role};
use conduit_gateway::runs::ActiveRuns;
use conduit_gateway::stream_proxy::to_event_envelope;
use conduit_gateway::{GatewayError, GatewayErrorCode};
use conduit_model::Provider;
use conduit_node::{DeviceRegistry, NodeRegistry, StoredTokenFile};
use conduit_scheduler::{CronJob, CronService, CronServiceConfig, Payload};
use conduit_tools::ToolRegistry;

/// Every turn-level event kind forwarded to connected clients as
/// `chat.message_update`.
const EVENT_KINDS: &[EventKind] = &[
    EventKind::AgentStart,
    EventKind::TurnStart,
    EventKind::MessageStart,
    EventKind::ThinkingStart,
    EventKind::ThinkingDelta,
    EventKind::ThinkingEnd,
    EventKind::TextDelta,
    EventKind::ToolCallStart,
    EventKind::ToolCallDelta,
    EventKind::ToolCallEnd,
    EventKind::MessageEnd,
    EventKind::TurnEnd,
    EventKind::ToolExecutionStart,
    EventKind::ToolExecutionUpdate,
    EventKind::ToolExecutionEnd,
    EventKind::AgentEnd,
];

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "conduit=info,conduit_core=info,conduit_gateway=info,conduit_scheduler=info",
        1 => "conduit=debug,conduit_core=debug,conduit_gateway=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Holds one [`Session`] per session key, each behind its own lock so two
/// callers never drive the same session's turn concurrently — mirrors the
/// invariant documented on [`Session`]: mutated only from the single task
/// running that session's turn.
#[derive(Default)]
struct SessionStore {
    sessions: AsyncMutex<HashMap<String, Arc<AsyncMutex<Session>>>>,
}

impl SessionStore {
    fn new() -> Self {
        Self::default()
    }

    async fn get_or_create(&self, key: &str, model: &str, max_tokens: usize) -> Arc<AsyncMutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(Session::new(key.to_string(), model.to_string(), max_tokens))))
            .clone()
    }

    async fn get(&self, key: &str) -> Option<Arc<AsyncMutex<Session>>> {
        self.sessions.lock().await.get(key).cloned()
    }

    async fn remove(&self, key: &str) -> bool {
        self.sessions.lock().await.remove(key).is_some()
    }

    /// Per-session approximate token counts, for `gateway.status`/`usage.cost`.
    async fn token_counts(&self) -> Vec<(String, usize)> {
        let sessions = self.sessions.lock().await;
        let mut counts = Vec::with_capacity(sessions.len());
        for (key, session) in sessions.iter() {
            counts.push((key.clone(), session.lock().await.token_count()));
        }
        counts
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let command = cli.command.unwrap_or(Commands::Start {
        bind: "127.0.0.1:8787".parse().unwrap(),
        token_file: None,
        device_registry: None,
        state_dir: None,
    });

    match command {
        Commands::Start { bind, token_file, device_registry, state_dir } => {
            let config = conduit_config::load(cli.config.as_deref())?;
            run_gateway(config, bind, token_file, device_registry, state_dir).await
        }
        Commands::ShowConfig => {
            let config = conduit_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::ListProviders => {
            for driver in conduit_model::list_drivers() {
                println!("{:<12} {:<20} {}", driver.id, driver.name, driver.description);
                if let Some(env) = driver.default_api_key_env {
                    println!("             env: {env}");
                }
            }
            Ok(())
        }
        Commands::ListModels { provider } => {
            for entry in conduit_model::catalog::static_catalog() {
                if provider.as_deref().is_some_and(|p| p != entry.provider) {
                    continue;
                }
                println!(
                    "{:<12} {:<24} ctx={:<8} out={:<6} images={}",
                    entry.provider,
                    entry.id,
                    entry.context_window,
                    entry.max_output_tokens,
                    entry.supports_images(),
                );
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            Cli::print_completions(shell);
            Ok(())
        }
    }
}

async fn run_gateway(
    config: conduit_config::Config,
    bind: SocketAddr,
    token_file: Option<PathBuf>,
    device_registry_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
) -> Result<()> {
    let state_dir = state_dir.unwrap_or_else(default_state_dir);
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating state directory {}", state_dir.display()))?;

    let token_file = token_file.unwrap_or_else(|| state_dir.join("token.yaml"));
    if !token_file.exists() {
        let raw = StoredTokenFile::generate_and_save(&token_file).context("generating bearer token")?;
        println!("Generated bearer token (save it — shown once): {raw}");
    }
    let token_file_contents = StoredTokenFile::load(&token_file).context("loading bearer token")?;
    let auth_state = AuthState::with_defaults(token_file_contents.token_hash);

    let device_registry_path = device_registry_path.unwrap_or_else(conduit_node::default_registry_path);
    let device_registry_exists = device_registry_path.exists();
    let device_registry = Arc::new(if device_registry_exists {
        DeviceRegistry::load(device_registry_path)?
    } else {
        DeviceRegistry::new()
    });

    let node_registry_path = conduit_node::default_node_registry_path();
    let node_registry = Arc::new(if node_registry_path.exists() {
        NodeRegistry::load(node_registry_path)?
    } else {
        NodeRegistry::new()
    });

    let provider: Arc<dyn Provider> = Arc::from(conduit_model::from_config(&config.model)?);
    let tools = Arc::new(ToolRegistry::with_config(conduit_tools::ToolRuntimeConfig::from_tools_config(&config.tools)));
    let agent_config = Arc::new(config.agent.clone());
    let bus = Arc::new(EventBus::new());
    let max_tokens = config.model.max_tokens.unwrap_or(4096) as usize;
    let default_model = config.model.name.clone();

    let (events_tx, _) = broadcast::channel::<conduit_gateway::protocol::EventEnvelope>(1024);
    for kind in EVENT_KINDS {
        let tx = events_tx.clone();
        bus.subscribe(*kind, move |event: &Event| {
            let _ = tx.send(to_event_envelope(event));
        });
    }

    let agent_loop = Arc::new(AgentLoop::new(provider, tools, agent_config, AgentRuntimeContext::default(), bus));
    let sessions = Arc::new(SessionStore::new());
    let active_runs = Arc::new(ActiveRuns::new());
    let approval = Arc::new(ApprovalManager::new(std::time::Duration::from_secs(300)));

    let cron_service = build_cron_service(&state_dir, agent_loop.clone(), sessions.clone(), default_model.clone(), max_tokens);
    cron_service.start().await.context("starting cron service")?;

    let methods = build_method_registry(
        agent_loop,
        sessions,
        active_runs,
        cron_service,
        approval,
        device_registry,
        node_registry.clone(),
        default_model,
        max_tokens,
    );

    conduit_gateway::http::serve(bind, auth_state, Arc::new(methods), events_tx, Some(node_registry)).await
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/conduit/gateway")
}

/// Wires the cron scheduler's callbacks to the agent loop: `SystemEvent`
/// jobs deliver a system-role message into the named session's ongoing
/// conversation (without driving a turn), `AgentTurn` jobs run a one-off
/// isolated turn and return its final text.
fn build_cron_service(
    state_dir: &PathBuf,
    agent_loop: Arc<AgentLoop>,
    sessions: Arc<SessionStore>,
    default_model: String,
    max_tokens: usize,
) -> Arc<CronService> {
    let system_event_sessions = sessions;
    let model_for_events = default_model.clone();
    let on_system_event: conduit_scheduler::SystemEventCallback = Arc::new(move |text, agent_id| {
        let sessions = system_event_sessions.clone();
        let model = model_for_events.clone();
        Box::pin(async move {
            let key = agent_id.unwrap_or_else(|| "main".to_string());
            let session = sessions.get_or_create(&key, &model, max_tokens).await;
            let mut session = session.lock().await;
            session.push(conduit_model::Message::system(text));
            Ok(())
        }) as Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
    });

    let on_isolated_agent: conduit_scheduler::IsolatedAgentCallback = Arc::new(move |job: CronJob| {
        let agent_loop = agent_loop.clone();
        let model = default_model.clone();
        Box::pin(async move {
            let Payload::AgentTurn { prompt, model: override_model } = job.payload else {
                anyhow::bail!("isolated agent callback invoked with a non-AgentTurn payload");
            };
            let mut session = Session::new(format!("cron:{}", job.id), model, max_tokens);
            let messages = agent_loop
                .prompt(&mut session, vec![prompt], override_model.as_deref(), Vec::new())
                .await?;
            Ok(messages.last().and_then(|m| m.as_text()).map(str::to_string).unwrap_or_default())
        }) as Pin<Box<dyn std::future::Future<Output = anyhow::Result<String>> + Send>>
    });

    Arc::new(CronService::new(CronServiceConfig {
        store_path: Some(state_dir.join("cron.json")),
        log_dir: Some(state_dir.join("cron-runs")),
        on_system_event: Some(on_system_event),
        on_isolated_agent: Some(on_isolated_agent),
    }))
}

/// Registers the `chat.*`, `cron.*`, and `exec.approval.*` methods (spec
/// §8's method surface) against the dispatch table, each closing over the
/// service instances built in [`run_gateway`].
fn build_method_registry(
    agent_loop: Arc<AgentLoop>,
    sessions: Arc<SessionStore>,
    active_runs: Arc<ActiveRuns>,
    cron_service: Arc<CronService>,
    approval: Arc<ApprovalManager>,
    device_registry: Arc<DeviceRegistry>,
    node_registry: Arc<NodeRegistry>,
    default_model: String,
    max_tokens: usize,
) -> MethodRegistry {
    let mut registry = MethodRegistry::new();

    {
        let agent_loop = agent_loop.clone();
        let sessions = sessions.clone();
        let active_runs = active_runs.clone();
        let default_model = default_model.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let agent_loop = agent_loop.clone();
            let sessions = sessions.clone();
            let active_runs = active_runs.clone();
            let default_model = default_model.clone();
            Box::pin(async move {
                let text = params
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `text`"))?
                    .to_string();
                let session_key = params.get("sessionKey").and_then(Value::as_str).unwrap_or("main").to_string();
                let run_id = uuid::Uuid::new_v4().to_string();
                let session = sessions.get_or_create(&session_key, &default_model, max_tokens).await;
                let _token = active_runs.start(run_id.clone(), session_key.clone());
                let mut session = session.lock().await;
                agent_loop
                    .prompt(&mut session, vec![text], None, Vec::new())
                    .await
                    .map_err(|e| GatewayError::from_unhandled(&e))?;
                active_runs.finish(&run_id);
                Ok(json!({ "messageId": run_id }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("chat.send", MethodPolicy::new(Role::Operator).with_scopes(&["chat.send"]), handler);
    }

    {
        let sessions = sessions.clone();
        let default_model = default_model.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let sessions = sessions.clone();
            let default_model = default_model.clone();
            Box::pin(async move {
                let session_key = params
                    .get("sessionKey")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `sessionKey`"))?;
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
                let session = sessions.get_or_create(session_key, &default_model, max_tokens).await;
                let session = session.lock().await;
                let total = session.messages().len();
                let skip = total.saturating_sub(limit);
                let history: Vec<Value> = session.messages()[skip..]
                    .iter()
                    .map(|m| json!({ "role": m.role, "text": m.as_text() }))
                    .collect();
                Ok(json!(history))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("chat.history", MethodPolicy::new(Role::Operator).with_scopes(&["chat.history"]), handler);
    }

    {
        let active_runs = active_runs.clone();
        let agent_loop = agent_loop.clone();
        let sessions = sessions.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let active_runs = active_runs.clone();
            let agent_loop = agent_loop.clone();
            let sessions = sessions.clone();
            Box::pin(async move {
                let reason = params.get("reason").and_then(Value::as_str).map(str::to_string);
                let run_id = params.get("runId").and_then(Value::as_str);
                let session_key = params
                    .get("sessionKey")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| run_id.and_then(|id| active_runs.session_id(id)));

                let aborted = match &session_key {
                    Some(key) => {
                        if let Some(session) = sessions.get(key).await {
                            let session = session.lock().await;
                            agent_loop.abort(&session, reason.clone());
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                };
                let run_aborted = run_id.map(|id| active_runs.abort(id, reason)).unwrap_or(false);

                Ok(json!({ "aborted": aborted || run_aborted }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("chat.abort", MethodPolicy::new(Role::Operator).with_scopes(&["chat.abort"]), handler);
    }

    {
        let sessions = sessions.clone();
        let default_model = default_model.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let sessions = sessions.clone();
            let default_model = default_model.clone();
            Box::pin(async move {
                let session_key = params
                    .get("sessionKey")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `sessionKey`"))?;
                let text = params
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `text`"))?;
                let role = params.get("role").and_then(Value::as_str).unwrap_or("user");
                let message = match role {
                    "user" => conduit_model::Message::user(text),
                    "system" => conduit_model::Message::system(text),
                    "assistant" => conduit_model::Message::assistant(text),
                    "custom" => conduit_model::Message::custom(text),
                    other => {
                        return Err(GatewayError::new(
                            GatewayErrorCode::InvalidRequest,
                            format!("invalid `role`: {other}"),
                        ))
                    }
                };
                let session = sessions.get_or_create(session_key, &default_model, max_tokens).await;
                let mut session = session.lock().await;
                session.push(message);
                Ok(json!({ "injected": true }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("chat.inject", MethodPolicy::new(Role::Operator).with_scopes(&["chat.inject"]), handler);
    }

    {
        let cron_service = cron_service.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, _params: Value| {
            let cron_service = cron_service.clone();
            Box::pin(async move { Ok(json!(cron_service.list_jobs().await)) }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("cron.list", MethodPolicy::new(Role::Operator).with_scopes(&["cron.list"]), handler);
    }

    {
        let cron_service = cron_service.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let cron_service = cron_service.clone();
            Box::pin(async move {
                let job: CronJob = serde_json::from_value(params)
                    .map_err(|e| GatewayError::new(GatewayErrorCode::InvalidRequest, e.to_string()))?;
                let id = job.id.clone();
                cron_service.add_job(job).await.map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "id": id }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("cron.add", MethodPolicy::new(Role::Operator).with_scopes(&["cron.add"]), handler);
    }

    {
        let cron_service = cron_service.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let cron_service = cron_service.clone();
            Box::pin(async move {
                let job_id = params
                    .get("jobId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `jobId`"))?;
                let removed = cron_service.remove_job(job_id).await.map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "removed": removed }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("cron.remove", MethodPolicy::new(Role::Operator).with_scopes(&["cron.remove"]), handler);
    }

    {
        let cron_service = cron_service.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let cron_service = cron_service.clone();
            Box::pin(async move {
                let job_id = params
                    .get("jobId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `jobId`"))?;
                cron_service.run_job_now(job_id).await.map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "started": true }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("cron.run", MethodPolicy::new(Role::Operator).with_scopes(&["cron.run"]), handler);
    }

    {
        let cron_service = cron_service.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let cron_service = cron_service.clone();
            Box::pin(async move {
                let job_id = params
                    .get("jobId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `jobId`"))?
                    .to_string();
                let patch = params.get("patch").cloned().unwrap_or_else(|| params.clone());
                let updated = cron_service
                    .update_job(&job_id, |job| {
                        if let Some(name) = patch.get("name").and_then(Value::as_str) {
                            job.name = name.to_string();
                        }
                        if let Some(enabled) = patch.get("enabled").and_then(Value::as_bool) {
                            job.enabled = enabled;
                        }
                        if let Some(schedule) = patch.get("schedule") {
                            if let Ok(s) = serde_json::from_value(schedule.clone()) {
                                job.schedule = s;
                            }
                        }
                        if let Some(payload) = patch.get("payload") {
                            if let Ok(p) = serde_json::from_value(payload.clone()) {
                                job.payload = p;
                            }
                        }
                        if let Some(target) = patch.get("sessionTarget") {
                            if let Ok(t) = serde_json::from_value(target.clone()) {
                                job.session_target = t;
                            }
                        }
                        if let Some(delete_after_run) = patch.get("deleteAfterRun").and_then(Value::as_bool) {
                            job.delete_after_run = delete_after_run;
                        }
                    })
                    .await
                    .map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "updated": updated }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("cron.update", MethodPolicy::new(Role::Operator).with_scopes(&["cron.update"]), handler);
    }

    {
        let cron_service = cron_service.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let cron_service = cron_service.clone();
            Box::pin(async move {
                let job_id = params
                    .get("jobId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `jobId`"))?;
                let status = cron_service
                    .get_job_status(job_id)
                    .await
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("unknown job: {job_id}")))?;
                Ok(json!(status))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("cron.status", MethodPolicy::new(Role::Operator).with_scopes(&["cron.status"]), handler);
    }

    {
        let cron_service = cron_service.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let cron_service = cron_service.clone();
            Box::pin(async move {
                let job_id = params
                    .get("jobId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `jobId`"))?;
                let runs = cron_service.list_runs(job_id).map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!(runs))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("cron.runs", MethodPolicy::new(Role::Operator).with_scopes(&["cron.runs"]), handler);
    }

    {
        let approval = approval.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let approval = approval.clone();
            Box::pin(async move {
                let command = params
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `command`"))?;
                let context = params.get("context").cloned().unwrap_or(Value::Null);
                let id = approval.request_approval(command, context).await;
                Ok(json!({ "id": id }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("exec.approval.request", MethodPolicy::new(Role::Operator).with_scopes(&["approval.request"]), handler);
    }

    {
        let approval = approval.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let approval = approval.clone();
            Box::pin(async move {
                let id = params
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `id`"))?;
                Ok(json!({ "expired": approval.expire(id).await }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("exec.approval.timeout", MethodPolicy::new(Role::Operator).with_scopes(&["approval.resolve"]), handler);
    }

    {
        let approval = approval.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, _params: Value| {
            let approval = approval.clone();
            Box::pin(async move { Ok(json!(approval.list_pending().await)) }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("exec.approval.list", MethodPolicy::new(Role::Operator).with_scopes(&["approval.list"]), handler);
    }

    {
        let approval = approval.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let approval = approval.clone();
            Box::pin(async move {
                let id = params
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `id`"))?;
                let by = params.get("by").and_then(Value::as_str).map(str::to_string);
                Ok(json!({ "approved": approval.approve(id, by).await }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("exec.approval.approve", MethodPolicy::new(Role::Operator).with_scopes(&["approval.resolve"]), handler);
    }

    {
        let approval = approval.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let approval = approval.clone();
            Box::pin(async move {
                let id = params
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `id`"))?;
                let by = params.get("by").and_then(Value::as_str).map(str::to_string);
                Ok(json!({ "rejected": approval.reject(id, by).await }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("exec.approval.deny", MethodPolicy::new(Role::Operator).with_scopes(&["approval.resolve"]), handler);
    }

    {
        let approval = approval.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let approval = approval.clone();
            Box::pin(async move {
                let id = params
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `id`"))?;
                let approved = params
                    .get("approved")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `approved`"))?;
                let by = params.get("by").and_then(Value::as_str).map(str::to_string);
                let resolved = if approved { approval.approve(id, by).await } else { approval.reject(id, by).await };
                Ok(json!({ "resolved": resolved, "approved": approved }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("exec.approval.resolve", MethodPolicy::new(Role::Operator).with_scopes(&["approval.resolve"]), handler);
    }

    {
        let device_registry = device_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, _params: Value| {
            let device_registry = device_registry.clone();
            Box::pin(async move {
                let devices: Vec<Value> = device_registry
                    .list()
                    .into_iter()
                    .map(|d| json!({ "id": d.id, "label": d.label, "registeredAt": d.registered_at, "lastSeenAt": d.last_seen_at }))
                    .collect();
                Ok(json!(devices))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("device.pair.list", MethodPolicy::new(Role::Operator).with_scopes(&["device.pair.list"]), handler);
    }

    {
        let device_registry = device_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let device_registry = device_registry.clone();
            Box::pin(async move {
                let device_id = params
                    .get("deviceId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `deviceId`"))?;
                let revoked = device_registry.revoke(device_id).map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "revoked": revoked }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("device.token.revoke", MethodPolicy::new(Role::Operator).with_scopes(&["device.token.revoke"]), handler);
    }

    {
        let device_registry = device_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let device_registry = device_registry.clone();
            Box::pin(async move {
                let device_id = params
                    .get("deviceId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `deviceId`"))?;
                let label = params.get("label").and_then(Value::as_str).unwrap_or(device_id);
                let secret = device_registry
                    .approve_pairing(device_id, label)
                    .map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "sharedSecret": secret.map(hex::encode) }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("device.pair.approve", MethodPolicy::new(Role::Operator).with_scopes(&["device.pair.approve"]), handler);
    }

    {
        let device_registry = device_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let device_registry = device_registry.clone();
            Box::pin(async move {
                let device_id = params
                    .get("deviceId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `deviceId`"))?;
                let rejected = device_registry.reject_pairing(device_id).map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "rejected": rejected }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("device.pair.reject", MethodPolicy::new(Role::Operator).with_scopes(&["device.pair.reject"]), handler);
    }

    {
        let device_registry = device_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let device_registry = device_registry.clone();
            Box::pin(async move {
                let device_id = params
                    .get("deviceId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `deviceId`"))?;
                let secret = device_registry
                    .rotate_secret(device_id)
                    .map_err(|e| GatewayError::from_unhandled(&e))?
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("unknown device: {device_id}")))?;
                Ok(json!({ "sharedSecret": hex::encode(secret) }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("device.token.rotate", MethodPolicy::new(Role::Operator).with_scopes(&["device.token.rotate"]), handler);
    }

    {
        let node_registry = node_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, _params: Value| {
            let node_registry = node_registry.clone();
            Box::pin(async move {
                let nodes: Vec<Value> = node_registry
                    .list()
                    .into_iter()
                    .map(|n| {
                        json!({
                            "id": n.id,
                            "label": n.label,
                            "capabilities": n.capabilities,
                            "status": n.status,
                            "registeredAt": n.registered_at,
                            "lastSeenAt": n.last_seen_at,
                        })
                    })
                    .collect();
                Ok(json!(nodes))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("node.list", MethodPolicy::new(Role::Operator).with_scopes(&["node.list"]), handler);
    }

    {
        let node_registry = node_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let node_registry = node_registry.clone();
            Box::pin(async move {
                let node_id = params
                    .get("nodeId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `nodeId`"))?;
                let node = node_registry
                    .get(node_id)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("unknown node: {node_id}")))?;
                Ok(json!({
                    "id": node.id,
                    "label": node.label,
                    "capabilities": node.capabilities,
                    "status": node.status,
                    "registeredAt": node.registered_at,
                    "lastSeenAt": node.last_seen_at,
                }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("node.describe", MethodPolicy::new(Role::Operator).with_scopes(&["node.describe"]), handler);
    }

    {
        let node_registry = node_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let node_registry = node_registry.clone();
            Box::pin(async move {
                let node_id = params
                    .get("nodeId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `nodeId`"))?
                    .to_string();
                let label = params.get("label").and_then(Value::as_str).unwrap_or(&node_id).to_string();
                let capabilities = params.get("capabilities").cloned().unwrap_or(Value::Null);
                let record = node_registry
                    .register(node_id, label, capabilities)
                    .map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "id": record.id }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("node.register", MethodPolicy::new(Role::Operator).with_scopes(&["node.register"]), handler);
    }

    {
        let node_registry = node_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let node_registry = node_registry.clone();
            Box::pin(async move {
                let node_id = params
                    .get("nodeId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `nodeId`"))?;
                let removed = node_registry.unregister(node_id).map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "removed": removed }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("node.unregister", MethodPolicy::new(Role::Operator).with_scopes(&["node.unregister"]), handler);
    }

    {
        let node_registry = node_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let node_registry = node_registry.clone();
            Box::pin(async move {
                let node_id = params
                    .get("nodeId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `nodeId`"))?;
                if let Some(status) = params.get("status").and_then(Value::as_str) {
                    let status = match status {
                        "active" => conduit_node::NodeStatus::Active,
                        "inactive" => conduit_node::NodeStatus::Inactive,
                        "error" => conduit_node::NodeStatus::Error,
                        other => return Err(GatewayError::new(GatewayErrorCode::InvalidRequest, format!("invalid `status`: {other}"))),
                    };
                    let updated = node_registry.set_status(node_id, status).map_err(|e| GatewayError::from_unhandled(&e))?;
                    return Ok(json!({ "updated": updated }));
                }
                let node = node_registry
                    .get(node_id)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("unknown node: {node_id}")))?;
                Ok(json!({ "status": node.status }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("node.status", MethodPolicy::new(Role::Operator).with_scopes(&["node.status"]), handler);
    }

    {
        let node_registry = node_registry.clone();
        let handler: Handler = Arc::new(move |caller: CallerContext, params: Value| {
            let node_registry = node_registry.clone();
            Box::pin(async move {
                // A node's own `connect` binds a session id equal to its node id
                // (see `conduit_gateway::http::ws`); fall back to an explicit
                // `nodeId` param for operator-driven invocations.
                let node_id = params
                    .get("nodeId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(caller.session_id)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `nodeId`"))?;
                let node = node_registry
                    .get(&node_id)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("unknown node: {node_id}")))?;
                if node.status != conduit_node::NodeStatus::Active {
                    return Err(GatewayError::new(GatewayErrorCode::InvalidRequest, format!("node {node_id} is not active")));
                }
                let command = params
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `command`"))?;
                node_registry.touch(&node_id).map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({
                    "nodeId": node_id,
                    "command": command,
                    "status": "queued",
                    "invocationId": uuid::Uuid::new_v4().to_string(),
                }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("node.invoke", MethodPolicy::new(Role::Node), handler);
    }

    {
        let node_registry = node_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let node_registry = node_registry.clone();
            Box::pin(async move {
                let node_id = params
                    .get("nodeId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `nodeId`"))?;
                let label = params.get("label").and_then(Value::as_str).unwrap_or(node_id);
                let token = node_registry
                    .approve_pairing(node_id, label)
                    .map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "token": token }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("node.pair.approve", MethodPolicy::new(Role::Operator).with_scopes(&["node.pair.approve"]), handler);
    }

    {
        let node_registry = node_registry.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let node_registry = node_registry.clone();
            Box::pin(async move {
                let node_id = params
                    .get("nodeId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `nodeId`"))?;
                let rejected = node_registry.reject_pairing(node_id).map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "rejected": rejected }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("node.pair.reject", MethodPolicy::new(Role::Operator).with_scopes(&["node.pair.reject"]), handler);
    }

    {
        let sessions = sessions.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, _params: Value| {
            let sessions = sessions.clone();
            Box::pin(async move {
                let counts = sessions.token_counts().await;
                let keys: Vec<Value> = counts.into_iter().map(|(key, tokens)| json!({ "sessionKey": key, "approxTokens": tokens })).collect();
                Ok(json!(keys))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("sessions.list", MethodPolicy::new(Role::Operator).with_scopes(&["sessions.list"]), handler);
    }

    {
        let sessions = sessions.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let sessions = sessions.clone();
            Box::pin(async move {
                let session_key = params
                    .get("sessionKey")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `sessionKey`"))?;
                let session = sessions
                    .get(session_key)
                    .await
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("unknown session: {session_key}")))?;
                let session = session.lock().await;
                Ok(json!({
                    "sessionKey": session_key,
                    "model": session.model,
                    "messageCount": session.messages().len(),
                    "approxTokens": session.token_count(),
                }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("sessions.preview", MethodPolicy::new(Role::Operator).with_scopes(&["sessions.preview"]), handler);
    }

    {
        let sessions = sessions.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let sessions = sessions.clone();
            Box::pin(async move {
                let session_key = params
                    .get("sessionKey")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `sessionKey`"))?;
                let removed = sessions.remove(session_key).await;
                Ok(json!({ "removed": removed }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("sessions.delete", MethodPolicy::new(Role::Operator).with_scopes(&["sessions.delete"]), handler);
    }

    {
        let sessions = sessions.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let sessions = sessions.clone();
            Box::pin(async move {
                let session_key = params
                    .get("sessionKey")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `sessionKey`"))?;
                let session = sessions
                    .get(session_key)
                    .await
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("unknown session: {session_key}")))?;
                let mut session = session.lock().await;
                session.replace_messages(Vec::new());
                Ok(json!({ "reset": true }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("sessions.reset", MethodPolicy::new(Role::Operator).with_scopes(&["sessions.reset"]), handler);
    }

    {
        let sessions = sessions.clone();
        let agent_loop = agent_loop.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, params: Value| {
            let sessions = sessions.clone();
            let agent_loop = agent_loop.clone();
            Box::pin(async move {
                let session_key = params
                    .get("sessionKey")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, "missing `sessionKey`"))?;
                let session = sessions
                    .get(session_key)
                    .await
                    .ok_or_else(|| GatewayError::new(GatewayErrorCode::InvalidRequest, format!("unknown session: {session_key}")))?;
                let mut session = session.lock().await;
                agent_loop.compact(&mut session).await.map_err(|e| GatewayError::from_unhandled(&e))?;
                Ok(json!({ "compacted": true, "approxTokens": session.token_count() }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("sessions.compact", MethodPolicy::new(Role::Operator).with_scopes(&["sessions.compact"]), handler);
    }

    {
        let active_runs = active_runs.clone();
        let cron_service = cron_service.clone();
        let device_registry = device_registry.clone();
        let sessions = sessions.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, _params: Value| {
            let active_runs = active_runs.clone();
            let cron_service = cron_service.clone();
            let device_registry = device_registry.clone();
            let sessions = sessions.clone();
            Box::pin(async move {
                Ok(json!({
                    "activeRuns": active_runs.len(),
                    "sessionCount": sessions.token_counts().await.len(),
                    "cronJobCount": cron_service.list_jobs().await.len(),
                    "pairedDeviceCount": device_registry.count(),
                }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("gateway.status", MethodPolicy::new(Role::Operator).with_scopes(&["gateway.status"]), handler);
    }

    {
        let sessions = sessions.clone();
        let handler: Handler = Arc::new(move |_caller: CallerContext, _params: Value| {
            let sessions = sessions.clone();
            Box::pin(async move {
                let counts = sessions.token_counts().await;
                let total: usize = counts.iter().map(|(_, n)| n).sum();
                let sessions: Vec<Value> = counts
                    .into_iter()
                    .map(|(key, tokens)| json!({ "sessionKey": key, "approxTokens": tokens }))
                    .collect();
                Ok(json!({ "totalApproxTokens": total, "sessions": sessions }))
            }) as MethodFuture<'static, Result<Value, GatewayError>>
        });
        registry.register("usage.cost", MethodPolicy::new(Role::Operator).with_scopes(&["usage.cost"]), handler);
    }

    registry
}
