// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use conduit_bus::AbortToken;
use futures::{Stream, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;

use crate::{
    catalog::{InputModality, ModelCatalogEntry},
    CompletionRequest, Message, ProviderEvent, ProviderStreamOptions, ResponseEvent,
    ToolCallRequest, Usage,
};

/// Raw, per-delta wire events as parsed straight off the provider's stream.
pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Normalized, batched, cancellable event stream (see [`ProviderEvent`]).
pub type ProviderStream = Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return the raw, per-delta response
    /// stream exactly as the provider's wire format expresses it.
    async fn raw_stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Cancellable, batched completion stream.
    ///
    /// `options.model`, `thinking_mode`, `max_tokens`, `temperature`, and
    /// `enable_search` are bound once at provider-construction time (this
    /// adapter's wire client is built for one configured model); only
    /// `tools`, `system_dynamic_suffix`, and `cache_key` vary per call and
    /// are threaded into the underlying [`CompletionRequest`]. The returned
    /// stream accumulates [`ResponseEvent::ToolCall`] fragments into whole
    /// [`ToolCallRequest`]s, brackets reasoning runs with
    /// `ThinkingStart`/`ThinkingEnd`, and checks `abort` cooperatively
    /// between items.
    async fn stream(
        &self,
        messages: Vec<Message>,
        options: ProviderStreamOptions,
        abort: AbortToken,
    ) -> anyhow::Result<ProviderStream> {
        let req = CompletionRequest {
            messages,
            tools: options.tools,
            stream: true,
            system_dynamic_suffix: options.system_dynamic_suffix,
            cache_key: options.cache_key,
        };
        let inner = self.raw_stream(req).await?;
        Ok(Box::pin(normalize(inner, abort)))
    }

    /// List all models available from this provider.
    ///
    /// The default implementation returns only the static catalog entries for
    /// this provider.  Override to perform a live API query (and then merge
    /// with the catalog for metadata enrichment).
    async fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let provider = self.name();
        let entries = crate::catalog::static_catalog()
            .into_iter()
            .filter(|e| e.provider == provider)
            .collect();
        Ok(entries)
    }

    /// Maximum output tokens for this provider/model combination.
    ///
    /// Reads from the static catalog; returns `None` if the model is unknown.
    fn catalog_max_output_tokens(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.max_output_tokens)
    }

    /// Context window size for this provider/model combination.
    ///
    /// Reads from the static catalog; returns `None` if the model is unknown.
    fn catalog_context_window(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.context_window)
    }

    /// Query the live API for the actual context window in use.
    ///
    /// Default implementation returns `None` (no live probe available).
    /// Override in providers that expose a properties or info endpoint —
    /// e.g. llama.cpp-compatible servers expose `GET /props` which includes
    /// the loaded `n_ctx` value.
    ///
    /// Returns `Some(n_ctx)` when the probe succeeds, `None` otherwise.
    /// A `Some(0)` result is treated as "unknown" by callers.
    async fn probe_context_window(&self) -> Option<u32> {
        None
    }

    /// Input modalities supported by this provider/model combination.
    ///
    /// Reads from the static catalog.  Returns `[Text]` when the model is not
    /// found, to be conservative (avoid sending images to unknown models).
    fn input_modalities(&self) -> Vec<InputModality> {
        crate::catalog::lookup(self.name(), self.model_name())
            .map(|e| e.input_modalities)
            .unwrap_or_else(|| vec![InputModality::Text])
    }

    /// Returns `true` if this model supports image input.
    fn supports_images(&self) -> bool {
        self.input_modalities().contains(&InputModality::Image)
    }
}

// ─── Raw → normalized stream adapter ─────────────────────────────────────────

struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

struct NormState {
    inner: ResponseStream,
    abort: AbortToken,
    in_thinking: bool,
    tool_calls: BTreeMap<u32, PendingToolCall>,
    usage: Option<Usage>,
    queue: VecDeque<ProviderEvent>,
    done: bool,
}

fn merge_usage(prev: Option<Usage>, new: Usage) -> Usage {
    match prev {
        None => new,
        Some(p) => Usage {
            input_tokens: if new.input_tokens > 0 {
                new.input_tokens
            } else {
                p.input_tokens
            },
            output_tokens: if new.output_tokens > 0 {
                new.output_tokens
            } else {
                p.output_tokens
            },
            cache_read_tokens: if new.cache_read_tokens > 0 {
                new.cache_read_tokens
            } else {
                p.cache_read_tokens
            },
            cache_write_tokens: if new.cache_write_tokens > 0 {
                new.cache_write_tokens
            } else {
                p.cache_write_tokens
            },
        },
    }
}

/// Close any open thinking block, flush accumulated tool calls, and emit the
/// terminal `Done` event. Idempotent in the sense that it always marks the
/// state finished; callers must not poll `inner` again afterward.
fn flush_terminal(state: &mut NormState, finish_reason: Option<String>) {
    if state.in_thinking {
        state.queue.push_back(ProviderEvent::ThinkingEnd);
        state.in_thinking = false;
    }
    if !state.tool_calls.is_empty() {
        let calls = std::mem::take(&mut state.tool_calls)
            .into_values()
            .map(|p| {
                let arguments = serde_json::from_str(&p.arguments)
                    .unwrap_or_else(|_| serde_json::Value::String(p.arguments.clone()));
                ToolCallRequest {
                    id: p.id,
                    name: p.name,
                    arguments,
                }
            })
            .collect();
        state.queue.push_back(ProviderEvent::ToolCall(calls));
    }
    state.queue.push_back(ProviderEvent::Done {
        finish_reason,
        usage: state.usage.take(),
    });
    state.done = true;
}

/// Translate a raw, per-delta [`ResponseEvent`] stream into the batched,
/// cancellable [`ProviderEvent`] stream the rest of the system consumes.
fn normalize(inner: ResponseStream, abort: AbortToken) -> impl Stream<Item = ProviderEvent> {
    let state = NormState {
        inner,
        abort,
        in_thinking: false,
        tool_calls: BTreeMap::new(),
        usage: None,
        queue: VecDeque::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(ev) = state.queue.pop_front() {
                return Some((ev, state));
            }
            if state.done {
                return None;
            }
            if state.abort.aborted() {
                let reason = state.abort.reason();
                state
                    .queue
                    .push_back(ProviderEvent::Error(reason.unwrap_or_else(|| "aborted".into())));
                flush_terminal(&mut state, Some("aborted".into()));
                continue;
            }
            match state.inner.next().await {
                None => {
                    // Provider stream ended without its own terminal event.
                    flush_terminal(&mut state, Some("unknown".into()));
                    continue;
                }
                Some(Err(e)) => {
                    state.queue.push_back(ProviderEvent::Error(e.to_string()));
                    continue;
                }
                Some(Ok(ResponseEvent::TextDelta(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    if state.in_thinking {
                        state.queue.push_back(ProviderEvent::ThinkingEnd);
                        state.in_thinking = false;
                    }
                    state.queue.push_back(ProviderEvent::TextDelta(text));
                    continue;
                }
                Some(Ok(ResponseEvent::ThinkingDelta(text))) => {
                    if !state.in_thinking {
                        state.queue.push_back(ProviderEvent::ThinkingStart);
                        state.in_thinking = true;
                    }
                    state.queue.push_back(ProviderEvent::ThinkingDelta(text));
                    continue;
                }
                Some(Ok(ResponseEvent::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                })) => {
                    if state.in_thinking {
                        state.queue.push_back(ProviderEvent::ThinkingEnd);
                        state.in_thinking = false;
                    }
                    let entry = state.tool_calls.entry(index).or_insert_with(|| PendingToolCall {
                        id: String::new(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    if !id.is_empty() {
                        entry.id = id;
                    }
                    if !name.is_empty() {
                        entry.name = name;
                    }
                    entry.arguments.push_str(&arguments);
                    continue;
                }
                Some(Ok(ResponseEvent::Usage {
                    input_tokens,
                    output_tokens,
                    cache_read_tokens,
                    cache_write_tokens,
                })) => {
                    state.usage = Some(merge_usage(
                        state.usage.take(),
                        Usage {
                            input_tokens,
                            output_tokens,
                            cache_read_tokens,
                            cache_write_tokens,
                        },
                    ));
                    continue;
                }
                Some(Ok(ResponseEvent::Done)) => {
                    flush_terminal(&mut state, Some("stop".into()));
                    continue;
                }
                Some(Ok(ResponseEvent::MaxTokens)) => {
                    flush_terminal(&mut state, Some("max_tokens".into()));
                    continue;
                }
                Some(Ok(ResponseEvent::Error(msg))) => {
                    state.queue.push_back(ProviderEvent::Error(msg));
                    continue;
                }
            }
        }
    })
}
