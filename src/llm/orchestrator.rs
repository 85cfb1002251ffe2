//! Streaming chat orchestration with a bounded tool loop.
//!
//! One user turn may take several upstream requests: whenever the model asks
//! for tools, they are invoked sequentially through the [`SkillRegistry`], the
//! results are appended as tool turns and generation continues. The loop is
//! bounded by [`OrchestratorConfig::max_tool_iterations`] upstream requests.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use reqwest::header::HeaderMap;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{ConfigError, LlmError};
use crate::skills::SkillRegistry;

use super::adapter_for;
use super::protocol::ProtocolAdapter;
use super::sse::{DecodedRound, StreamDecoder};
use super::types::{ChatRequest, ConversationTurn, ToolCall};

/// Separator between text produced by consecutive upstream requests.
const ROUND_SEPARATOR: &str = "\n\n";

/// Terminal status of a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStatus {
    Completed,
    /// Human-readable reason, suitable for display.
    Failed(String),
    Cancelled,
}

/// Result of one user turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub status: ChatStatus,
    /// Everything streamed so far. Kept on failure and cancellation.
    pub text: String,
    /// Assistant and tool turns produced by this request, in order.
    pub turns: Vec<ConversationTurn>,
}

impl ChatOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == ChatStatus::Completed
    }
}

/// Observable state of a request started with [`ChatOrchestrator::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    Streaming(String),
    Completed(String),
    Failed { reason: String, text: String },
    Cancelled(String),
}

impl ChatState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChatState::Idle | ChatState::Streaming(_))
    }
}

impl From<&ChatOutcome> for ChatState {
    fn from(outcome: &ChatOutcome) -> Self {
        let text = outcome.text.clone();
        match &outcome.status {
            ChatStatus::Completed => ChatState::Completed(text),
            ChatStatus::Failed(reason) => ChatState::Failed {
                reason: reason.clone(),
                text,
            },
            ChatStatus::Cancelled => ChatState::Cancelled(text),
        }
    }
}

enum RoundError {
    Cancelled,
    Failed(LlmError),
}

impl From<LlmError> for RoundError {
    fn from(e: LlmError) -> Self {
        RoundError::Failed(e)
    }
}

/// Drives chat requests against the configured provider.
pub struct ChatOrchestrator {
    client: reqwest::Client,
    skills: Arc<SkillRegistry>,
    config: OrchestratorConfig,
    active: Mutex<Option<CancellationToken>>,
}

impl ChatOrchestrator {
    pub fn new(client: reqwest::Client, skills: Arc<SkillRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            client,
            skills,
            config,
            active: Mutex::new(None),
        }
    }

    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    /// Cancel the in-flight request (if any) and hand out a token for a new one.
    pub fn begin_request(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            if !previous.is_cancelled() {
                debug!("Cancelling previous chat request");
            }
            previous.cancel();
        }
        token
    }

    /// Cancel whatever request is currently active.
    pub fn cancel_active(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = active {
            token.cancel();
        }
    }

    /// Start `request` in the background, cancelling any request still running.
    pub fn send(self: &Arc<Self>, request: ChatRequest) -> Result<ChatHandle, ConfigError> {
        request.validate()?;
        let cancel = self.begin_request();
        let (tx, rx) = watch::channel(ChatState::Idle);

        let this = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let result = this
                .run(&request, &token, |text| {
                    tx.send_replace(ChatState::Streaming(text.to_string()));
                })
                .await;
            let outcome = result.unwrap_or_else(|e| ChatOutcome {
                status: ChatStatus::Failed(e.to_string()),
                text: String::new(),
                turns: Vec::new(),
            });
            tx.send_replace(ChatState::from(&outcome));
            outcome
        });

        Ok(ChatHandle {
            state: rx,
            cancel,
            task,
        })
    }

    /// Run one user turn to a terminal state.
    ///
    /// `on_delta` receives the full accumulated text after every decoded
    /// delta. Configuration problems are rejected before any network call;
    /// everything after that is reported through [`ChatOutcome::status`].
    pub async fn run<F>(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        mut on_delta: F,
    ) -> Result<ChatOutcome, ConfigError>
    where
        F: FnMut(&str) + Send,
    {
        request.validate()?;

        let adapter = adapter_for(request.protocol);
        let endpoint = adapter.endpoint(&request.base_url);
        let headers = adapter.headers(request.api_key.expose_secret(), &request.custom_headers);
        let max_iterations = self.config.max_tool_iterations.max(1);

        let mut conversation = request.history.clone();
        conversation.push(ConversationTurn::user(request.new_user_content.clone()));
        let first_new_turn = conversation.len();
        let mut text = String::new();

        info!(
            provider = adapter.name(),
            model = %request.model_name,
            tools = request.tool_definitions.len(),
            "Starting chat request"
        );

        let finish = |status: ChatStatus, text: String, conversation: Vec<ConversationTurn>| {
            if let ChatStatus::Failed(reason) = &status {
                warn!(reason = %reason, "Chat request failed");
            }
            ChatOutcome {
                status,
                text,
                turns: conversation.into_iter().skip(first_new_turn).collect(),
            }
        };

        for iteration in 1..=max_iterations {
            debug!(iteration, "Upstream request");
            let body = adapter.build_body(request, &conversation);

            let round = match self
                .stream_round(adapter.as_ref(), &endpoint, &headers, &body, cancel, &mut text, &mut on_delta)
                .await
            {
                Ok(round) => round,
                Err(RoundError::Cancelled) => return Ok(finish(ChatStatus::Cancelled, text, conversation)),
                Err(RoundError::Failed(e)) => {
                    return Ok(finish(ChatStatus::Failed(e.to_string()), text, conversation));
                }
            };

            if let Some(message) = round.error {
                if !round.text.is_empty() {
                    conversation.push(ConversationTurn::assistant(round.text));
                }
                let reason = LlmError::Provider(message).to_string();
                return Ok(finish(ChatStatus::Failed(reason), text, conversation));
            }

            if round.tool_calls.is_empty() {
                if !round.text.is_empty() {
                    conversation.push(ConversationTurn::assistant(round.text));
                }
                debug!(finish_reason = ?round.finish_reason, "Chat request completed");
                return Ok(finish(ChatStatus::Completed, text, conversation));
            }

            let DecodedRound {
                text: round_text,
                tool_calls,
                ..
            } = round;
            conversation.push(ConversationTurn::assistant_with_tools(round_text, tool_calls.clone()));

            if iteration == max_iterations {
                break;
            }

            for call in &tool_calls {
                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        return Ok(finish(ChatStatus::Cancelled, text, conversation));
                    }
                    result = self.invoke_tool(call) => result,
                };
                conversation.push(ConversationTurn::tool_result(call.id.clone(), result));
            }
        }

        let reason = LlmError::ToolLoopExceeded { max: max_iterations }.to_string();
        Ok(finish(ChatStatus::Failed(reason), text, conversation))
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_round<F>(
        &self,
        adapter: &dyn ProtocolAdapter,
        endpoint: &str,
        headers: &HeaderMap,
        body: &Value,
        cancel: &CancellationToken,
        text: &mut String,
        on_delta: &mut F,
    ) -> Result<DecodedRound, RoundError>
    where
        F: FnMut(&str) + Send,
    {
        let provider = adapter.name().to_string();
        let send = self
            .client
            .post(endpoint)
            .headers(headers.clone())
            .json(body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RoundError::Cancelled),
            result = tokio::time::timeout(self.config.request_timeout, send) => match result {
                Err(_) => {
                    return Err(LlmError::Timeout {
                        provider,
                        timeout: self.config.request_timeout,
                    }
                    .into());
                }
                Ok(Err(e)) => {
                    return Err(LlmError::RequestFailed {
                        provider,
                        reason: e.to_string(),
                    }
                    .into());
                }
                Ok(Ok(response)) => response,
            },
        };

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::HttpStatus {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown Status").to_string(),
            }
            .into());
        }

        let mut stream = response.bytes_stream();
        let mut decoder = StreamDecoder::new(adapter);
        let mut round_started = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RoundError::Cancelled),
                next = stream.next() => next,
            };

            let (deltas, ended) = match next {
                Some(Ok(chunk)) => (decoder.feed(&chunk), false),
                Some(Err(e)) => return Err(LlmError::Stream(e.to_string()).into()),
                None => (decoder.finish(), true),
            };

            for delta in deltas {
                if cancel.is_cancelled() {
                    return Err(RoundError::Cancelled);
                }
                if !round_started {
                    round_started = true;
                    if !text.is_empty() {
                        text.push_str(ROUND_SEPARATOR);
                    }
                }
                text.push_str(&delta);
                on_delta(text.as_str());
            }

            if ended || decoder.is_terminated() {
                break;
            }
        }

        Ok(decoder.into_round())
    }

    /// Invoke one tool; any failure becomes a `{success: false, error}` result.
    async fn invoke_tool(&self, call: &ToolCall) -> String {
        info!(tool = %call.name, call_id = %call.id, "Invoking tool");
        let result = match self.skills.invoke(&call.name, call.parsed_arguments()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool invocation failed");
                json!({"success": false, "error": e.to_string()})
            }
        };
        match result {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

/// Handle to a request started with [`ChatOrchestrator::send`].
pub struct ChatHandle {
    state: watch::Receiver<ChatState>,
    cancel: CancellationToken,
    task: JoinHandle<ChatOutcome>,
}

impl ChatHandle {
    /// Latest state snapshot.
    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.clone()
    }

    /// State snapshots as a stream. Intermediate snapshots may be skipped
    /// under backpressure; the terminal state is always delivered last.
    pub fn states(&self) -> WatchStream<ChatState> {
        WatchStream::new(self.state.clone())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(self) -> ChatOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let text = match &*self.state.borrow() {
                    ChatState::Streaming(text) => text.clone(),
                    _ => String::new(),
                };
                ChatOutcome {
                    status: ChatStatus::Failed(format!("chat task aborted: {}", e)),
                    text,
                    turns: Vec::new(),
                }
            }
        }
    }
}
