//! Scripted mock upstream shared by the integration tests.
//!
//! Serves both `/v1/chat/completions` and `/v1/messages` on a random port and
//! answers each request with the next scripted reply (the last one repeats).

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub enum Reply {
    /// Complete SSE body.
    Sse(String),
    /// Bare status code with a JSON error body.
    Status(StatusCode),
    /// Send this SSE text, then keep the connection open forever.
    Hang(String),
}

#[derive(Default)]
pub struct Upstream {
    replies: Vec<Reply>,
    hits: AtomicUsize,
    requests: Mutex<Vec<(HeaderMap, Value)>>,
}

impl Upstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Body of the `n`th request (0-based).
    pub fn body(&self, n: usize) -> Value {
        self.requests.lock().unwrap()[n].1.clone()
    }

    pub fn headers(&self, n: usize) -> HeaderMap {
        self.requests.lock().unwrap()[n].0.clone()
    }
}

async fn completion(State(up): State<Arc<Upstream>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let n = up.hits.fetch_add(1, Ordering::SeqCst);
    up.requests.lock().unwrap().push((headers, body));
    let reply = up.replies[n.min(up.replies.len() - 1)].clone();

    match reply {
        Reply::Sse(text) => ([(header::CONTENT_TYPE, "text/event-stream")], text).into_response(),
        Reply::Status(code) => (code, Json(json!({"error": {"message": "rejected"}}))).into_response(),
        Reply::Hang(first) => {
            let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(first)) })
                .chain(futures::stream::pending());
            ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(stream)).into_response()
        }
    }
}

async fn models(State(up): State<Arc<Upstream>>, headers: HeaderMap) -> Response {
    let n = up.hits.fetch_add(1, Ordering::SeqCst);
    up.requests.lock().unwrap().push((headers, Value::Null));
    match up.replies[n.min(up.replies.len() - 1)].clone() {
        Reply::Status(code) => code.into_response(),
        _ => Json(json!({"data": [{"id": "gpt-test"}]})).into_response(),
    }
}

/// Start a mock provider; returns its base URL (`http://127.0.0.1:<port>/v1`).
pub async fn start_upstream(replies: Vec<Reply>) -> (String, Arc<Upstream>) {
    let upstream = Arc::new(Upstream {
        replies,
        ..Default::default()
    });
    let app = Router::new()
        .route("/v1/chat/completions", post(completion))
        .route("/v1/messages", post(completion))
        .route("/v1/models", get(models))
        .with_state(Arc::clone(&upstream));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}/v1"), upstream)
}

fn sse(events: impl IntoIterator<Item = Value>) -> String {
    events
        .into_iter()
        .map(|e| format!("data: {}\n\n", e))
        .collect::<String>()
}

/// OpenAI-style stream emitting `chunks` as content deltas.
pub fn openai_text(chunks: &[&str]) -> String {
    let mut body = sse(chunks
        .iter()
        .map(|c| json!({"choices": [{"index": 0, "delta": {"content": c}, "finish_reason": null}]})));
    body.push_str(&sse([json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]})]));
    body.push_str("data: [DONE]\n\n");
    body
}

/// OpenAI-style stream requesting one tool call, arguments split in fragments.
pub fn openai_tool_call(id: &str, name: &str, argument_fragments: &[&str]) -> String {
    let mut events = vec![json!({"choices": [{"index": 0, "delta": {"tool_calls": [
        {"index": 0, "id": id, "type": "function", "function": {"name": name, "arguments": ""}}
    ]}}]})];
    events.extend(argument_fragments.iter().map(|fragment| {
        json!({"choices": [{"index": 0, "delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": fragment}}
        ]}}]})
    }));
    events.push(json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}));
    let mut body = sse(events);
    body.push_str("data: [DONE]\n\n");
    body
}

/// Anthropic-style stream emitting `chunks` as text deltas.
pub fn anthropic_text(chunks: &[&str]) -> String {
    let mut events = vec![
        json!({"type": "message_start", "message": {"id": "msg_1", "role": "assistant"}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "ping"}),
    ];
    events.extend(chunks.iter().map(|c| {
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": c}})
    }));
    events.push(json!({"type": "content_block_stop", "index": 0}));
    events.push(json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}));
    events.push(json!({"type": "message_stop"}));
    sse(events)
}

/// Anthropic-style stream with a short text block followed by a tool_use block.
pub fn anthropic_tool_use(id: &str, name: &str, argument_fragments: &[&str]) -> String {
    let mut events = vec![
        json!({"type": "message_start", "message": {"id": "msg_1", "role": "assistant"}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Checking."}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}}),
    ];
    events.extend(argument_fragments.iter().map(|fragment| {
        json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": fragment}})
    }));
    events.push(json!({"type": "content_block_stop", "index": 1}));
    events.push(json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}));
    events.push(json!({"type": "message_stop"}));
    sse(events)
}
