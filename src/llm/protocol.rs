//! The seam between the orchestrator and a concrete upstream wire protocol.

use std::collections::HashMap;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::warn;

use super::types::{ChatRequest, ConversationTurn};

/// A decoded event from one SSE data line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Generated text.
    TextDelta(String),
    /// A fragment of tool call `index`. Any field may be absent in a given chunk.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// The content block at `index` is complete.
    BlockEnd { index: usize },
    /// The model finished generating (all open tool calls are complete).
    Finished { reason: Option<String> },
    /// End-of-stream sentinel.
    Done,
    /// The provider reported an error inside the stream.
    Error(String),
}

/// Translates the uniform request model to and from one wire protocol.
pub trait ProtocolAdapter: Send + Sync {
    /// Short provider label for logs and errors.
    fn name(&self) -> &'static str;

    /// Completion endpoint under `base_url`.
    fn endpoint(&self, base_url: &str) -> String;

    /// Auth header(s) mandated by the protocol, as `(name, value)`.
    fn auth_headers(&self, api_key: &str) -> Vec<(HeaderName, String)>;

    /// Full request body for `turns` (history, new user turn and any tool rounds).
    fn build_body(&self, request: &ChatRequest, turns: &[ConversationTurn]) -> Value;

    /// Decode the payload of one `data:` line.
    fn parse_data(&self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error>;

    /// Request headers: custom headers first, then content type and the
    /// protocol's auth headers, which custom headers can never override.
    fn headers(&self, api_key: &str, custom: &HashMap<String, String>) -> HeaderMap {
        let auth = self.auth_headers(api_key);
        let mut headers = HeaderMap::new();

        for (name, value) in custom {
            let Ok(name) = HeaderName::from_bytes(name.trim().as_bytes()) else {
                warn!(header = %name, "Skipping invalid custom header name");
                continue;
            };
            if auth.iter().any(|(reserved, _)| *reserved == name) {
                continue;
            }
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => warn!(header = %name, "Skipping invalid custom header value"),
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in auth {
            match HeaderValue::from_str(&value) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(name, value);
                }
                Err(_) => warn!(header = %name, "API key contains characters not allowed in a header"),
            }
        }
        headers
    }
}

/// Join `base_url` and `path` with exactly one slash.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
