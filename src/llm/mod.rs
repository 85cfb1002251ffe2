//! Chat completion against upstream model providers.
//!
//! Supports two wire protocols:
//! - **openai-style**: `POST {base}/chat/completions`, bearer auth
//! - **anthropic-style**: `POST {base}/messages`, `x-api-key` auth
//!
//! Each protocol is a [`ProtocolAdapter`] picked once per request by
//! [`adapter_for`]. The [`ChatOrchestrator`] drives the streaming request,
//! decodes deltas and runs the bounded tool loop.

mod anthropic;
pub mod connection;
mod openai;
pub mod orchestrator;
pub mod protocol;
pub mod sse;
pub mod tool_calls;
pub mod types;

pub use anthropic::AnthropicAdapter;
pub use connection::{ConnectionStatus, test_connection};
pub use openai::OpenAiAdapter;
pub use orchestrator::{ChatHandle, ChatOrchestrator, ChatOutcome, ChatState, ChatStatus};
pub use protocol::{ProtocolAdapter, StreamEvent};
pub use sse::StreamDecoder;
pub use types::{
    ChatRequest, ContentPart, ConversationTurn, MessageContent, Role, ToolCall, ToolDefinition,
};

use serde::{Deserialize, Serialize};

/// Upstream wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    #[serde(rename = "openai-style")]
    OpenAi,
    #[serde(rename = "anthropic-style")]
    Anthropic,
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolKind::OpenAi => write!(f, "openai-style"),
            ProtocolKind::Anthropic => write!(f, "anthropic-style"),
        }
    }
}

/// Adapter for `protocol`.
pub fn adapter_for(protocol: ProtocolKind) -> Box<dyn ProtocolAdapter> {
    match protocol {
        ProtocolKind::OpenAi => Box::new(OpenAiAdapter),
        ProtocolKind::Anthropic => Box::new(AnthropicAdapter),
    }
}
