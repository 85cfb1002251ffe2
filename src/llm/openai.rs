//! OpenAI-compatible `/chat/completions` streaming protocol.

use reqwest::header::{AUTHORIZATION, HeaderName};
use serde_json::{Value, json};

use super::protocol::{ProtocolAdapter, StreamEvent, join_url};
use super::types::{ChatRequest, ContentPart, ConversationTurn, MessageContent, Role};

/// Adapter for OpenAI and OpenAI-compatible (custom) endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    fn format_content(content: &MessageContent) -> Value {
        match content {
            MessageContent::Text(text) => Value::String(text.clone()),
            MessageContent::Parts(parts) => Value::Array(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => json!({"type": "text", "text": text}),
                        ContentPart::Image { data_uri } => json!({
                            "type": "image_url",
                            "image_url": {"url": data_uri},
                        }),
                    })
                    .collect(),
            ),
        }
    }

    fn format_turn(turn: &ConversationTurn) -> Value {
        match turn.role {
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": turn.tool_call_id.as_deref().unwrap_or_default(),
                "content": turn.content.as_text(),
            }),
            Role::Assistant if turn.tool_calls.is_some() => {
                let calls: Vec<Value> = turn
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments},
                        })
                    })
                    .collect();
                let text = turn.content.as_text();
                json!({
                    "role": "assistant",
                    "content": if text.is_empty() { Value::Null } else { Value::String(text) },
                    "tool_calls": calls,
                })
            }
            role => json!({
                "role": role.as_str(),
                "content": Self::format_content(&turn.content),
            }),
        }
    }
}

impl ProtocolAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn endpoint(&self, base_url: &str) -> String {
        join_url(base_url, "chat/completions")
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(HeaderName, String)> {
        vec![(AUTHORIZATION, format!("Bearer {}", api_key))]
    }

    fn build_body(&self, request: &ChatRequest, turns: &[ConversationTurn]) -> Value {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(json!({"role": "system", "content": request.system_prompt}));
        messages.extend(turns.iter().map(Self::format_turn));

        let mut body = json!({
            "model": request.model_name,
            "messages": messages,
            "stream": true,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        if !request.tool_definitions.is_empty() {
            let tools: Vec<Value> = request
                .tool_definitions
                .iter()
                .map(|def| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": def.name,
                            "description": def.description,
                            "parameters": def.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }

    fn parse_data(&self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        if data == "[DONE]" {
            return Ok(vec![StreamEvent::Done]);
        }

        let v: Value = serde_json::from_str(data)?;
        if let Some(error) = v.get("error") {
            let message = error["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Ok(vec![StreamEvent::Error(message)]);
        }

        let Some(choice) = v["choices"].get(0) else {
            return Ok(Vec::new());
        };
        let delta = &choice["delta"];
        let mut events = Vec::new();

        if let Some(text) = delta["content"].as_str().filter(|t| !t.is_empty()) {
            events.push(StreamEvent::TextDelta(text.to_string()));
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];
                events.push(StreamEvent::ToolCallDelta {
                    index: call["index"].as_u64().unwrap_or(0) as usize,
                    id: call["id"].as_str().map(str::to_string),
                    name: function["name"].as_str().map(str::to_string),
                    arguments: function["arguments"].as_str().unwrap_or_default().to_string(),
                });
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            events.push(StreamEvent::Finished {
                reason: Some(reason.to_string()),
            });
        }
        Ok(events)
    }
}
