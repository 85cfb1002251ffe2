//! Anthropic `/messages` streaming protocol.

use reqwest::header::HeaderName;
use serde_json::{Value, json};
use tracing::warn;

use super::protocol::{ProtocolAdapter, StreamEvent, join_url};
use super::types::{ChatRequest, ContentPart, ConversationTurn, MessageContent, Role, parse_data_uri};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic Messages API.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    fn format_content(content: &MessageContent) -> Value {
        let parts = match content {
            MessageContent::Text(text) => return Value::String(text.clone()),
            MessageContent::Parts(parts) => parts,
        };

        let blocks: Vec<Value> = parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentPart::Image { data_uri } => match parse_data_uri(data_uri) {
                    Some((media_type, data)) => Some(json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    })),
                    None => {
                        warn!("Omitting image that is not a base64 data URI");
                        None
                    }
                },
            })
            .collect();
        Value::Array(blocks)
    }

    /// Messages array; system turns are dropped and consecutive tool results
    /// are merged into one user message.
    fn format_messages(turns: &[ConversationTurn]) -> Vec<Value> {
        let mut messages: Vec<Value> = Vec::with_capacity(turns.len());

        for turn in turns {
            match turn.role {
                Role::System => continue,
                Role::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": turn.tool_call_id.as_deref().unwrap_or_default(),
                        "content": turn.content.as_text(),
                    });
                    let merged = messages
                        .last_mut()
                        .filter(|last| last["role"] == "user")
                        .and_then(|last| last["content"].as_array_mut())
                        .filter(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"));
                    match merged {
                        Some(blocks) => blocks.push(block),
                        None => messages.push(json!({"role": "user", "content": [block]})),
                    }
                }
                Role::Assistant if turn.tool_calls.is_some() => {
                    let mut blocks = Vec::new();
                    let text = turn.content.as_text();
                    if !text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text}));
                    }
                    for call in turn.tool_calls.iter().flatten() {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.parsed_arguments(),
                        }));
                    }
                    messages.push(json!({"role": "assistant", "content": blocks}));
                }
                role => messages.push(json!({
                    "role": role.as_str(),
                    "content": Self::format_content(&turn.content),
                })),
            }
        }
        messages
    }
}

impl ProtocolAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn endpoint(&self, base_url: &str) -> String {
        join_url(base_url, "messages")
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(HeaderName, String)> {
        vec![
            (HeaderName::from_static("x-api-key"), api_key.to_string()),
            (
                HeaderName::from_static("anthropic-version"),
                ANTHROPIC_VERSION.to_string(),
            ),
        ]
    }

    fn build_body(&self, request: &ChatRequest, turns: &[ConversationTurn]) -> Value {
        let mut body = json!({
            "model": request.model_name,
            "system": request.system_prompt,
            "messages": Self::format_messages(turns),
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
                        "name": def.name,
                        "description": def.description,
                        "input_schema": def.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }

    fn parse_data(&self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let v: Value = serde_json::from_str(data)?;
        let index = v["index"].as_u64().unwrap_or(0) as usize;

        let event = match v["type"].as_str().unwrap_or_default() {
            "content_block_delta" => {
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => delta["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| StreamEvent::TextDelta(t.to_string())),
                    "input_json_delta" => Some(StreamEvent::ToolCallDelta {
                        index,
                        id: None,
                        name: None,
                        arguments: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                    }),
                    _ => None,
                }
            }
            "content_block_start" => {
                let block = &v["content_block"];
                (block["type"] == "tool_use").then(|| StreamEvent::ToolCallDelta {
                    index,
                    id: block["id"].as_str().map(str::to_string),
                    name: block["name"].as_str().map(str::to_string),
                    arguments: String::new(),
                })
            }
            "content_block_stop" => Some(StreamEvent::BlockEnd { index }),
            "message_delta" => Some(StreamEvent::Finished {
                reason: v["delta"]["stop_reason"].as_str().map(str::to_string),
            }),
            "message_stop" => Some(StreamEvent::Done),
            "error" => Some(StreamEvent::Error(
                v["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| v["error"].to_string()),
            )),
            // message_start, ping and unknown event types
            _ => None,
        };
        Ok(event.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::SecretString;

    use super::*;
    use crate::llm::ProtocolKind;
    use crate::llm::types::{ToolCall, ToolDefinition};

    fn request() -> ChatRequest {
        ChatRequest::new(
            ProtocolKind::Anthropic,
            "https://api.anthropic.com/v1",
            SecretString::from("sk-ant".to_string()),
            "claude-3-5-sonnet-latest",
        )
        .with_system_prompt("be brief")
    }

    #[test]
    fn system_is_top_level() {
        let adapter = AnthropicAdapter;
        assert_eq!(
            adapter.endpoint("https://api.anthropic.com/v1"),
            "https://api.anthropic.com/v1/messages"
        );

        let turns = [
            ConversationTurn::system("stale system turn"),
            ConversationTurn::user("hi"),
        ];
        let body = adapter.build_body(&request(), &turns);
        assert_eq!(body["system"], "be brief");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages.iter().all(|m| m["role"] != "system"));
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn image_data_uri_split_or_omitted() {
        let adapter = AnthropicAdapter;
        let turns = [ConversationTurn::user(MessageContent::with_image(
            "look",
            "data:image/jpeg;base64,/9j/AAA=",
        ))];
        let body = adapter.build_body(&request(), &turns);
        let image = &body["messages"][0]["content"][1];
        assert_eq!(image["type"], "image");
        assert_eq!(image["source"]["type"], "base64");
        assert_eq!(image["source"]["media_type"], "image/jpeg");
        assert_eq!(image["source"]["data"], "/9j/AAA=");

        let turns = [ConversationTurn::user(MessageContent::with_image(
            "look",
            "https://example.com/cat.png",
        ))];
        let body = adapter.build_body(&request(), &turns);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
    }

    #[test]
    fn tool_rounds_render_as_blocks() {
        let adapter = AnthropicAdapter;
        let calls = vec![
            ToolCall {
                id: "toolu_1".into(),
                name: "a".into(),
                arguments: "{\"x\":1}".into(),
            },
            ToolCall {
                id: "toolu_2".into(),
                name: "b".into(),
                arguments: String::new(),
            },
        ];
        let turns = [
            ConversationTurn::user("q"),
            ConversationTurn::assistant_with_tools("checking", calls),
            ConversationTurn::tool_result("toolu_1", "one"),
            ConversationTurn::tool_result("toolu_2", "two"),
        ];
        let req = request().with_tools(vec![ToolDefinition {
            name: "a".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        }]);
        let body = adapter.build_body(&req, &turns);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["input"]["x"], 1);
        assert_eq!(messages[1]["content"][2]["input"], json!({}));
        let results = messages[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["tool_use_id"], "toolu_2");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn headers_use_api_key_and_version() {
        let custom = HashMap::from([("X-API-KEY".to_string(), "other".to_string())]);
        let headers = AnthropicAdapter.headers("sk-ant", &custom);
        assert_eq!(headers["x-api-key"], "sk-ant");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
        assert!(headers.get("authorization").is_none());
    }

    #[test]
    fn parse_events() {
        let adapter = AnthropicAdapter;
        assert!(
            adapter
                .parse_data(r#"{"type":"message_start","message":{"id":"m"}}"#)
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            adapter
                .parse_data(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#)
                .unwrap(),
            vec![StreamEvent::TextDelta("Hi".into())]
        );
        assert_eq!(
            adapter
                .parse_data(r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"t","input":{}}}"#)
                .unwrap(),
            vec![StreamEvent::ToolCallDelta {
                index: 1,
                id: Some("toolu_1".into()),
                name: Some("t".into()),
                arguments: String::new(),
            }]
        );
        assert_eq!(
            adapter
                .parse_data(r#"{"type":"content_block_stop","index":1}"#)
                .unwrap(),
            vec![StreamEvent::BlockEnd { index: 1 }]
        );
        assert_eq!(
            adapter
                .parse_data(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
                .unwrap(),
            vec![StreamEvent::Error("Overloaded".into())]
        );
        assert_eq!(
            adapter.parse_data(r#"{"type":"message_stop"}"#).unwrap(),
            vec![StreamEvent::Done]
        );
    }
}
