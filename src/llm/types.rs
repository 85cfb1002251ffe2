//! Provider-agnostic conversation model.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::ConfigError;

use super::ProtocolKind;

/// `data:<mime>;base64,<payload>`
static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:([A-Za-z0-9!#$&^_.+-]+/[A-Za-z0-9!#$&^_.+-]+);base64,([A-Za-z0-9+/=\s]+)$")
        .expect("data URI pattern is valid")
});

/// Split a base64 data URI into `(media_type, payload)`.
pub fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let caps = DATA_URI.captures(uri.trim())?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One part of a mixed text+image message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Image passed through opaquely as a data URI.
    Image { data_uri: String },
}

/// Message body: plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Text followed by an attached image.
    pub fn with_image(text: impl Into<String>, data_uri: impl Into<String>) -> Self {
        MessageContent::Parts(vec![
            ContentPart::Text { text: text.into() },
            ContentPart::Image {
                data_uri: data_uri.into(),
            },
        ])
    }

    /// Concatenated text parts; images are dropped.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

/// A completed tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text as streamed by the provider.
    pub arguments: String,
}

impl ToolCall {
    /// Arguments parsed as JSON; an empty or malformed buffer becomes `{}`.
    pub fn parsed_arguments(&self) -> serde_json::Value {
        if self.arguments.trim().is_empty() {
            return serde_json::json!({});
        }
        serde_json::from_str(&self.arguments).unwrap_or_else(|e| {
            tracing::warn!(tool = %self.name, error = %e, "Tool arguments are not valid JSON");
            serde_json::json!({})
        })
    }
}

/// Tool catalogue entry sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ConversationTurn {
    fn plain(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, MessageContent::Text(content.into()))
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, MessageContent::Text(content.into()))
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::assistant(content)
        }
    }

    /// Result of a tool call, fed back to the model.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, MessageContent::Text(content.into()))
        }
    }
}

/// A conversation-completion request against one upstream protocol.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub protocol: ProtocolKind,
    pub base_url: String,
    pub api_key: SecretString,
    pub model_name: String,
    pub custom_headers: HashMap<String, String>,
    pub system_prompt: String,
    pub history: Vec<ConversationTurn>,
    pub new_user_content: MessageContent,
    pub tool_definitions: Vec<ToolDefinition>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    pub fn new(
        protocol: ProtocolKind,
        base_url: impl Into<String>,
        api_key: SecretString,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            base_url: base_url.into(),
            api_key,
            model_name: model_name.into(),
            custom_headers: HashMap::new(),
            system_prompt: String::new(),
            history: Vec::new(),
            new_user_content: MessageContent::Text(String::new()),
            tool_definitions: Vec::new(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    /// Start a request from the user's provider settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut request = Self::new(
            settings.provider.protocol(),
            settings.effective_base_url()?,
            settings.api_key.clone(),
            settings.effective_model(),
        );
        request.custom_headers = settings.custom_headers.clone();
        request.temperature = settings.temperature;
        request.max_tokens = settings.max_tokens;
        Ok(request)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_user_content(mut self, content: impl Into<MessageContent>) -> Self {
        self.new_user_content = content.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tool_definitions = tools;
        self
    }

    /// Pre-flight checks; nothing is sent when these fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "apiKey".to_string(),
                hint: "Set an API key for the selected provider.".to_string(),
            });
        }
        if HeaderValue::from_str(self.api_key.expose_secret()).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "apiKey".to_string(),
                message: "contains characters not allowed in an HTTP header (stray newline?)".to_string(),
            });
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "baseUrl".to_string(),
                hint: "Set the provider base URL.".to_string(),
            });
        }
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "modelName".to_string(),
                hint: "Choose a model.".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_parsing() {
        assert_eq!(
            parse_data_uri("data:image/png;base64,iVBORw0KGgo="),
            Some(("image/png", "iVBORw0KGgo="))
        );
        assert_eq!(parse_data_uri("https://example.com/a.png"), None);
        assert_eq!(parse_data_uri("data:image/png,rawbytes"), None);
        assert_eq!(parse_data_uri("data:;base64,AAAA"), None);
    }

    #[test]
    fn parts_text_skips_images() {
        let content = MessageContent::with_image("what is this?", "data:image/png;base64,AAAA");
        assert_eq!(content.as_text(), "what is this?");
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        let call = ToolCall {
            id: "1".into(),
            name: "x".into(),
            arguments: "{\"q\": ".into(),
        };
        assert_eq!(call.parsed_arguments(), serde_json::json!({}));

        let call = ToolCall {
            arguments: "{\"q\": \"rust\"}".into(),
            ..call
        };
        assert_eq!(call.parsed_arguments()["q"], "rust");
    }

    #[test]
    fn validate_rejects_missing_key() {
        let request = ChatRequest::new(
            ProtocolKind::OpenAi,
            "https://api.openai.com/v1",
            SecretString::from(String::new()),
            "gpt-4o",
        );
        assert!(matches!(
            request.validate(),
            Err(ConfigError::MissingRequired { key, .. }) if key == "apiKey"
        ));
    }

    #[test]
    fn validate_rejects_key_unusable_as_header() {
        let request = ChatRequest::new(
            ProtocolKind::Anthropic,
            "https://api.anthropic.com/v1",
            SecretString::from("sk-test\n".to_string()),
            "claude",
        );
        assert!(matches!(
            request.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "apiKey"
        ));
    }

    #[test]
    fn request_from_custom_settings_needs_base_url() {
        let settings = Settings {
            provider: crate::config::Provider::Custom,
            api_key: SecretString::from("k".to_string()),
            ..Settings::default()
        };
        assert!(ChatRequest::from_settings(&settings).is_err());
    }
}
