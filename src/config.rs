//! Configuration types.
//!
//! `Settings` is the user configuration persisted under the `settings` storage
//! key. The remaining structs tune the core services and are built in code.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, StorageError};
use crate::llm::ProtocolKind;
use crate::store::{Storage, keys};

/// Default system prompt for the reading assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a reading assistant embedded in the user's browser. \
Answer questions about the page they are reading, explain difficult passages, \
and connect ideas with pages they visited earlier when that context is provided. \
Be concise and cite the page title when you draw on earlier context.";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Which upstream provider the user selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Anthropic,
    /// Any OpenAI-compatible endpoint. Requires an explicit base URL.
    Custom,
}

impl Provider {
    pub fn protocol(self) -> ProtocolKind {
        match self {
            Provider::OpenAi | Provider::Custom => ProtocolKind::OpenAi,
            Provider::Anthropic => ProtocolKind::Anthropic,
        }
    }

    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some(DEFAULT_OPENAI_BASE_URL),
            Provider::Anthropic => Some(DEFAULT_ANTHROPIC_BASE_URL),
            Provider::Custom => None,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi | Provider::Custom => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-5-sonnet-latest",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "custom" => Ok(Provider::Custom),
            other => Err(ConfigError::InvalidValue {
                key: "provider".to_string(),
                message: format!("unknown provider '{}'", other),
            }),
        }
    }
}

/// A saved prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub template: String,
}

/// A tool exposed by a remote tool source, as last fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

pub(crate) fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A user-configured remote tool source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSource {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tools: Vec<RemoteToolSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// Serde bridge for the API key: plain string on the wire, secret in memory.
mod secret_string {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(secret: &SecretString, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(secret.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SecretString, D::Error> {
        String::deserialize(d).map(SecretString::from)
    }
}

/// User configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub provider: Provider,
    #[serde(with = "secret_string")]
    pub api_key: SecretString,
    /// Empty means "use the provider's default".
    pub base_url: String,
    /// Empty means "use the provider's default".
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// How many visited pages the context memory keeps (0 disables it).
    pub context_limit: usize,
    pub system_prompt: String,
    pub prompts: Vec<PromptTemplate>,
    pub custom_headers: HashMap<String, String>,
    pub remote_sources: Vec<RemoteSource>,
    pub language: String,
    pub theme: String,
    pub tool_shortcuts: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            api_key: SecretString::from(String::new()),
            base_url: String::new(),
            model_name: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
            context_limit: 5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            prompts: Vec::new(),
            custom_headers: HashMap::new(),
            remote_sources: Vec::new(),
            language: "en".to_string(),
            theme: "system".to_string(),
            tool_shortcuts: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from storage. A missing or unreadable entry yields defaults.
    pub async fn load(storage: &Storage) -> Self {
        match storage.get_json::<Settings>(keys::SETTINGS).await {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!("No stored settings, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                Self::default()
            }
        }
    }

    /// Persist settings. The API key is written in clear text; the storage
    /// namespace is local to the install.
    pub async fn save(&self, storage: &Storage) -> Result<(), StorageError> {
        storage.set_json(keys::SETTINGS, self).await
    }

    /// Overlay values from `READING_ASSIST_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(provider) = std::env::var("READING_ASSIST_PROVIDER") {
            self.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("READING_ASSIST_API_KEY") {
            self.api_key = SecretString::from(key);
        }
        if let Ok(url) = std::env::var("READING_ASSIST_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(model) = std::env::var("READING_ASSIST_MODEL") {
            self.model_name = model;
        }
        if let Ok(limit) = std::env::var("READING_ASSIST_CONTEXT_LIMIT") {
            self.context_limit = limit.parse().map_err(|_| ConfigError::InvalidValue {
                key: "READING_ASSIST_CONTEXT_LIMIT".to_string(),
                message: format!("'{}' is not a non-negative integer", limit),
            })?;
        }
        Ok(())
    }

    /// Effective base URL, without a trailing slash.
    pub fn effective_base_url(&self) -> Result<String, ConfigError> {
        let url = if self.base_url.trim().is_empty() {
            self.provider
                .default_base_url()
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: "baseUrl".to_string(),
                    hint: "A custom provider needs an explicit base URL.".to_string(),
                })?
                .to_string()
        } else {
            self.base_url.trim().to_string()
        };
        Ok(url.trim_end_matches('/').to_string())
    }

    pub fn effective_model(&self) -> String {
        if self.model_name.trim().is_empty() {
            self.provider.default_model().to_string()
        } else {
            self.model_name.trim().to_string()
        }
    }

    /// Remote sources the user has left enabled.
    pub fn enabled_remote_sources(&self) -> impl Iterator<Item = &RemoteSource> {
        self.remote_sources.iter().filter(|s| s.enabled)
    }
}

/// Tuning for the chat orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on upstream requests per user turn (tool loop bound).
    pub max_tool_iterations: usize,
    /// Time allowed until the provider returns response headers.
    pub request_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Tuning for remote skill HTTP calls.
#[derive(Debug, Clone)]
pub struct RemoteSkillConfig {
    pub timeout: Duration,
}

impl Default for RemoteSkillConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}
