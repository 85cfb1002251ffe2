//! Provider connection check used by the settings screen.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use super::protocol::join_url;
use super::{ProtocolKind, adapter_for};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of [`test_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Error(String),
}

/// Check that `base_url` is reachable and accepts `api_key`.
///
/// OpenAI-style providers are probed with `GET /models`. Anthropic-style
/// providers get a minimal `POST /messages`; a 400 there still proves the
/// key was accepted.
pub async fn test_connection(
    client: &reqwest::Client,
    protocol: ProtocolKind,
    base_url: &str,
    api_key: &SecretString,
    model_name: &str,
) -> ConnectionStatus {
    if api_key.expose_secret().trim().is_empty() {
        return ConnectionStatus::Error("API key is not set".to_string());
    }

    let adapter = adapter_for(protocol);
    let headers = adapter.headers(api_key.expose_secret(), &HashMap::new());

    let request = match protocol {
        ProtocolKind::OpenAi => client.get(join_url(base_url, "models")).headers(headers),
        ProtocolKind::Anthropic => client.post(adapter.endpoint(base_url)).headers(headers).json(&json!({
            "model": model_name,
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "Hi"}],
        })),
    };

    debug!(provider = adapter.name(), base_url, "Testing provider connection");
    let response = match request.timeout(CONNECTION_TIMEOUT).send().await {
        Ok(response) => response,
        Err(e) => return ConnectionStatus::Error(format!("Connection failed: {}", e)),
    };

    let status = response.status();
    let accepted = status.is_success()
        || (protocol == ProtocolKind::Anthropic && status == reqwest::StatusCode::BAD_REQUEST);
    if accepted {
        info!(provider = adapter.name(), "Provider connection verified");
        ConnectionStatus::Connected
    } else {
        ConnectionStatus::Error(format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status")
        ))
    }
}
