//! Skills backed by a remote tool source over HTTP.
//!
//! A source exposes `GET {origin}/tools` listing its tools and
//! `POST {origin}/call` taking `{tool, arguments}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::RemoteToolSpec;
use crate::error::SkillError;
use crate::llm::protocol::join_url;

use super::skill::Skill;

/// Prefix that keeps remote tool names apart from builtins.
pub const REMOTE_PREFIX: &str = "mcp_";

/// Registry name for a remote tool.
pub fn remote_skill_name(tool_name: &str) -> String {
    format!("{}{}", REMOTE_PREFIX, tool_name)
}

/// Normalize an origin URL for comparison and path joining.
pub fn normalize_origin(origin_url: &str) -> String {
    origin_url.trim().trim_end_matches('/').to_string()
}

/// One tool of a remote source.
pub struct RemoteSkill {
    name: String,
    spec: RemoteToolSpec,
    origin_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteSkill {
    pub fn new(spec: RemoteToolSpec, origin_url: &str, client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            name: remote_skill_name(&spec.name),
            spec,
            origin_url: normalize_origin(origin_url),
            client,
            timeout,
        }
    }

    pub fn origin_url(&self) -> &str {
        &self.origin_url
    }

    async fn call(&self, args: Value) -> Result<Value, String> {
        let response = self
            .client
            .post(join_url(&self.origin_url, "call"))
            .timeout(self.timeout)
            .json(&json!({"tool": self.spec.name, "arguments": args}))
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            ));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| format!("invalid JSON response: {}", e))
    }
}

#[async_trait]
impl Skill for RemoteSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        self.spec.input_schema.clone()
    }

    /// Never fails: transport and HTTP errors come back as `{success: false, error}`.
    async fn execute(&self, args: Value) -> Result<Value, SkillError> {
        debug!(tool = %self.spec.name, origin = %self.origin_url, "Calling remote tool");
        match self.call(args).await {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(tool = %self.spec.name, origin = %self.origin_url, error = %error, "Remote tool call failed");
                Ok(json!({"success": false, "error": error}))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolListing {
    Wrapped { tools: Vec<RemoteToolSpec> },
    Bare(Vec<RemoteToolSpec>),
}

/// Fetch the tool list of a remote source.
pub async fn fetch_remote_tools(
    client: &reqwest::Client,
    origin_url: &str,
    timeout: Duration,
) -> Result<Vec<RemoteToolSpec>, SkillError> {
    let origin = normalize_origin(origin_url);
    let unavailable = |reason: String| SkillError::RemoteUnavailable {
        url: origin.clone(),
        reason,
    };

    let response = client
        .get(join_url(&origin, "tools"))
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(unavailable(format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status")
        )));
    }

    let listing: ToolListing = response
        .json()
        .await
        .map_err(|e| unavailable(format!("invalid tool list: {}", e)))?;
    Ok(match listing {
        ToolListing::Wrapped { tools } | ToolListing::Bare(tools) => tools,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_accepts_both_shapes() {
        let wrapped: ToolListing = serde_json::from_value(json!({
            "tools": [{"name": "lookup", "description": "d", "inputSchema": {"type": "object"}}]
        }))
        .unwrap();
        let bare: ToolListing = serde_json::from_value(json!([{"name": "lookup"}])).unwrap();

        let ToolListing::Wrapped { tools } = wrapped else {
            panic!("expected wrapped listing");
        };
        assert_eq!(tools[0].input_schema["type"], "object");

        let ToolListing::Bare(tools) = bare else {
            panic!("expected bare listing");
        };
        assert_eq!(tools[0].input_schema["type"], "object");
        assert_eq!(tools[0].description, "");
    }

    #[test]
    fn names_are_prefixed_and_origins_normalized() {
        assert_eq!(remote_skill_name("lookup"), "mcp_lookup");
        assert_eq!(normalize_origin(" http://localhost:3000/ "), "http://localhost:3000");
    }
}
