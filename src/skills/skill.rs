//! The skill abstraction: a named, schema-described capability the model may call.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::SkillError;

/// Where a skill came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillSource {
    Builtin,
    Remote,
}

/// A capability the model can invoke through tool calls.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> Result<Value, SkillError>;
}

/// Registry view of one skill, for management screens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub enabled: bool,
    pub source: SkillSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
}

/// Extract a required string argument.
pub fn require_str<'a>(skill: &str, args: &'a Value, key: &str) -> Result<&'a str, SkillError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SkillError::InvalidParameters {
            name: skill.to_string(),
            reason: format!("missing '{}' parameter", key),
        })
}
