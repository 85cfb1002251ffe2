//! Registry of skills available to the model.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::{RemoteSkillConfig, RemoteToolSpec};
use crate::error::SkillError;
use crate::llm::ToolDefinition;

use super::remote::{RemoteSkill, fetch_remote_tools, normalize_origin};
use super::skill::{Skill, SkillInfo, SkillSource};

struct Entry {
    skill: Arc<dyn Skill>,
    enabled: bool,
    source: SkillSource,
    origin_url: Option<String>,
}

impl Entry {
    fn info(&self) -> SkillInfo {
        SkillInfo {
            name: self.skill.name().to_string(),
            description: self.skill.description().to_string(),
            parameters: self.skill.parameters_schema(),
            enabled: self.enabled,
            source: self.source,
            origin_url: self.origin_url.clone(),
        }
    }
}

/// Skills keyed by name. Registering an existing name replaces it.
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Entry>>,
    client: reqwest::Client,
    remote: RemoteSkillConfig,
}

impl SkillRegistry {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_config(client, RemoteSkillConfig::default())
    }

    pub fn with_config(client: reqwest::Client, remote: RemoteSkillConfig) -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
            client,
            remote,
        }
    }

    fn builtin_entry(skill: Arc<dyn Skill>) -> (String, Entry) {
        let name = skill.name().to_string();
        let entry = Entry {
            skill,
            enabled: true,
            source: SkillSource::Builtin,
            origin_url: None,
        };
        (name, entry)
    }

    /// Register a builtin skill, enabled.
    pub async fn register(&self, skill: Arc<dyn Skill>) {
        let (name, entry) = Self::builtin_entry(skill);
        self.skills.write().await.insert(name.clone(), entry);
        tracing::debug!("Registered skill: {}", name);
    }

    /// Register a builtin skill (sync version for startup).
    pub fn register_sync(&self, skill: Arc<dyn Skill>) {
        let (name, entry) = Self::builtin_entry(skill);
        if let Ok(mut skills) = self.skills.try_write() {
            skills.insert(name.clone(), entry);
            tracing::debug!("Registered skill: {}", name);
        } else {
            tracing::warn!(skill = %name, "Registry busy, skill not registered");
        }
    }

    /// Register one tool of a remote source. Returns the namespaced skill name.
    pub async fn register_remote(&self, spec: RemoteToolSpec, origin_url: &str) -> String {
        let skill = RemoteSkill::new(spec, origin_url, self.client.clone(), self.remote.timeout);
        let name = skill.name().to_string();
        let entry = Entry {
            origin_url: Some(skill.origin_url().to_string()),
            skill: Arc::new(skill),
            enabled: true,
            source: SkillSource::Remote,
        };

        let origin = entry.origin_url.clone();
        let previous = self.skills.write().await.insert(name.clone(), entry);
        match previous {
            Some(p) if p.source == SkillSource::Builtin => {
                tracing::warn!(skill = %name, "Remote tool replaced a builtin skill of the same name");
            }
            Some(p) if p.origin_url != origin => {
                tracing::warn!(
                    skill = %name,
                    previous_origin = p.origin_url.as_deref().unwrap_or_default(),
                    origin = origin_url,
                    "Remote tool replaced a tool of the same name from another source"
                );
            }
            _ => {}
        }
        tracing::debug!(skill = %name, origin = origin_url, "Registered remote skill");
        name
    }

    /// Remove every remote skill registered from `origin_url`.
    pub async fn remove_remote(&self, origin_url: &str) -> usize {
        let origin = normalize_origin(origin_url);
        let mut skills = self.skills.write().await;
        let before = skills.len();
        skills.retain(|_, entry| {
            !(entry.source == SkillSource::Remote && entry.origin_url.as_deref() == Some(origin.as_str()))
        });
        let removed = before - skills.len();
        tracing::debug!(origin = %origin, removed, "Removed remote skills");
        removed
    }

    /// Fetch the tool list of a remote source without registering anything.
    pub async fn fetch_remote(&self, origin_url: &str) -> Result<Vec<RemoteToolSpec>, SkillError> {
        fetch_remote_tools(&self.client, origin_url, self.remote.timeout).await
    }

    /// Replace everything registered from `origin_url` with `tools`.
    pub async fn replace_remote(&self, origin_url: &str, tools: Vec<RemoteToolSpec>) -> Vec<String> {
        self.remove_remote(origin_url).await;
        let mut names = Vec::with_capacity(tools.len());
        for spec in tools {
            names.push(self.register_remote(spec, origin_url).await);
        }
        names
    }

    /// Fetch the tools of `origin_url` and replace whatever was registered from it.
    pub async fn connect_remote(&self, origin_url: &str) -> Result<Vec<String>, SkillError> {
        let tools = self.fetch_remote(origin_url).await?;
        let names = self.replace_remote(origin_url, tools).await;
        tracing::info!(origin = origin_url, tools = names.len(), "Connected remote tool source");
        Ok(names)
    }

    /// Flip `enabled`; returns the new state, or false for unknown names.
    pub async fn toggle(&self, name: &str) -> bool {
        match self.skills.write().await.get_mut(name) {
            Some(entry) => {
                entry.enabled = !entry.enabled;
                entry.enabled
            }
            None => false,
        }
    }

    /// Set `enabled`; returns false for unknown names.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.skills.write().await.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Tool catalogue sent upstream: enabled skills only, sorted by name.
    pub async fn get_enabled_definitions(&self) -> Vec<ToolDefinition> {
        let skills = self.skills.read().await;
        let mut defs: Vec<ToolDefinition> = skills
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| ToolDefinition {
                name: entry.skill.name().to_string(),
                description: entry.skill.description().to_string(),
                parameters: entry.skill.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Every skill, enabled or not, sorted by name.
    pub async fn get_all(&self) -> Vec<SkillInfo> {
        let mut all: Vec<SkillInfo> = self.skills.read().await.values().map(Entry::info).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Run a skill. The registry lock is released before the skill executes.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, SkillError> {
        let skill = {
            let skills = self.skills.read().await;
            let entry = skills.get(name).ok_or_else(|| SkillError::NotFound {
                name: name.to_string(),
            })?;
            if !entry.enabled {
                return Err(SkillError::Disabled {
                    name: name.to_string(),
                });
            }
            Arc::clone(&entry.skill)
        };
        skill.execute(args).await
    }

    pub async fn has(&self, name: &str) -> bool {
        self.skills.read().await.contains_key(name)
    }

    /// Number of registered skills.
    pub fn count(&self) -> usize {
        self.skills.try_read().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl Skill for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echo the arguments"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> Result<Value, SkillError> {
            Ok(args)
        }
    }

    fn spec(name: &str) -> RemoteToolSpec {
        RemoteToolSpec {
            name: name.to_string(),
            description: format!("{} tool", name),
            input_schema: json!({"type": "object"}),
        }
    }

    fn registry() -> SkillRegistry {
        SkillRegistry::new(reqwest::Client::new())
    }

    #[tokio::test]
    async fn invoke_checks_existence_and_enabled() {
        let registry = registry();
        registry.register(Arc::new(Echo("echo"))).await;

        assert_eq!(registry.invoke("echo", json!({"a": 1})).await.unwrap(), json!({"a": 1}));
        assert!(matches!(
            registry.invoke("missing", json!({})).await,
            Err(SkillError::NotFound { .. })
        ));

        assert!(!registry.toggle("echo").await);
        assert!(matches!(
            registry.invoke("echo", json!({})).await,
            Err(SkillError::Disabled { .. })
        ));
        assert!(registry.toggle("echo").await);
        assert!(!registry.toggle("unknown").await);
    }

    #[tokio::test]
    async fn enabled_definitions_are_filtered_and_sorted() {
        let registry = registry();
        registry.register(Arc::new(Echo("zeta"))).await;
        registry.register(Arc::new(Echo("alpha"))).await;
        registry.register(Arc::new(Echo("mid"))).await;
        assert!(registry.set_enabled("mid", false).await);

        let names: Vec<String> = registry
            .get_enabled_definitions()
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert_eq!(registry.get_all().await.len(), 3);
    }

    #[tokio::test]
    async fn remove_remote_only_touches_that_origin() {
        let registry = registry();
        registry.register_sync(Arc::new(Echo("analyze_page")));
        let a = registry.register_remote(spec("search"), "http://a.test/").await;
        registry.register_remote(spec("fetch"), "http://a.test").await;
        registry.register_remote(spec("translate"), "http://b.test").await;
        assert_eq!(a, "mcp_search");
        assert_eq!(registry.count(), 4);

        assert_eq!(registry.remove_remote("http://a.test").await, 2);

        let all = registry.get_all().await;
        let names: Vec<&str> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["analyze_page", "mcp_translate"]);
        assert_eq!(all[1].source, SkillSource::Remote);
        assert_eq!(all[1].origin_url.as_deref(), Some("http://b.test"));
        assert_eq!(all[0].source, SkillSource::Builtin);
    }

    #[tokio::test]
    async fn reregistering_overwrites() {
        let registry = registry();
        registry.register_remote(spec("search"), "http://a.test").await;
        registry.register_remote(spec("search"), "http://a.test").await;
        assert_eq!(registry.count(), 1);
        assert!(registry.has("mcp_search").await);
    }

    #[tokio::test]
    async fn same_tool_from_another_origin_takes_over() {
        let registry = registry();
        registry.register_remote(spec("search"), "http://a.test").await;
        registry.register_remote(spec("search"), "http://b.test").await;
        assert_eq!(registry.count(), 1);

        // The entry now belongs to b; disconnecting a leaves it alone.
        assert_eq!(registry.remove_remote("http://a.test").await, 0);
        let all = registry.get_all().await;
        assert_eq!(all[0].origin_url.as_deref(), Some("http://b.test"));

        assert_eq!(registry.remove_remote("http://b.test").await, 1);
        assert_eq!(registry.count(), 0);
    }
}
