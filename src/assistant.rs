//! The reading assistant: wires memory, skills, the bus and the orchestrator
//! into the visit/ask flow of the side panel.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BusMessage, MessageBus};
use crate::config::{
    DEFAULT_SYSTEM_PROMPT, OrchestratorConfig, RemoteSkillConfig, RemoteSource, RemoteToolSpec, Settings,
};
use crate::error::{Result, StorageError};
use crate::llm::{
    ChatOrchestrator, ChatOutcome, ChatRequest, ConnectionStatus, ConversationTurn, MessageContent, Role,
    test_connection,
};
use crate::memory::{ContextMemory, PageContext, truncate_chars};
use crate::skills::SkillRegistry;
use crate::skills::builtin::register_builtin_skills;
use crate::skills::remote::normalize_origin;
use crate::store::{Storage, keys};

/// Characters of the current page included in the system prompt.
const CURRENT_PAGE_CHARS: usize = 4000;

/// Stored messages replayed as conversation history.
const HISTORY_WINDOW: usize = 20;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// RFC 3339.
    pub timestamp: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Shared services the assistant is built from.
pub struct AssistantDeps {
    pub storage: Storage,
    pub bus: Arc<MessageBus>,
    pub client: reqwest::Client,
    pub orchestrator: OrchestratorConfig,
    pub remote: RemoteSkillConfig,
}

impl AssistantDeps {
    pub fn new(storage: Storage, bus: Arc<MessageBus>) -> Self {
        Self {
            storage,
            bus,
            client: reqwest::Client::new(),
            orchestrator: OrchestratorConfig::default(),
            remote: RemoteSkillConfig::default(),
        }
    }
}

pub struct ReadingAssistant {
    storage: Storage,
    bus: Arc<MessageBus>,
    memory: Arc<ContextMemory>,
    skills: Arc<SkillRegistry>,
    orchestrator: Arc<ChatOrchestrator>,
    client: reqwest::Client,
}

impl ReadingAssistant {
    /// Build the assistant and register the builtin skills.
    pub fn new(deps: AssistantDeps) -> Self {
        let memory = Arc::new(ContextMemory::new(deps.storage.clone()));
        let skills = Arc::new(SkillRegistry::with_config(deps.client.clone(), deps.remote));
        register_builtin_skills(&skills, Arc::clone(&deps.bus), Arc::clone(&memory));
        let orchestrator = Arc::new(ChatOrchestrator::new(
            deps.client.clone(),
            Arc::clone(&skills),
            deps.orchestrator,
        ));

        Self {
            storage: deps.storage,
            bus: deps.bus,
            memory,
            skills,
            orchestrator,
            client: deps.client,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn memory(&self) -> &Arc<ContextMemory> {
        &self.memory
    }

    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    pub fn orchestrator(&self) -> &Arc<ChatOrchestrator> {
        &self.orchestrator
    }

    pub async fn settings(&self) -> Settings {
        Settings::load(&self.storage).await
    }

    /// Persist settings and announce them on the bus.
    pub async fn update_settings(&self, settings: Settings) -> std::result::Result<(), StorageError> {
        settings.save(&self.storage).await?;
        self.bus.post(BusMessage::UpdateSettings {
            settings: Box::new(settings),
        });
        Ok(())
    }

    /// Remember the page currently shown by the host.
    ///
    /// Pages without extracted content are not recorded. Returns the stored
    /// snapshot, if any.
    pub async fn record_visit(&self) -> Result<Option<PageContext>> {
        let Some(page) = self.bus.request_page_content().await? else {
            debug!("No page content available, visit not recorded");
            return Ok(None);
        };
        if page.content.trim().is_empty() {
            debug!(url = %page.url, "Page has no extracted content, visit not recorded");
            return Ok(None);
        }

        let settings = self.settings().await;
        let snapshot = PageContext::now(page.url, page.title, page.content);
        self.memory.add_page(snapshot.clone(), settings.context_limit).await;
        info!(url = %snapshot.url, "Recorded page visit");
        Ok(Some(snapshot))
    }

    async fn system_prompt(&self, settings: &Settings, current_url: &str) -> String {
        let mut prompt = if settings.system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            settings.system_prompt.clone()
        };

        if let Some(page) = self.memory.find_page(current_url).await {
            prompt.push_str(&format!(
                "\n\nCurrent page: {} ({})\n{}",
                page.title,
                page.url,
                truncate_chars(&page.content, CURRENT_PAGE_CHARS)
            ));
        }

        let context = self
            .memory
            .get_relevant_context(current_url, settings.context_limit)
            .await;
        if !context.is_empty() {
            prompt.push_str("\n\nPrevious browsing context:\n");
            prompt.push_str(&context);
        }
        prompt
    }

    /// Ask a question about `current_url`, optionally with an attached image
    /// (a base64 data URI). `on_delta` receives the accumulated answer.
    ///
    /// The question and the answer text are appended to the chat history
    /// unless the request is rejected before sending.
    pub async fn ask<F>(
        &self,
        question: &str,
        current_url: &str,
        image: Option<String>,
        on_delta: F,
    ) -> Result<ChatOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let settings = self.settings().await;
        let history: Vec<ConversationTurn> = self
            .chat_history()
            .await
            .into_iter()
            .rev()
            .take(HISTORY_WINDOW)
            .rev()
            .map(|m| match m.role {
                Role::Assistant => ConversationTurn::assistant(m.content),
                _ => ConversationTurn::user(m.content),
            })
            .collect();

        let content = match image {
            Some(data_uri) => MessageContent::with_image(question, data_uri),
            None => MessageContent::from(question),
        };

        let request = ChatRequest::from_settings(&settings)?
            .with_system_prompt(self.system_prompt(&settings, current_url).await)
            .with_history(history)
            .with_user_content(content)
            .with_tools(self.skills.get_enabled_definitions().await);
        request.validate()?;

        let cancel = self.orchestrator.begin_request();
        let outcome = self.orchestrator.run(&request, &cancel, on_delta).await?;

        let mut new_messages = vec![ChatMessage::new(Role::User, question)];
        if !outcome.text.is_empty() {
            new_messages.push(ChatMessage::new(Role::Assistant, outcome.text.clone()));
        }
        let saved = self
            .storage
            .update_json::<Vec<ChatMessage>, _>(keys::CHAT_HISTORY, |current| {
                let mut messages = current.unwrap_or_default();
                messages.extend(new_messages);
                messages
            })
            .await;
        if let Err(e) = saved {
            warn!(error = %e, "Failed to persist chat history");
        }

        Ok(outcome)
    }

    /// Stored chat messages, oldest first.
    pub async fn chat_history(&self) -> Vec<ChatMessage> {
        match self.storage.get_json::<Vec<ChatMessage>>(keys::CHAT_HISTORY).await {
            Ok(messages) => messages.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to load chat history");
                Vec::new()
            }
        }
    }

    pub async fn clear_history(&self) -> std::result::Result<(), StorageError> {
        let _guard = self.storage.lock_key(keys::CHAT_HISTORY).await;
        self.storage.remove(keys::CHAT_HISTORY).await
    }

    /// Check the configured provider.
    pub async fn test_connection(&self) -> ConnectionStatus {
        let settings = self.settings().await;
        let base_url = match settings.effective_base_url() {
            Ok(url) => url,
            Err(e) => return ConnectionStatus::Error(e.to_string()),
        };
        test_connection(
            &self.client,
            settings.provider.protocol(),
            &base_url,
            &settings.api_key,
            &settings.effective_model(),
        )
        .await
    }

    /// Connect a remote tool source, register its tools and record it in settings.
    pub async fn connect_remote_source(&self, url: &str) -> Result<RemoteSource> {
        let url = normalize_origin(url);
        let tools = self.skills.fetch_remote(&url).await?;
        let names = self.skills.replace_remote(&url, tools.clone()).await;
        info!(origin = %url, tools = names.len(), "Connected remote tool source");

        let mut settings = self.settings().await;
        let source = match settings.remote_sources.iter_mut().find(|s| s.url == url) {
            Some(existing) => {
                existing.enabled = true;
                existing.tools = tools;
                existing.last_connected = Some(Utc::now());
                existing.clone()
            }
            None => {
                let source = RemoteSource {
                    id: Uuid::new_v4().to_string(),
                    name: url.clone(),
                    url: url.clone(),
                    enabled: true,
                    tools,
                    last_connected: Some(Utc::now()),
                };
                settings.remote_sources.push(source.clone());
                source
            }
        };
        self.update_settings(settings).await?;
        Ok(source)
    }

    /// Enable or disable a saved remote source. Disabling unregisters its
    /// tools; enabling reconnects. Returns false for unknown sources.
    pub async fn set_remote_source_enabled(&self, url: &str, enabled: bool) -> Result<bool> {
        let url = normalize_origin(url);
        let mut settings = self.settings().await;
        let Some(source) = settings.remote_sources.iter_mut().find(|s| s.url == url) else {
            return Ok(false);
        };

        if enabled {
            self.connect_remote_source(&url).await?;
        } else {
            source.enabled = false;
            self.skills.remove_remote(&url).await;
            self.update_settings(settings).await?;
        }
        Ok(true)
    }

    /// Register the last known tools of every enabled remote source without
    /// contacting them. Returns how many tools were registered.
    pub async fn restore_remote_sources(&self) -> usize {
        let settings = self.settings().await;
        let mut registered = 0;
        for source in settings.enabled_remote_sources() {
            for spec in &source.tools {
                self.skills.register_remote(spec.clone(), &source.url).await;
                registered += 1;
            }
        }
        if registered > 0 {
            info!(tools = registered, "Restored remote tools from settings");
        }
        registered
    }
}
