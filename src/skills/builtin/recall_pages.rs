//! `recall_pages`: search pages the user visited recently.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::SkillError;
use crate::memory::{ContextMemory, truncate_chars};
use crate::skills::skill::{Skill, require_str};

const SNIPPET_CHARS: usize = 300;

pub struct RecallPagesSkill {
    memory: Arc<ContextMemory>,
}

impl RecallPagesSkill {
    pub fn new(memory: Arc<ContextMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Skill for RecallPagesSkill {
    fn name(&self) -> &str {
        "recall_pages"
    }

    fn description(&self) -> &str {
        "Search pages the user visited recently by keyword. Use when the question \
         refers to something read earlier. Returns matching titles, URLs and snippets."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keywords to look for in page titles, URLs and content"
                },
                "limit": {
                    "type": "integer",
                    "description": "Max results (default: 3, max: 10)",
                    "default": 3
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, SkillError> {
        let query = require_str(self.name(), &args, "query")?;
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(3).min(10) as usize;

        let pages = self.memory.search(query, limit).await;
        Ok(json!({
            "query": query,
            "results": pages.iter().map(|p| json!({
                "url": p.url,
                "title": p.title,
                "snippet": truncate_chars(&p.content, SNIPPET_CHARS),
                "visitedAt": p.timestamp,
            })).collect::<Vec<_>>(),
            "resultCount": pages.len(),
        }))
    }
}
