//! Skills that ship with the assistant.

mod analyze_page;
mod recall_pages;

pub use analyze_page::{
    AnalyzePageSkill, Readability, ReadabilityLevel, TextStats, analyze_readability, text_stats,
};
pub use recall_pages::RecallPagesSkill;

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::memory::ContextMemory;

use super::SkillRegistry;

/// Register every builtin skill.
pub fn register_builtin_skills(registry: &SkillRegistry, bus: Arc<MessageBus>, memory: Arc<ContextMemory>) {
    registry.register_sync(Arc::new(AnalyzePageSkill::new(bus)));
    registry.register_sync(Arc::new(RecallPagesSkill::new(memory)));
}
