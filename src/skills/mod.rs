//! Skills the model can call, and the registry that owns them.

pub mod builtin;
pub mod registry;
pub mod remote;
pub mod skill;

pub use registry::SkillRegistry;
pub use remote::{RemoteSkill, fetch_remote_tools, remote_skill_name};
pub use skill::*;
