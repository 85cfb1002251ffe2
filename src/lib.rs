//! Reading Assist: browsing-context memory, skills and streaming chat for a
//! reading side panel.

pub mod assistant;
pub mod bus;
pub mod config;
pub mod error;
pub mod llm;
pub mod memory;
pub mod skills;
pub mod store;
