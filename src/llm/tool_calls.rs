//! Reassembly of tool calls streamed as fragments.

use std::collections::BTreeMap;

use tracing::warn;

use super::types::ToolCall;

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    args: String,
}

/// Accumulates tool call fragments keyed by the provider's block index.
///
/// Argument text arrives as partial JSON split across chunks; it is only
/// concatenated here and parsed once the call is finalized.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: BTreeMap<usize, PendingCall>,
    completed: Vec<ToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment of call `index`.
    pub fn apply(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: &str) {
        let call = self.pending.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            call.id = Some(id);
        }
        // Some servers repeat the name in every chunk; the first one wins.
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            if call.name.is_empty() {
                call.name = name;
            }
        }
        call.args.push_str(arguments);
    }

    /// Finalize call `index`. Unknown indices (e.g. text blocks) are ignored.
    pub fn finish(&mut self, index: usize) {
        let Some(call) = self.pending.remove(&index) else {
            return;
        };
        if call.name.is_empty() {
            warn!(index, "Dropping streamed tool call without a name");
            return;
        }
        self.completed.push(ToolCall {
            id: call.id.unwrap_or_else(|| format!("call_{}", index)),
            name: call.name,
            arguments: call.args,
        });
    }

    /// Finalize every open call in index order.
    pub fn finish_all(&mut self) {
        let indices: Vec<usize> = self.pending.keys().copied().collect();
        for index in indices {
            self.finish(index);
        }
    }

    /// Completed calls in completion order.
    pub fn into_completed(mut self) -> Vec<ToolCall> {
        self.finish_all();
        self.completed
    }
}
