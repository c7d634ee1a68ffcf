//! Shared-context ring entries.
//!
//! The ring itself lives in the broker; these are the values that travel
//! over the wire in `ring_add`, `ring_update` and `ring_context`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Role, Turn};

/// Maximum characters kept from a turn's content.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Default ring capacity.
pub const DEFAULT_RING_CAPACITY: usize = 1000;

/// Default number of entries returned by `ring_get`.
pub const DEFAULT_CONTEXT_LIMIT: usize = 20;

/// A recorded cross-agent turn. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingEntry {
    pub id: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
}

impl RingEntry {
    /// Build an entry, truncating content to `max_chars` characters.
    pub fn new(agent_id: impl Into<String>, turn: Turn, max_chars: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
            role: turn.role,
            content: truncate_chars(turn.content, max_chars),
        }
    }

    /// The `[agentId/role]: content` line used in prompt transcripts.
    ///
    /// Whitespace runs (including newlines) collapse to single spaces so each
    /// entry stays on one line.
    pub fn transcript_line(&self) -> String {
        let content = self.content.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("[{}/{}]: {}", self.agent_id, self.role, content)
    }
}

/// Keep at most `max_chars` Unicode scalar values.
pub fn truncate_chars(mut content: String, max_chars: usize) -> String {
    if let Some((byte_idx, _)) = content.char_indices().nth(max_chars) {
        content.truncate(byte_idx);
    }
    content
}

/// Return the last `limit` entries not authored by `exclude`, most-recent-last.
pub fn select_context<'a, I>(entries: I, exclude: Option<&str>, limit: usize) -> Vec<RingEntry>
where
    I: DoubleEndedIterator<Item = &'a RingEntry>,
{
    let mut picked: Vec<RingEntry> = entries
        .rev()
        .filter(|e| exclude.is_none_or(|ex| e.agent_id != ex))
        .take(limit)
        .cloned()
        .collect();
    picked.reverse();
    picked
}
