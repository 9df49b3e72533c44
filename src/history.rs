//! Ordered conversation log the UI renders as bubbles.
//!
//! Entries are append-only during a run and mutated in place by id: a
//! loading bubble becomes a result bubble, a streaming bubble accumulates
//! chunks, and a chained entry collects packets from several nodes. The
//! engine never reorders or deletes entries mid-run.

use serde::{Deserialize, Serialize};

use crate::graph::QuickReply;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    Bot,
    User,
    Loading,
    BotStreaming,
}

/// Renderable content contributed by one node to a (possibly combined)
/// history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePacket {
    pub node_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<QuickReply>,
}

impl NodePacket {
    pub fn new(node_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            text: text.into(),
            replies: Vec::new(),
        }
    }

    pub fn with_replies(mut self, replies: Vec<QuickReply>) -> Self {
        self.replies = replies;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub role: EntryRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packets: Vec<NodePacket>,
    /// Flat text content; used for user turns and streaming output.
    #[serde(default)]
    pub content: String,
    pub is_completed: bool,
    /// Entry is open for further chained packets.
    pub is_chaining: bool,
    pub is_streaming: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
    next_id: u64,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, mut entry: HistoryEntry) -> u64 {
        self.next_id += 1;
        entry.id = self.next_id;
        let id = entry.id;
        self.entries.push(entry);
        id
    }

    pub fn append_bot(&mut self, node_id: impl Into<String>, packet: NodePacket, chaining: bool) -> u64 {
        self.push(HistoryEntry {
            id: 0,
            role: EntryRole::Bot,
            node_id: Some(node_id.into()),
            packets: vec![packet],
            content: String::new(),
            is_completed: !chaining,
            is_chaining: chaining,
            is_streaming: false,
        })
    }

    pub fn append_user(&mut self, content: impl Into<String>) -> u64 {
        self.push(HistoryEntry {
            id: 0,
            role: EntryRole::User,
            node_id: None,
            packets: Vec::new(),
            content: content.into(),
            is_completed: true,
            is_chaining: false,
            is_streaming: false,
        })
    }

    pub fn append_loading(&mut self, node_id: impl Into<String>) -> u64 {
        self.push(HistoryEntry {
            id: 0,
            role: EntryRole::Loading,
            node_id: Some(node_id.into()),
            packets: Vec::new(),
            content: String::new(),
            is_completed: false,
            is_chaining: false,
            is_streaming: false,
        })
    }

    pub fn append_streaming(&mut self, node_id: impl Into<String>) -> u64 {
        self.push(HistoryEntry {
            id: 0,
            role: EntryRole::BotStreaming,
            node_id: Some(node_id.into()),
            packets: Vec::new(),
            content: String::new(),
            is_completed: false,
            is_chaining: false,
            is_streaming: true,
        })
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn entry(&self, id: u64) -> Option<&HistoryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn entry_mut(&mut self, id: u64) -> Option<&mut HistoryEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// Attach chained content to an open entry. Returns false when the entry
    /// no longer exists (stale id after a restart).
    pub fn push_packet(&mut self, id: u64, packet: NodePacket) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.packets.push(packet);
                true
            }
            None => false,
        }
    }

    pub fn append_stream_chunk(&mut self, id: u64, chunk: &str) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.content.push_str(chunk);
                true
            }
            None => false,
        }
    }

    pub fn complete(&mut self, id: u64) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.is_completed = true;
                entry.is_chaining = false;
                entry.is_streaming = false;
                true
            }
            None => false,
        }
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
