//! Append-only message log with a separate reveal cache.
//!
//! Log entries never change once appended. Revealing a message adds an
//! entry to the id -> plaintext map instead. Plaintexts are zeroized when
//! the log is dropped and are never written anywhere.

use std::collections::HashMap;
use std::fmt;

use zeroize::Zeroizing;

use super::message::Message;

/// Identifier of a logged message, unique within one [`MessageLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// One immutable record in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: MessageId,
    pub direction: Direction,
    /// Recipient for sent messages, local user for received ones.
    pub peer: String,
    pub message: Message,
}

/// A log entry together with its plaintext, if revealed.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub entry: LogEntry,
    pub plaintext: Option<String>,
}

#[derive(Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    revealed: HashMap<MessageId, Zeroizing<String>>,
    next_id: u64,
}

impl fmt::Debug for MessageLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLog")
            .field("entries", &self.entries.len())
            .field("revealed", &self.revealed.len())
            .finish()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, direction: Direction, peer: &str, message: Message) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.entries.push(LogEntry {
            id,
            direction,
            peer: peer.to_string(),
            message,
        });
        id
    }

    pub fn get(&self, id: MessageId) -> Option<&LogEntry> {
        // Ids are handed out in order and entries are never removed.
        self.entries
            .get(id.0 as usize)
            .filter(|entry| entry.id == id)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Records the plaintext of a message.
    ///
    /// Returns `false` for unknown ids. An existing plaintext is kept.
    pub fn record_reveal(&mut self, id: MessageId, plaintext: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.revealed
            .entry(id)
            .or_insert_with(|| Zeroizing::new(plaintext.to_string()));
        true
    }

    pub fn plaintext(&self, id: MessageId) -> Option<&str> {
        self.revealed.get(&id).map(|text| text.as_str())
    }

    pub fn is_revealed(&self, id: MessageId) -> bool {
        self.revealed.contains_key(&id)
    }

    /// Snapshot of every entry with its plaintext, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .map(|entry| HistoryEntry {
                entry: entry.clone(),
                plaintext: self.plaintext(entry.id).map(str::to_string),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
