use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::StoredMessage;

/// A full conversation document as persisted by the store, keyed by
/// `(user_id, conversation_id)`.
///
/// `messages` is strictly append-ordered; providers only ever see a bounded
/// suffix of it (see [`ConversationDoc::window`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationDoc {
    /// Owner of the conversation.
    pub user_id: Uuid,
    /// Conversation identifier, unique per user.
    pub conversation_id: Uuid,
    /// Short display title.
    pub alias: String,
    /// Last model used for this conversation (`provider:variant` string).
    pub model: String,
    /// Sampling temperature last used.
    pub temperature: f32,
    /// Reasoning-effort level last used (0–3).
    pub reason: u8,
    /// Optional persona text injected as a system directive.
    pub system_message: String,
    /// Ordered message history.
    pub messages: Vec<StoredMessage>,
}

impl ConversationDoc {
    /// Create an empty conversation shell for a first turn.
    #[must_use]
    pub fn new(user_id: Uuid, conversation_id: Uuid) -> Self {
        Self {
            user_id,
            conversation_id,
            alias: String::new(),
            model: String::new(),
            temperature: 0.5,
            reason: 0,
            system_message: String::new(),
            messages: Vec::new(),
        }
    }

    /// The bounded suffix of history that is sent upstream.
    ///
    /// Older messages stay stored but never leave the server.
    #[must_use]
    pub fn window(&self, size: usize) -> &[StoredMessage] {
        let start = self.messages.len().saturating_sub(size);
        &self.messages[start..]
    }
}

/// Listing entry for the sidebar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Conversation identifier.
    pub conversation_id: Uuid,
    /// Short display title.
    pub alias: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::StoredMessage;

    fn doc_with_messages(count: usize) -> ConversationDoc {
        let mut doc = ConversationDoc::new(Uuid::new_v4(), Uuid::new_v4());
        for index in 0..count {
            doc.messages.push(StoredMessage::user(format!("m{index}")));
        }
        doc
    }

    #[test]
    fn window_returns_suffix() {
        let doc = doc_with_messages(30);
        let window = doc.window(10);
        assert_eq!(window.len(), 10);
        assert_eq!(window[0], StoredMessage::user("m20"));
        assert_eq!(window[9], StoredMessage::user("m29"));
    }

    #[test]
    fn window_larger_than_history_returns_all() {
        let doc = doc_with_messages(3);
        assert_eq!(doc.window(20).len(), 3);
    }

    #[test]
    fn document_round_trip() {
        let doc = doc_with_messages(2);
        let serialized = serde_json::to_string(&doc).unwrap();
        let deserialized: ConversationDoc = serde_json::from_str(&serialized).unwrap();
        assert_eq!(doc, deserialized);
    }
}
