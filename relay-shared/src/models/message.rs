use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Who authored a stored message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the end user.
    User,
    /// Message produced by the upstream model.
    Assistant,
}

impl Role {
    /// Wire-level role name used in provider payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// One piece of a multimodal message.
///
/// Parts arrive from the client tagged with a `type` field. `image` content
/// is a server-side path produced by the upload endpoint; `file` content is
/// a base64 data URL that gets resolved to plain text before any provider
/// call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text itself.
        content: String,
    },
    /// Reference to an uploaded image.
    Image {
        /// Declared file name, used to derive the MIME type.
        name: String,
        /// Stored path on this server.
        content: String,
    },
    /// An attached file carried inline as a base64 data URL.
    File {
        /// Declared file name.
        name: String,
        /// Base64 data-URL payload.
        content: String,
    },
}

/// Message content: either a plain string or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Multimodal content.
    Parts(Vec<Part>),
}

impl MessageContent {
    /// Concatenated text of all text parts, ignoring attachments.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    Part::Text { content } => Some(content.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        MessageContent::Text(value.to_string())
    }
}

/// A single message as held in the conversation document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    /// Author of the message.
    pub role: Role,
    /// Content, plain or multimodal.
    pub content: MessageContent,
}

impl StoredMessage {
    /// Convenience constructor for a plain-text user message.
    #[must_use]
    pub fn user<T: Into<String>>(text: T) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Convenience constructor for a plain-text assistant message.
    #[must_use]
    pub fn assistant<T: Into<String>>(text: T) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_wire_shape_is_tagged() {
        let part = Part::Image {
            name: "photo.png".into(),
            content: "/uploads/abc-photo.png".into(),
        };

        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["name"], "photo.png");
        assert_eq!(value["content"], "/uploads/abc-photo.png");
    }

    #[test]
    fn content_deserializes_plain_and_parts() {
        let plain: MessageContent = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(plain, MessageContent::Text("hello".into()));

        let parts: MessageContent = serde_json::from_str(
            r#"[{"type":"text","content":"hi"},{"type":"file","name":"a.txt","content":"data:text/plain;base64,aGk="}]"#,
        )
        .unwrap();
        match parts {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            MessageContent::Text(_) => panic!("expected parts"),
        }
    }

    #[test]
    fn text_extraction_skips_attachments() {
        let content = MessageContent::Parts(vec![
            Part::Text {
                content: "look at this".into(),
            },
            Part::Image {
                name: "x.png".into(),
                content: "/uploads/x.png".into(),
            },
        ]);

        assert_eq!(content.text(), "look at this");
    }

    #[test]
    fn stored_message_round_trip() {
        let message = StoredMessage::user("hello");
        let serialized = serde_json::to_string(&message).unwrap();
        let deserialized: StoredMessage = serde_json::from_str(&serialized).unwrap();
        assert_eq!(message, deserialized);
        assert_eq!(serde_json::to_value(&message).unwrap()["role"], "user");
    }
}
