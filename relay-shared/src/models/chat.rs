use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::MessageContent;

/// One chat turn as posted to a provider endpoint. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// Conversation to append this turn to.
    pub conversation_id: Uuid,
    /// Model variant to run.
    pub model: String,
    /// Input price per one million tokens.
    #[serde(default)]
    pub in_billing: f64,
    /// Output price per one million tokens.
    #[serde(default)]
    pub out_billing: f64,
    /// Optional search surcharge per one million tokens (input + output).
    #[serde(default)]
    pub search_billing: Option<f64>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Reasoning-effort level, 0 (off) to 3.
    #[serde(default)]
    pub reason: u8,
    /// Optional persona/system text for this conversation.
    #[serde(default)]
    pub system_message: String,
    /// The incoming user message, plain or multimodal.
    pub user_message: MessageContent,
    /// Persona-override flag.
    #[serde(default)]
    pub dan: bool,
    /// Whether the upstream call should stream.
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.5
}

const fn default_stream() -> bool {
    true
}

impl ChatRequest {
    /// Per-million-token rates bundled for the billing estimator.
    #[must_use]
    pub fn rates(&self) -> BillingRates {
        BillingRates {
            input: self.in_billing,
            output: self.out_billing,
            search: self.search_billing,
        }
    }
}

/// Per-million-token prices supplied with a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingRates {
    /// Price per million input tokens.
    pub input: f64,
    /// Price per million output tokens.
    pub output: f64,
    /// Optional search surcharge per million tokens.
    pub search: Option<f64>,
}

/// One frame of the client-facing event stream.
///
/// Serializes to `{"content": ...}` or `{"error": ...}`, matching what the
/// web client parses out of each `data:` line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StreamFrame {
    /// Incremental response text.
    Content {
        /// The delta text.
        content: String,
    },
    /// Terminal error relayed from upstream.
    Error {
        /// Human-readable message.
        error: String,
    },
}

impl StreamFrame {
    /// Build a content frame.
    #[must_use]
    pub fn content<T: Into<String>>(text: T) -> Self {
        StreamFrame::Content {
            content: text.into(),
        }
    }

    /// Build an error frame.
    #[must_use]
    pub fn error<T: Into<String>>(message: T) -> Self {
        StreamFrame::Error {
            error: message.into(),
        }
    }
}
