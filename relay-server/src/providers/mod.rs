use futures_util::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod anthropic;
pub mod openai;

/// One normalized event from an upstream token stream.
///
/// Adapters translate every provider's wire shape into this union; nothing
/// provider-specific leaks past them. Upstream failures become a single
/// [`StreamEvent::Error`] followed by the end of the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental answer text.
    Token(String),
    /// A reasoning block starts.
    ThinkStart,
    /// Incremental reasoning text.
    ThinkToken(String),
    /// The reasoning block ended.
    ThinkEnd,
    /// Source citations, buffered upstream and delivered once after the
    /// main content.
    Citations(Vec<String>),
    /// Upstream failure; terminates the sequence.
    Error(String),
    /// Normal end of the sequence.
    End,
}

/// Boxed event sequence handed to the orchestrator.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'static>>;

/// A message in provider-ready form, after part normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedMessage {
    /// Wire role name (`user`, `assistant`, or the profile's admin role).
    pub role: String,
    /// Normalized parts; file attachments are already text here.
    pub parts: Vec<FormattedPart>,
}

impl FormattedMessage {
    /// A single-text message.
    #[must_use]
    pub fn text<R: Into<String>, T: Into<String>>(role: R, text: T) -> Self {
        Self {
            role: role.into(),
            parts: vec![FormattedPart::Text(text.into())],
        }
    }

    /// The sole text of this message, when it has exactly one text part.
    #[must_use]
    pub fn as_plain_text(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [FormattedPart::Text(text)] => Some(text),
            _ => None,
        }
    }
}

/// A normalized content part ready for provider-specific encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormattedPart {
    /// Plain text (including extracted file contents).
    Text(String),
    /// Inline base64 image data. `data` is empty when the stored file could
    /// not be read; adapters still emit the block so message shape stays
    /// stable.
    InlineImage {
        /// MIME type derived from the declared file name.
        media_type: String,
        /// Base64-encoded bytes.
        data: String,
    },
}

/// Everything an adapter needs for one upstream call. Also the billing
/// input: captured before the stream starts and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayload {
    /// Model variant.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Reasoning-effort level (0 disables reasoning).
    pub reason: u8,
    /// Whether to request incremental delivery.
    pub stream: bool,
    /// Completion cap, where the dialect requires one.
    pub max_tokens: Option<u32>,
    /// System directives for dialects with a dedicated top-level field.
    pub system: Option<String>,
    /// Conversation window plus any injected directive messages.
    pub messages: Vec<FormattedMessage>,
}

/// A provider behind the uniform streaming contract.
///
/// `open_stream` never fails: connection and protocol errors surface as an
/// in-band [`StreamEvent::Error`]. Implementations check `cancel` before
/// yielding and stop silently once it fires.
pub trait ChatBackend: Send + Sync {
    /// Open one upstream completion as a normalized event sequence.
    fn open_stream(&self, payload: ProviderPayload, cancel: CancellationToken) -> EventStream;
}

/// Chunk size used when a single-shot response is re-streamed.
pub(crate) const FALLBACK_CHUNK_CHARS: usize = 10;

/// Delay between re-streamed chunks.
pub(crate) const FALLBACK_CHUNK_DELAY: Duration = Duration::from_millis(25);

/// Split text into fixed-size character chunks (never splitting a code
/// point) for the non-streaming fallback path.
#[must_use]
pub(crate) fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for (count, ch) in text.chars().enumerate() {
        if count > 0 && count % chunk_chars == 0 {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Map a 1–3 reasoning level onto the OpenAI-style effort knob.
#[must_use]
pub(crate) fn reasoning_effort(reason: u8) -> Option<&'static str> {
    match reason {
        0 => None,
        1 => Some("low"),
        2 => Some("medium"),
        _ => Some("high"),
    }
}

/// Map a 1–3 reasoning level onto an Anthropic thinking budget.
#[must_use]
pub(crate) fn thinking_budget(reason: u8) -> Option<u32> {
    match reason {
        0 => None,
        1 => Some(2048),
        2 => Some(4096),
        _ => Some(8192),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_char_boundaries() {
        let chunks = chunk_text("가나다라마바사아자차카타", 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks.concat(), "가나다라마바사아자차카타");
    }

    #[test]
    fn chunking_exact_multiple_has_no_empty_tail() {
        let chunks = chunk_text("0123456789", 10);
        assert_eq!(chunks, vec!["0123456789".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn reasoning_levels_map_monotonically() {
        assert_eq!(reasoning_effort(0), None);
        assert_eq!(reasoning_effort(1), Some("low"));
        assert_eq!(reasoning_effort(3), Some("high"));
        assert_eq!(thinking_budget(0), None);
        assert!(thinking_budget(1).unwrap() < thinking_budget(3).unwrap());
    }

    #[test]
    fn plain_text_shortcut() {
        let message = FormattedMessage::text("user", "hi");
        assert_eq!(message.as_plain_text(), Some("hi"));

        let multi = FormattedMessage {
            role: "user".into(),
            parts: vec![
                FormattedPart::Text("hi".into()),
                FormattedPart::InlineImage {
                    media_type: "image/png".into(),
                    data: String::new(),
                },
            ],
        };
        assert_eq!(multi.as_plain_text(), None);
    }
}
