use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::providers::{ChatBackend, FormattedMessage, ProviderPayload, StreamEvent};

/// Title used when alias generation fails or returns nothing.
pub const DEFAULT_ALIAS: &str = "Untitled";

const ALIAS_MAX_TOKENS: u32 = 20;

/// Generate a short display title for a new conversation by asking a cheap
/// model to summarize the opening message.
///
/// The alias is cosmetic, so any upstream failure falls back to a fixed
/// title instead of failing the conversation creation.
pub async fn generate_alias(
    backend: &dyn ChatBackend,
    model: &str,
    opening_message: &str,
) -> String {
    let prompt = format!(
        "Summarize the following message as a title of at most 20 characters. \
         Reply with the title only and use no punctuation. Message: [{opening_message}]"
    );

    let payload = ProviderPayload {
        model: model.to_string(),
        temperature: 0.1,
        reason: 0,
        stream: false,
        max_tokens: Some(ALIAS_MAX_TOKENS),
        system: None,
        messages: vec![FormattedMessage::text("user", prompt)],
    };

    let mut stream = backend.open_stream(payload, CancellationToken::new());
    let mut title = String::new();

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Token(text) => title.push_str(&text),
            StreamEvent::Error(_) => return DEFAULT_ALIAS.to_string(),
            _ => {}
        }
    }

    let title = title.trim();
    if title.is_empty() {
        DEFAULT_ALIAS.to_string()
    } else {
        title.to_string()
    }
}
