use async_stream::stream;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{Value, json};
use shared::config::ProviderProfile;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    ChatBackend, EventStream, FALLBACK_CHUNK_CHARS, FALLBACK_CHUNK_DELAY, FormattedPart,
    ProviderPayload, StreamEvent, chunk_text, thinking_budget,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Adapter for the Anthropic messages API.
///
/// System directives travel in the dedicated top-level `system` field;
/// reasoning arrives as `thinking` content blocks which are demarcated
/// with think markers for the orchestrator.
pub struct AnthropicBackend {
    client: reqwest::Client,
    profile: ProviderProfile,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("provider", &self.profile.key)
            .finish()
    }
}

impl AnthropicBackend {
    #[must_use]
    pub fn new(client: reqwest::Client, profile: ProviderProfile) -> Self {
        Self { client, profile }
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.profile.base_url.trim_end_matches('/'))
    }
}

fn request_body(payload: &ProviderPayload, stream: bool) -> Value {
    let budget = thinking_budget(payload.reason);
    // The completion cap must leave room for the thinking budget.
    let max_tokens = payload.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS) + budget.unwrap_or(0);

    let mut body = json!({
        "model": payload.model,
        "max_tokens": max_tokens,
        "temperature": payload.temperature,
        "messages": wire_messages(payload),
    });

    if let Some(system) = &payload.system {
        body["system"] = system.clone().into();
    }
    if let Some(budget) = budget {
        body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
    }
    if stream {
        body["stream"] = true.into();
    }

    body
}

fn wire_messages(payload: &ProviderPayload) -> Vec<Value> {
    payload
        .messages
        .iter()
        .map(|message| {
            if let Some(text) = message.as_plain_text() {
                json!({"role": message.role, "content": text})
            } else {
                let blocks: Vec<Value> = message
                    .parts
                    .iter()
                    .map(|part| match part {
                        FormattedPart::Text(text) => json!({"type": "text", "text": text}),
                        FormattedPart::InlineImage { media_type, data } => json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": media_type,
                                "data": data,
                            },
                        }),
                    })
                    .collect();
                json!({"role": message.role, "content": blocks})
            }
        })
        .collect()
}

/// Outcome of translating one upstream SSE event.
#[derive(Debug, Default, PartialEq, Eq)]
struct ParsedEvent {
    events: Vec<StreamEvent>,
    stop: bool,
}

fn parse_event(name: &str, data: &str, thinking: &mut bool) -> ParsedEvent {
    let mut parsed = ParsedEvent::default();

    match name {
        "content_block_start" => {
            let value: Value = serde_json::from_str(data).unwrap_or_default();
            if value["content_block"]["type"] == "thinking" {
                *thinking = true;
                parsed.events.push(StreamEvent::ThinkStart);
            }
        }
        "content_block_delta" => {
            let value: Value = serde_json::from_str(data).unwrap_or_default();
            let delta = &value["delta"];
            match delta["type"].as_str() {
                Some("thinking_delta") => {
                    if let Some(text) = delta["thinking"].as_str()
                        && !text.is_empty()
                    {
                        parsed.events.push(StreamEvent::ThinkToken(text.to_string()));
                    }
                }
                Some("text_delta") => {
                    if let Some(text) = delta["text"].as_str()
                        && !text.is_empty()
                    {
                        parsed.events.push(StreamEvent::Token(text.to_string()));
                    }
                }
                _ => {}
            }
        }
        "content_block_stop" => {
            if *thinking {
                *thinking = false;
                parsed.events.push(StreamEvent::ThinkEnd);
            }
        }
        "message_stop" => {
            parsed.stop = true;
        }
        "error" => {
            let value: Value = serde_json::from_str(data).unwrap_or_default();
            let message = value["error"]["message"]
                .as_str()
                .unwrap_or("upstream error")
                .to_string();
            parsed.events.push(StreamEvent::Error(message));
            parsed.stop = true;
        }
        _ => {}
    }

    parsed
}

/// Pull final text and reasoning out of a non-streaming response body.
fn parse_completion(body: &Value) -> (String, String) {
    let mut text = String::new();
    let mut reasoning = String::new();

    if let Some(blocks) = body["content"].as_array() {
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
                Some("thinking") => {
                    reasoning.push_str(block["thinking"].as_str().unwrap_or_default());
                }
                _ => {}
            }
        }
    }

    (text, reasoning)
}

impl ChatBackend for AnthropicBackend {
    fn open_stream(&self, payload: ProviderPayload, cancel: CancellationToken) -> EventStream {
        let client = self.client.clone();
        let profile = self.profile.clone();
        let url = self.messages_url();

        let streaming = payload.stream && profile.supports_streaming;

        Box::pin(stream! {
            let body = request_body(&payload, streaming);
            let response = client
                .post(&url)
                .header("x-api-key", &profile.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    yield StreamEvent::Error(err.to_string());
                    return;
                }
            };

            let response = match response.error_for_status() {
                Ok(response) => response,
                Err(err) => {
                    yield StreamEvent::Error(err.to_string());
                    return;
                }
            };

            if streaming {
                let mut events = response.bytes_stream().eventsource();
                let mut thinking = false;

                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let Some(event) = events.next().await else {
                        break;
                    };
                    match event {
                        Ok(event) => {
                            let parsed = parse_event(&event.event, &event.data, &mut thinking);
                            for item in parsed.events {
                                if cancel.is_cancelled() {
                                    return;
                                }
                                let is_error = matches!(item, StreamEvent::Error(_));
                                yield item;
                                if is_error {
                                    return;
                                }
                            }
                            if parsed.stop {
                                break;
                            }
                        }
                        Err(err) => {
                            yield StreamEvent::Error(err.to_string());
                            return;
                        }
                    }
                }

                if thinking {
                    yield StreamEvent::ThinkEnd;
                }
                yield StreamEvent::End;
            } else {
                let body = match response.json::<Value>().await {
                    Ok(body) => body,
                    Err(err) => {
                        yield StreamEvent::Error(err.to_string());
                        return;
                    }
                };

                let (text, reasoning) = parse_completion(&body);
                debug!(provider = %profile.key, chars = text.chars().count(), "re-chunking single-shot response");

                if !reasoning.is_empty() {
                    yield StreamEvent::ThinkStart;
                    for piece in chunk_text(&reasoning, FALLBACK_CHUNK_CHARS) {
                        if cancel.is_cancelled() {
                            return;
                        }
                        yield StreamEvent::ThinkToken(piece);
                        tokio::time::sleep(FALLBACK_CHUNK_DELAY).await;
                    }
                    yield StreamEvent::ThinkEnd;
                }

                for piece in chunk_text(&text, FALLBACK_CHUNK_CHARS) {
                    if cancel.is_cancelled() {
                        return;
                    }
                    yield StreamEvent::Token(piece);
                    tokio::time::sleep(FALLBACK_CHUNK_DELAY).await;
                }

                yield StreamEvent::End;
            }
        })
    }
}
