use async_stream::stream;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{Value, json};
use shared::config::ProviderProfile;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    ChatBackend, EventStream, FALLBACK_CHUNK_CHARS, FALLBACK_CHUNK_DELAY, FormattedPart,
    ProviderPayload, StreamEvent, chunk_text, reasoning_effort,
};

/// Adapter for OpenAI-compatible chat-completion endpoints.
///
/// Covers OpenAI itself plus the vendors exposing the same wire shape
/// (Gemini, DeepSeek, Llama API, Perplexity, Grok). DeepSeek-style
/// `reasoning_content` deltas are demarcated with think markers, and
/// Perplexity citation lists are buffered and emitted once after the
/// content.
pub struct OpenAiBackend {
    client: reqwest::Client,
    profile: ProviderProfile,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("provider", &self.profile.key)
            .finish()
    }
}

impl OpenAiBackend {
    #[must_use]
    pub fn new(client: reqwest::Client, profile: ProviderProfile) -> Self {
        Self { client, profile }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.profile.base_url.trim_end_matches('/')
        )
    }
}

fn request_body(payload: &ProviderPayload, stream: bool) -> Value {
    let mut body = json!({
        "model": payload.model,
        "temperature": payload.temperature,
        "messages": wire_messages(payload),
    });

    if let Some(effort) = reasoning_effort(payload.reason) {
        body["reasoning_effort"] = effort.into();
    }
    if let Some(max_tokens) = payload.max_tokens {
        body["max_tokens"] = max_tokens.into();
    }
    if stream {
        body["stream"] = true.into();
    }

    body
}

fn wire_messages(payload: &ProviderPayload) -> Vec<Value> {
    let mut messages = Vec::with_capacity(payload.messages.len() + 1);

    // Profiles speaking this dialect normally inject directives as a
    // leading message, but honor a top-level system text if one arrives.
    if let Some(system) = &payload.system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for message in &payload.messages {
        if let Some(text) = message.as_plain_text() {
            messages.push(json!({"role": message.role, "content": text}));
        } else {
            let blocks: Vec<Value> = message
                .parts
                .iter()
                .map(|part| match part {
                    FormattedPart::Text(text) => json!({"type": "text", "text": text}),
                    FormattedPart::InlineImage { media_type, data } => json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{media_type};base64,{data}")},
                    }),
                })
                .collect();
            messages.push(json!({"role": message.role, "content": blocks}));
        }
    }

    messages
}

/// Translate one SSE `data:` payload into normalized events.
///
/// `thinking` tracks whether a reasoning block is open across chunks;
/// `citations` accumulates the citation list the first time it appears.
fn parse_stream_chunk(
    data: &str,
    thinking: &mut bool,
    citations: &mut Vec<String>,
) -> Vec<StreamEvent> {
    let Ok(chunk) = serde_json::from_str::<Value>(data) else {
        // Providers occasionally interleave comments or partial frames.
        return Vec::new();
    };

    let mut events = Vec::new();

    if citations.is_empty()
        && let Some(list) = chunk.get("citations").and_then(Value::as_array)
    {
        citations.extend(
            list.iter()
                .filter_map(Value::as_str)
                .map(String::from),
        );
    }

    let delta = &chunk["choices"][0]["delta"];

    if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str)
        && !text.is_empty()
    {
        if !*thinking {
            *thinking = true;
            events.push(StreamEvent::ThinkStart);
        }
        events.push(StreamEvent::ThinkToken(text.to_string()));
    }

    if let Some(text) = delta.get("content").and_then(Value::as_str)
        && !text.is_empty()
    {
        if *thinking {
            *thinking = false;
            events.push(StreamEvent::ThinkEnd);
        }
        events.push(StreamEvent::Token(text.to_string()));
    }

    events
}

/// Pull the final text, reasoning text, and citations out of a
/// non-streaming completion body.
fn parse_completion(body: &Value) -> (String, String, Vec<String>) {
    let message = &body["choices"][0]["message"];
    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let reasoning = message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let citations = body
        .get("citations")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    (text, reasoning, citations)
}

impl ChatBackend for OpenAiBackend {
    fn open_stream(&self, payload: ProviderPayload, cancel: CancellationToken) -> EventStream {
        let client = self.client.clone();
        let profile = self.profile.clone();
        let url = self.completions_url();

        let streaming = payload.stream && profile.supports_streaming;

        Box::pin(stream! {
            let body = request_body(&payload, streaming);
            let response = client
                .post(&url)
                .bearer_auth(&profile.api_key)
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
                let mut citations: Vec<String> = Vec::new();

                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let Some(event) = events.next().await else {
                        break;
                    };
                    match event {
                        Ok(event) => {
                            if event.data == "[DONE]" {
                                break;
                            }
                            for parsed in
                                parse_stream_chunk(&event.data, &mut thinking, &mut citations)
                            {
                                if cancel.is_cancelled() {
                                    return;
                                }
                                yield parsed;
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
                if !citations.is_empty() {
                    yield StreamEvent::Citations(citations);
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

                let (text, reasoning, citations) = parse_completion(&body);
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

                if !citations.is_empty() {
                    yield StreamEvent::Citations(citations);
                }
                yield StreamEvent::End;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FormattedMessage;

    fn payload_with_messages(messages: Vec<FormattedMessage>) -> ProviderPayload {
        ProviderPayload {
            model: "gpt-4o".into(),
            temperature: 0.5,
            reason: 0,
            stream: true,
            max_tokens: None,
            system: None,
            messages,
        }
    }

    #[test]
    fn body_carries_model_and_stream_flag() {
        let payload = payload_with_messages(vec![FormattedMessage::text("user", "hi")]);
        let body = request_body(&payload, true);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert!(body.get("reasoning_effort").is_none());
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn reasoning_level_maps_to_effort() {
        let mut payload = payload_with_messages(vec![FormattedMessage::text("user", "hi")]);
        payload.reason = 2;
        let body = request_body(&payload, false);
        assert_eq!(body["reasoning_effort"], "medium");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn image_parts_become_image_url_blocks() {
        let payload = payload_with_messages(vec![FormattedMessage {
            role: "user".into(),
            parts: vec![
                FormattedPart::Text("look".into()),
                FormattedPart::InlineImage {
                    media_type: "image/png".into(),
                    data: "QUJD".into(),
                },
            ],
        }]);

        let messages = wire_messages(&payload);
        let blocks = messages[0]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "image_url");
        assert_eq!(
            blocks[1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }

    #[test]
    fn content_delta_yields_token() {
        let mut thinking = false;
        let mut citations = Vec::new();
        let events = parse_stream_chunk(
            r#"{"choices":[{"delta":{"content":"Hi"}}]}"#,
            &mut thinking,
            &mut citations,
        );
        assert_eq!(events, vec![StreamEvent::Token("Hi".into())]);
    }

    #[test]
    fn reasoning_delta_opens_and_closes_think_block() {
        let mut thinking = false;
        let mut citations = Vec::new();

        let first = parse_stream_chunk(
            r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#,
            &mut thinking,
            &mut citations,
        );
        assert_eq!(
            first,
            vec![StreamEvent::ThinkStart, StreamEvent::ThinkToken("hmm".into())]
        );
        assert!(thinking);

        let second = parse_stream_chunk(
            r#"{"choices":[{"delta":{"content":"answer"}}]}"#,
            &mut thinking,
            &mut citations,
        );
        assert_eq!(
            second,
            vec![StreamEvent::ThinkEnd, StreamEvent::Token("answer".into())]
        );
        assert!(!thinking);
    }

    #[test]
    fn citations_are_collected_once() {
        let mut thinking = false;
        let mut citations = Vec::new();

        parse_stream_chunk(
            r#"{"citations":["https://a","https://b"],"choices":[{"delta":{"content":"x"}}]}"#,
            &mut thinking,
            &mut citations,
        );
        parse_stream_chunk(
            r#"{"citations":["https://a","https://b"],"choices":[{"delta":{"content":"y"}}]}"#,
            &mut thinking,
            &mut citations,
        );

        assert_eq!(citations, vec!["https://a", "https://b"]);
    }

    #[test]
    fn malformed_chunk_is_skipped() {
        let mut thinking = false;
        let mut citations = Vec::new();
        assert!(parse_stream_chunk("not json", &mut thinking, &mut citations).is_empty());
    }

    #[test]
    fn completion_parse_extracts_all_fields() {
        let body = serde_json::json!({
            "citations": ["https://src"],
            "choices": [{"message": {
                "content": "final",
                "reasoning_content": "because",
            }}],
        });
        let (text, reasoning, citations) = parse_completion(&body);
        assert_eq!(text, "final");
        assert_eq!(reasoning, "because");
        assert_eq!(citations, vec!["https://src"]);
    }
}
