use futures_util::StreamExt;
use metrics::counter;
use shared::config::{PromptConfig, ProviderProfile};
use shared::models::{ChatRequest, ConversationDoc, Role, StoredMessage, StreamFrame};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::providers::{ChatBackend, ProviderPayload, StreamEvent};
use crate::services::{billing, formatter};
use crate::store::{ConversationStore, UserStore};

/// Bound of the producer/consumer event channel. The producer parks here
/// instead of outrunning a slow client.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Stored in place of an assistant message when the stream produced no
/// text, so the history never contains an empty string.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "\u{200b}";

/// Client-side wrapper markers around relayed reasoning tokens.
const THINK_OPEN: &str = "<think>\n";
const THINK_CLOSE: &str = "\n</think>\n\n";

/// Everything one turn needs, dependency-injected by the handler.
pub struct TurnServices {
    pub conversations: Arc<dyn ConversationStore>,
    pub users: Arc<dyn UserStore>,
    pub backend: Arc<dyn ChatBackend>,
    pub profile: ProviderProfile,
    pub prompts: PromptConfig,
    pub upload_dir: PathBuf,
}

impl std::fmt::Debug for TurnServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnServices")
            .field("provider", &self.profile.key)
            .finish()
    }
}

/// One frame of the client-facing stream, before SSE encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnFrame {
    /// A `data:` frame.
    Data(StreamFrame),
    /// The `event: end` terminator.
    End,
}

/// How the relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Completed,
    UpstreamError,
    Disconnected,
}

impl TurnOutcome {
    fn label(self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::UpstreamError => "upstream_error",
            TurnOutcome::Disconnected => "disconnected",
        }
    }
}

/// Drive one chat turn end to end: load history, format, relay the
/// provider stream into `tx`, and reconcile conversation and billing state
/// no matter how the stream ended.
///
/// Client disconnects surface as failed sends on `tx`; the producer is
/// cancelled and whatever text accumulated is persisted and billed.
#[instrument(
    name = "turn.run",
    skip(services, request, tx),
    fields(provider = %services.profile.key, conversation = %request.conversation_id)
)]
pub async fn run_turn(
    services: TurnServices,
    user_id: Uuid,
    request: ChatRequest,
    tx: mpsc::Sender<TurnFrame>,
) {
    // HistoryLoaded: read the stored document, keep the full history for
    // the final upsert, and take the bounded suffix for the provider.
    let doc = match services
        .conversations
        .fetch(user_id, request.conversation_id)
        .await
    {
        Ok(doc) => doc.unwrap_or_else(|| ConversationDoc::new(user_id, request.conversation_id)),
        Err(err) => {
            warn!(error = %err, "history load failed");
            let _ = tx
                .send(TurnFrame::Data(StreamFrame::error(err.to_string())))
                .await;
            return;
        }
    };

    let user_message = StoredMessage {
        role: Role::User,
        content: request.user_message.clone(),
    };

    let mut window = doc.window(services.profile.history_window).to_vec();
    window.push(user_message.clone());

    // Formatted: this payload is also the billing input, captured before
    // the stream starts.
    let payload = formatter::format_turn(
        &window,
        &request,
        &services.profile,
        &services.prompts,
        &services.upload_dir,
    )
    .await;

    // Streaming: the producer drains the provider; the consumer relays to
    // the client. A bounded channel keeps them in step and the token lets
    // either side stop the other.
    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let mut upstream = services.backend.open_stream(payload.clone(), cancel.clone());

    let producer_cancel = cancel.clone();
    let producer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = producer_cancel.cancelled() => break,
                item = upstream.next() => {
                    let Some(event) = item else { break };
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let persist_thinking = services.profile.persist_thinking;
    let mut accumulated = String::new();
    let mut outcome = TurnOutcome::Completed;

    while let Some(event) = event_rx.recv().await {
        // A frame only counts towards the persisted response once the send
        // succeeded; a token the client never took is not part of the turn.
        match event {
            StreamEvent::Token(text) => {
                if send_content(&tx, text.clone()).await.is_err() {
                    outcome = TurnOutcome::Disconnected;
                    break;
                }
                accumulated.push_str(&text);
            }
            StreamEvent::ThinkStart => {
                if send_content(&tx, THINK_OPEN.to_string()).await.is_err() {
                    outcome = TurnOutcome::Disconnected;
                    break;
                }
                if persist_thinking {
                    accumulated.push_str(THINK_OPEN);
                }
            }
            StreamEvent::ThinkToken(text) => {
                if send_content(&tx, text.clone()).await.is_err() {
                    outcome = TurnOutcome::Disconnected;
                    break;
                }
                if persist_thinking {
                    accumulated.push_str(&text);
                }
            }
            StreamEvent::ThinkEnd => {
                if send_content(&tx, THINK_CLOSE.to_string()).await.is_err() {
                    outcome = TurnOutcome::Disconnected;
                    break;
                }
                if persist_thinking {
                    accumulated.push_str(THINK_CLOSE);
                }
            }
            StreamEvent::Citations(citations) => {
                let block = citations_block(&citations);
                if send_content(&tx, block.clone()).await.is_err() {
                    outcome = TurnOutcome::Disconnected;
                    break;
                }
                accumulated.push_str(&block);
            }
            StreamEvent::Error(message) => {
                let _ = tx
                    .send(TurnFrame::Data(StreamFrame::error(message)))
                    .await;
                outcome = TurnOutcome::UpstreamError;
                break;
            }
            StreamEvent::End => break,
        }
    }

    // Stop the producer before reconciling; it must not keep pulling from
    // the provider once the client side is done.
    cancel.cancel();
    drop(event_rx);
    let _ = producer.await;

    // Finalizing: runs on every exit path, including error and disconnect.
    finalize(&services, doc, &request, user_message, &payload, &accumulated).await;

    counter!(
        "relay_turns_total",
        "provider" => services.profile.key.to_string(),
        "outcome" => outcome.label()
    )
    .increment(1);

    if outcome == TurnOutcome::Completed {
        let _ = tx.send(TurnFrame::End).await;
    }
}

async fn send_content(tx: &mpsc::Sender<TurnFrame>, text: String) -> Result<(), ()> {
    tx.send(TurnFrame::Data(StreamFrame::content(text)))
        .await
        .map_err(|_| ())
}

/// Persist the turn and meter its cost. Partial responses are kept; an
/// empty one is replaced with a placeholder so history never holds an
/// empty assistant message.
async fn finalize(
    services: &TurnServices,
    mut doc: ConversationDoc,
    request: &ChatRequest,
    user_message: StoredMessage,
    payload: &ProviderPayload,
    accumulated: &str,
) {
    let response = if accumulated.is_empty() {
        EMPTY_RESPONSE_PLACEHOLDER.to_string()
    } else {
        accumulated.to_string()
    };

    doc.messages.push(user_message);
    doc.messages.push(StoredMessage::assistant(response));
    doc.model = request.model.clone();
    doc.temperature = request.temperature;
    doc.reason = request.reason;
    doc.system_message = request.system_message.clone();

    let cost = billing::estimate_cost(payload, accumulated, &request.rates());
    if let Err(err) = services.users.add_billing(doc.user_id, cost).await {
        warn!(error = %err, user = %doc.user_id, "billing increment failed");
    }

    if let Err(err) = services.conversations.upsert(&doc).await {
        warn!(error = %err, conversation = %doc.conversation_id, "conversation upsert failed");
    }
}

/// Render a buffered citation list as a trailing block.
fn citations_block(citations: &[String]) -> String {
    let mut block = String::from("\n\n---\n");
    for (index, citation) in citations.iter().enumerate() {
        let _ = writeln!(block, "[{}] {citation}", index + 1);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citations_render_numbered_lines() {
        let block = citations_block(&["https://a".to_string(), "https://b".to_string()]);
        assert_eq!(block, "\n\n---\n[1] https://a\n[2] https://b\n");
    }

    #[test]
    fn placeholder_is_not_empty() {
        assert!(!EMPTY_RESPONSE_PLACEHOLDER.is_empty());
    }

    #[test]
    fn outcome_labels_are_distinct() {
        assert_ne!(
            TurnOutcome::Completed.label(),
            TurnOutcome::UpstreamError.label()
        );
        assert_ne!(
            TurnOutcome::Completed.label(),
            TurnOutcome::Disconnected.label()
        );
    }
}
