//! End-to-end turn tests: a scripted provider backend plus the in-memory
//! store, driven through the real orchestrator.

use async_stream::stream;
use shared::config::{PromptConfig, ProviderKey, ProvidersConfig};
use shared::models::{ChatRequest, MessageContent, Role, StoredMessage, StreamFrame};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use server::providers::{ChatBackend, EventStream, ProviderPayload, StreamEvent};
use server::services::billing;
use server::services::formatter;
use server::services::turn::{EMPTY_RESPONSE_PLACEHOLDER, TurnFrame, TurnServices, run_turn};
use server::store::memory::MemoryStore;
use server::store::{ConversationStore, UserStore};

/// Backend that replays a fixed event script, optionally pacing events so
/// cancellation tests have time to interleave. Counts how many events it
/// actually yielded.
struct ScriptedBackend {
    events: Vec<StreamEvent>,
    pace: Option<Duration>,
    yielded: Arc<Mutex<usize>>,
}

impl ScriptedBackend {
    fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            pace: None,
            yielded: Arc::new(Mutex::new(0)),
        }
    }

    fn paced(events: Vec<StreamEvent>, pace: Duration) -> Self {
        Self {
            events,
            pace: Some(pace),
            yielded: Arc::new(Mutex::new(0)),
        }
    }

    fn yielded(&self) -> usize {
        *self.yielded.lock().unwrap()
    }
}

impl ChatBackend for ScriptedBackend {
    fn open_stream(&self, _payload: ProviderPayload, cancel: CancellationToken) -> EventStream {
        let events = self.events.clone();
        let pace = self.pace;
        let yielded = self.yielded.clone();

        Box::pin(stream! {
            for event in events {
                if let Some(pace) = pace {
                    tokio::time::sleep(pace).await;
                }
                if cancel.is_cancelled() {
                    return;
                }
                *yielded.lock().unwrap() += 1;
                yield event;
            }
        })
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    backend: Arc<ScriptedBackend>,
    user_id: Uuid,
    conversation_id: Uuid,
}

impl Fixture {
    async fn new(backend: ScriptedBackend) -> Self {
        let store = Arc::new(MemoryStore::new());
        let user = store.create("test", "test@example.com", "hash").await.unwrap();
        Self {
            store,
            backend: Arc::new(backend),
            user_id: user.user_id,
            conversation_id: Uuid::new_v4(),
        }
    }

    fn services(&self) -> TurnServices {
        let providers = ProvidersConfig::with_defaults();
        TurnServices {
            conversations: self.store.clone(),
            users: self.store.clone(),
            backend: self.backend.clone(),
            profile: providers.profile(ProviderKey::Gpt).unwrap().clone(),
            prompts: prompts(),
            upload_dir: PathBuf::from("uploads"),
        }
    }

    fn request(&self, user_message: &str) -> ChatRequest {
        ChatRequest {
            conversation_id: self.conversation_id,
            model: "gpt-4o".into(),
            in_billing: 2.5,
            out_billing: 10.0,
            search_billing: None,
            temperature: 0.5,
            reason: 0,
            system_message: String::new(),
            user_message: MessageContent::Text(user_message.into()),
            dan: false,
            stream: true,
        }
    }

    async fn stored_messages(&self) -> Vec<StoredMessage> {
        self.store
            .fetch(self.user_id, self.conversation_id)
            .await
            .unwrap()
            .map(|doc| doc.messages)
            .unwrap_or_default()
    }

    async fn billing(&self) -> f64 {
        self.store
            .find_by_id(self.user_id)
            .await
            .unwrap()
            .unwrap()
            .billing
    }
}

fn prompts() -> PromptConfig {
    PromptConfig {
        base_instruction: "Use Markdown.".into(),
        persona_override: None,
    }
}

/// Run one turn to completion, collecting every frame the client would see.
async fn drive_turn(fixture: &Fixture, request: ChatRequest) -> Vec<TurnFrame> {
    let (tx, mut rx) = mpsc::channel(32);
    let handle = tokio::spawn(run_turn(fixture.services(), fixture.user_id, request, tx));

    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    handle.await.unwrap();
    frames
}

fn content(text: &str) -> TurnFrame {
    TurnFrame::Data(StreamFrame::content(text))
}

#[tokio::test]
async fn happy_path_relays_tokens_and_persists_turn() {
    let fixture = Fixture::new(ScriptedBackend::new(vec![
        StreamEvent::Token("Hi".into()),
        StreamEvent::Token(" there".into()),
        StreamEvent::End,
    ]))
    .await;

    let frames = drive_turn(&fixture, fixture.request("hello")).await;

    assert_eq!(
        frames,
        vec![content("Hi"), content(" there"), TurnFrame::End]
    );

    let messages = fixture.stored_messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], StoredMessage::user("hello"));
    assert_eq!(messages[1], StoredMessage::assistant("Hi there"));

    // Billing matches the estimator over the same formatted payload.
    let providers = ProvidersConfig::with_defaults();
    let window = vec![StoredMessage::user("hello")];
    let payload = formatter::format_turn(
        &window,
        &fixture.request("hello"),
        providers.profile(ProviderKey::Gpt).unwrap(),
        &prompts(),
        std::path::Path::new("uploads"),
    )
    .await;
    let expected = billing::estimate_cost(&payload, "Hi there", &fixture.request("hello").rates());

    let billed = fixture.billing().await;
    assert!(billed > 0.0);
    assert!((billed - expected).abs() < 1e-12);
}

#[tokio::test]
async fn upstream_error_relays_error_and_persists_partial() {
    let fixture = Fixture::new(ScriptedBackend::new(vec![
        StreamEvent::Token("Hi".into()),
        StreamEvent::Error("boom".into()),
    ]))
    .await;

    let frames = drive_turn(&fixture, fixture.request("hello")).await;

    // One token, then the error frame; no end marker after an error.
    assert_eq!(
        frames,
        vec![content("Hi"), TurnFrame::Data(StreamFrame::error("boom"))]
    );

    let messages = fixture.stored_messages().await;
    assert_eq!(messages[1], StoredMessage::assistant("Hi"));

    // Billing was computed on the partial text, not skipped.
    assert!(fixture.billing().await > 0.0);
}

#[tokio::test]
async fn client_disconnect_cancels_producer_and_persists_prefix() {
    let fixture = Fixture::new(ScriptedBackend::paced(
        vec![
            StreamEvent::Token("t1 ".into()),
            StreamEvent::Token("t2".into()),
            StreamEvent::Token(" t3".into()),
            StreamEvent::Token(" t4".into()),
            StreamEvent::Token(" t5".into()),
            StreamEvent::End,
        ],
        Duration::from_millis(40),
    ))
    .await;

    // Capacity 1 so the orchestrator cannot run ahead of the client.
    let (tx, mut rx) = mpsc::channel(1);
    let handle = tokio::spawn(run_turn(
        fixture.services(),
        fixture.user_id,
        fixture.request("hello"),
        tx,
    ));

    assert_eq!(rx.recv().await, Some(content("t1 ")));
    assert_eq!(rx.recv().await, Some(content("t2")));
    drop(rx);

    handle.await.unwrap();

    // Only the delivered prefix was persisted, and the producer stopped
    // well short of draining the script.
    let messages = fixture.stored_messages().await;
    assert_eq!(messages[1], StoredMessage::assistant("t1 t2"));
    assert!(fixture.backend.yielded() < 5);
    assert!(fixture.billing().await > 0.0);
}

#[tokio::test]
async fn thinking_block_is_wrapped_for_client_and_excluded_from_history() {
    let fixture = Fixture::new(ScriptedBackend::new(vec![
        StreamEvent::ThinkStart,
        StreamEvent::ThinkToken("x".into()),
        StreamEvent::ThinkEnd,
        StreamEvent::Token("answer".into()),
        StreamEvent::End,
    ]))
    .await;

    let mut request = fixture.request("hello");
    request.reason = 2;
    let frames = drive_turn(&fixture, request).await;

    assert_eq!(
        frames,
        vec![
            content("<think>\n"),
            content("x"),
            content("\n</think>\n\n"),
            content("answer"),
            TurnFrame::End,
        ]
    );

    // Reasoning stays out of the persisted message by default policy.
    let messages = fixture.stored_messages().await;
    assert_eq!(messages[1], StoredMessage::assistant("answer"));
}

#[tokio::test]
async fn empty_stream_stores_placeholder_not_empty_string() {
    let fixture = Fixture::new(ScriptedBackend::new(vec![StreamEvent::End])).await;

    let frames = drive_turn(&fixture, fixture.request("hello")).await;
    assert_eq!(frames, vec![TurnFrame::End]);

    let messages = fixture.stored_messages().await;
    assert_eq!(
        messages[1],
        StoredMessage::assistant(EMPTY_RESPONSE_PLACEHOLDER)
    );
    assert!(!EMPTY_RESPONSE_PLACEHOLDER.is_empty());
}

#[tokio::test]
async fn citations_are_appended_as_trailing_block() {
    let fixture = Fixture::new(ScriptedBackend::new(vec![
        StreamEvent::Token("answer".into()),
        StreamEvent::Citations(vec!["https://a".into(), "https://b".into()]),
        StreamEvent::End,
    ]))
    .await;

    let frames = drive_turn(&fixture, fixture.request("hello")).await;
    assert_eq!(
        frames,
        vec![
            content("answer"),
            content("\n\n---\n[1] https://a\n[2] https://b\n"),
            TurnFrame::End,
        ]
    );

    let messages = fixture.stored_messages().await;
    let MessageContent::Text(stored) = &messages[1].content else {
        panic!("expected text content");
    };
    assert!(stored.starts_with("answer"));
    assert!(stored.contains("[2] https://b"));
}

#[tokio::test]
async fn repeated_turns_alternate_roles_and_billing_is_monotone() {
    let fixture = Fixture::new(ScriptedBackend::new(vec![
        StreamEvent::Token("reply".into()),
        StreamEvent::End,
    ]))
    .await;

    let mut last_billing = 0.0;
    for index in 0..3 {
        drive_turn(&fixture, fixture.request(&format!("question {index}"))).await;

        let billed = fixture.billing().await;
        assert!(billed > last_billing, "billing must increase every turn");
        last_billing = billed;
    }

    let messages = fixture.stored_messages().await;
    assert_eq!(messages.len(), 6);
    for (index, message) in messages.iter().enumerate() {
        let expected = if index % 2 == 0 {
            Role::User
        } else {
            Role::Assistant
        };
        assert_eq!(message.role, expected, "role mismatch at {index}");
    }
}

#[tokio::test]
async fn immediate_upstream_failure_still_finalizes() {
    let fixture = Fixture::new(ScriptedBackend::new(vec![StreamEvent::Error(
        "connect refused".into(),
    )]))
    .await;

    let frames = drive_turn(&fixture, fixture.request("hello")).await;
    assert_eq!(
        frames,
        vec![TurnFrame::Data(StreamFrame::error("connect refused"))]
    );

    // The turn is still recorded: user message plus placeholder.
    let messages = fixture.stored_messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1],
        StoredMessage::assistant(EMPTY_RESPONSE_PLACEHOLDER)
    );
}
