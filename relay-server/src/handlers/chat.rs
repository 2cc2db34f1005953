use axum::{
    Json,
    extract::{Extension, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use shared::config::ProviderKey;
use shared::models::ChatRequest;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::instrument;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::auth::RequestContext,
    services::turn::{TurnFrame, run_turn},
};

/// Frames buffered towards a slow client before the relay loop parks.
const CLIENT_CHANNEL_CAPACITY: usize = 32;

/// Shared implementation of every provider endpoint: spawn the turn and
/// relay its frames as SSE. Dropping the response body (client disconnect)
/// closes the channel, which the orchestrator observes as a failed send.
#[instrument(name = "chat.stream", skip(state, context, request), fields(provider = %key))]
fn stream_response(
    state: &Arc<AppState>,
    context: &RequestContext,
    key: ProviderKey,
    request: ChatRequest,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>> {
    let user_id = context
        .user_id
        .ok_or_else(|| ApiError::unauthorized("not authenticated"))?;

    let services = state
        .turn_services(key)
        .ok_or_else(|| ApiError::service_unavailable(format!("provider {key} not configured")))?;

    let (tx, rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    tokio::spawn(run_turn(services, user_id, request, tx));

    let stream = ReceiverStream::new(rx).map(|frame| {
        let event = match frame {
            TurnFrame::Data(frame) => {
                Event::default().data(serde_json::to_string(&frame).unwrap_or_default())
            }
            TurnFrame::End => Event::default().event("end"),
        };
        Ok::<_, Infallible>(event)
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

macro_rules! provider_endpoint {
    ($name:ident, $key:expr, $doc:literal) => {
        #[doc = $doc]
        pub async fn $name(
            State(state): State<Arc<AppState>>,
            Extension(context): Extension<RequestContext>,
            Json(request): Json<ChatRequest>,
        ) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>> {
            stream_response(&state, &context, $key, request)
        }
    };
}

provider_endpoint!(gpt, ProviderKey::Gpt, "Streaming chat against OpenAI.");
provider_endpoint!(claude, ProviderKey::Claude, "Streaming chat against Anthropic.");
provider_endpoint!(gemini, ProviderKey::Gemini, "Streaming chat against Gemini.");
provider_endpoint!(deepseek, ProviderKey::Deepseek, "Streaming chat against DeepSeek.");
provider_endpoint!(llama, ProviderKey::Llama, "Streaming chat against the Llama API.");
provider_endpoint!(
    perplexity,
    ProviderKey::Perplexity,
    "Streaming chat against Perplexity."
);
provider_endpoint!(grok, ProviderKey::Grok, "Streaming chat against xAI Grok.");
