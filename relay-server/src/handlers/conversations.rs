use axum::{
    Json,
    extract::{Extension, Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use shared::config::ProviderKey;
use shared::models::ConversationDoc;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::auth::RequestContext,
    services::alias,
};

/// Body of `POST /new_conversation`.
#[derive(Debug, Deserialize)]
pub struct NewConversationRequest {
    pub user_message: String,
    pub model: String,
    pub temperature: f32,
    pub reason: u8,
    pub system_message: String,
}

/// Body of `PUT /conversation/{id}/rename`.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub alias: String,
}

fn current_user(context: &RequestContext) -> AppResult<Uuid> {
    context
        .user_id
        .ok_or_else(|| ApiError::unauthorized("not authenticated"))
}

/// `GET /conversations` — sidebar listing.
#[instrument(name = "conversations.list", skip(state, context))]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<Value>> {
    let user_id = current_user(&context)?;
    let summaries = state.conversations.list(user_id).await?;

    let conversations: Vec<Value> = summaries
        .into_iter()
        .map(|summary| {
            json!({
                "conversation_id": summary.conversation_id,
                "alias": summary.alias,
            })
        })
        .collect();

    Ok(Json(json!({ "conversations": conversations })))
}

/// `GET /conversation/{id}` — full history for the chat view.
#[instrument(name = "conversations.get", skip(state, context))]
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let user_id = current_user(&context)?;
    let doc = state
        .conversations
        .fetch(user_id, conversation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    Ok(Json(json!({
        "conversation_id": doc.conversation_id,
        "model": doc.model,
        "temperature": doc.temperature,
        "reason": doc.reason,
        "system_message": doc.system_message,
        "messages": doc.messages,
    })))
}

/// `POST /new_conversation` — create an empty conversation with a
/// generated alias. Alias generation is cosmetic: failures fall back to a
/// fixed title rather than failing the call.
#[instrument(name = "conversations.create", skip(state, context, request))]
pub async fn new_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<NewConversationRequest>,
) -> AppResult<Json<Value>> {
    let user_id = current_user(&context)?;

    let alias = match state.provider(ProviderKey::Gpt) {
        Some(entry) => {
            alias::generate_alias(
                entry.backend.as_ref(),
                &state.config.providers.alias_model,
                &request.user_message,
            )
            .await
        }
        None => alias::DEFAULT_ALIAS.to_string(),
    };

    let conversation_id = Uuid::new_v4();
    let doc = ConversationDoc {
        user_id,
        conversation_id,
        alias: alias.clone(),
        model: request.model,
        temperature: request.temperature,
        reason: request.reason,
        system_message: request.system_message,
        messages: Vec::new(),
    };
    state.conversations.upsert(&doc).await?;

    Ok(Json(json!({
        "message": "New conversation created",
        "alias": alias,
        "conversation_id": conversation_id,
    })))
}

/// `PUT /conversation/{id}/rename`.
#[instrument(name = "conversations.rename", skip(state, context, request))]
pub async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<RenameRequest>,
) -> AppResult<Json<Value>> {
    let user_id = current_user(&context)?;
    let renamed = state
        .conversations
        .rename(user_id, conversation_id, &request.alias)
        .await?;

    if !renamed {
        return Err(ApiError::not_found("Conversation not found"));
    }

    Ok(Json(json!({
        "message": "Conversation renamed successfully",
        "conversation_id": conversation_id,
        "new_alias": request.alias,
    })))
}

/// `DELETE /conversation/all`.
#[instrument(name = "conversations.delete_all", skip(state, context))]
pub async fn delete_all_conversations(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<Value>> {
    let user_id = current_user(&context)?;
    let deleted = state.conversations.delete_all(user_id).await?;

    if deleted == 0 {
        return Err(ApiError::not_found(
            "Conversation not found or already deleted",
        ));
    }

    Ok(Json(json!({ "message": "Conversations deleted successfully" })))
}

/// `DELETE /conversation/{id}`.
#[instrument(name = "conversations.delete", skip(state, context))]
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let user_id = current_user(&context)?;
    let deleted = state.conversations.delete(user_id, conversation_id).await?;

    if !deleted {
        return Err(ApiError::not_found(
            "Conversation not found or already deleted",
        ));
    }

    Ok(Json(json!({
        "message": "Conversation deleted successfully",
        "conversation_id": conversation_id,
    })))
}

/// `DELETE /conversation/{id}/{start_index}` — drop the history tail from
/// `start_index` onward.
#[instrument(name = "conversations.truncate", skip(state, context))]
pub async fn truncate_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path((conversation_id, start_index)): Path<(Uuid, usize)>,
) -> AppResult<Json<Value>> {
    let user_id = current_user(&context)?;

    let doc = state
        .conversations
        .fetch(user_id, conversation_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    if start_index >= doc.messages.len() {
        return Err(ApiError::bad_request("startIndex is out of range"));
    }

    state
        .conversations
        .truncate(user_id, conversation_id, start_index)
        .await?;

    Ok(Json(json!({
        "message": "Conversation truncated successfully.",
        "conversation_id": conversation_id,
    })))
}
