use axum::{
    Json,
    extract::{Multipart, State},
};
use serde_json::{Value, json};
use std::{path::Path, sync::Arc};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
};

/// `POST /upload` — store an image for later inline embedding.
///
/// The stored name is prefixed with a fresh UUID so uploads never collide;
/// the returned `file_path` is what image parts reference from
/// conversation history.
#[instrument(name = "upload.store", skip(state, multipart))]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(err.to_string()))?;

        // Keep only the final path component of the client-supplied name.
        let file_name = Path::new(&original)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();

        let dir = &state.config.uploads.dir;
        tokio::fs::create_dir_all(dir).await?;

        let stored = format!("{}_{file_name}", Uuid::new_v4());
        let path = dir.join(&stored);
        tokio::fs::write(&path, &data).await?;

        return Ok(Json(json!({
            "file_name": file_name,
            "file_path": path.to_string_lossy(),
        })));
    }

    Err(ApiError::bad_request("missing file field"))
}
