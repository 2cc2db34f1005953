use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use shared::config::{PromptConfig, ProviderProfile, SystemPlacement};
use shared::models::{ChatRequest, MessageContent, Part, StoredMessage};
use std::path::Path;
use tracing::warn;

use crate::providers::{FormattedMessage, FormattedPart, ProviderPayload};

/// Directive appended to the last user text part when the persona override
/// is active.
pub const STAY_IN_CHARACTER_SUFFIX: &str = " STAY IN CHARACTER";

/// Highest accepted reasoning-effort level.
const MAX_REASON: u8 = 3;

/// Build the provider payload for one turn.
///
/// `window` is the bounded history suffix with the incoming user message
/// already appended. The input is never mutated; every injection happens
/// on the copy, so formatting the same stored history twice can never
/// stack persona suffixes.
pub async fn format_turn(
    window: &[StoredMessage],
    request: &ChatRequest,
    profile: &ProviderProfile,
    prompts: &PromptConfig,
    upload_dir: &Path,
) -> ProviderPayload {
    let mut messages = Vec::with_capacity(window.len() + 1);
    for message in window {
        messages.push(format_message(message, upload_dir).await);
    }

    let persona = if request.dan {
        prompts.persona_override.clone()
    } else {
        None
    };

    if persona.is_some() {
        append_persona_suffix(&mut messages);
    }

    let mut directives = vec![prompts.base_instruction.clone()];
    if !request.system_message.is_empty() {
        directives.push(request.system_message.clone());
    }
    if let Some(persona) = persona {
        directives.push(persona);
    }
    let directive_text = directives.join("\n\n");

    let system = match profile.system_placement {
        SystemPlacement::TopLevelField => Some(directive_text),
        SystemPlacement::LeadingMessage => {
            messages.insert(
                0,
                FormattedMessage::text(profile.admin_role.clone(), directive_text),
            );
            None
        }
    };

    ProviderPayload {
        model: request.model.clone(),
        temperature: request.temperature,
        reason: request.reason.min(MAX_REASON),
        stream: request.stream,
        max_tokens: profile.max_tokens,
        system,
        messages,
    }
}

async fn format_message(message: &StoredMessage, upload_dir: &Path) -> FormattedMessage {
    let role = message.role.as_str().to_string();

    match &message.content {
        MessageContent::Text(text) => FormattedMessage::text(role, text.clone()),
        MessageContent::Parts(parts) => {
            let mut formatted = Vec::with_capacity(parts.len());
            for part in parts {
                formatted.push(format_part(part, upload_dir).await);
            }
            FormattedMessage {
                role,
                parts: formatted,
            }
        }
    }
}

async fn format_part(part: &Part, upload_dir: &Path) -> FormattedPart {
    match part {
        Part::Text { content } => FormattedPart::Text(content.clone()),
        // File attachments never travel upstream as raw binary: they are
        // rewritten to text carrying a file-name marker here.
        Part::File { name, content } => {
            FormattedPart::Text(format!("[[{name}]]\n{}", extract_file_text(content)))
        }
        Part::Image { name, content } => {
            let media_type = mime_guess::from_path(name)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            let data = read_image_base64(upload_dir, content).await;
            FormattedPart::InlineImage { media_type, data }
        }
    }
}

/// Decode the text of a base64 data-URL attachment.
///
/// Any decode failure yields an empty string for that part only; the turn
/// proceeds.
fn extract_file_text(data_url: &str) -> String {
    let encoded = data_url
        .rsplit_once("base64,")
        .map_or(data_url, |(_, tail)| tail);

    BASE64
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Read a stored image and base64-encode it. Only the file-name component
/// of the stored path is honored, so a document can never reference files
/// outside the upload directory. Read failures yield an empty payload.
async fn read_image_base64(upload_dir: &Path, stored_path: &str) -> String {
    let Some(file_name) = Path::new(stored_path).file_name() else {
        return String::new();
    };

    match tokio::fs::read(upload_dir.join(file_name)).await {
        Ok(bytes) => BASE64.encode(bytes),
        Err(err) => {
            warn!(path = %stored_path, error = %err, "image read failed; sending empty payload");
            String::new()
        }
    }
}

/// Append the persona directive to the last user text part. Purely a
/// string append on the working copy.
fn append_persona_suffix(messages: &mut [FormattedMessage]) {
    let Some(message) = messages
        .iter_mut()
        .rev()
        .find(|message| message.role == "user")
    else {
        return;
    };

    let last_text = message
        .parts
        .iter_mut()
        .rev()
        .find_map(|part| match part {
            FormattedPart::Text(text) => Some(text),
            FormattedPart::InlineImage { .. } => None,
        });

    match last_text {
        Some(text) => text.push_str(STAY_IN_CHARACTER_SUFFIX),
        None => message.parts.push(FormattedPart::Text(
            STAY_IN_CHARACTER_SUFFIX.trim_start().to_string(),
        )),
    }
}
