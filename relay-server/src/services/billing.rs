use shared::models::BillingRates;

use crate::providers::{FormattedMessage, FormattedPart, ProviderPayload};

/// Fixed per-message framing overhead, in token-equivalents.
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Flat token-equivalent charged per inline image part, approximating
/// provider-side image pricing.
const IMAGE_TOKEN_EQUIVALENT: u64 = 1000;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Heuristic token count for a piece of text.
///
/// One deliberately fixed scheme is used for every provider even though
/// real tokenizers differ per model; billing is a documented approximation,
/// not an exact meter. Whitespace-splitting alone undercounts languages
/// written without spaces, so the character-based floor backs it up.
#[must_use]
pub fn approximate_tokens(text: &str) -> u64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }

    let words = trimmed.split_whitespace().count() as u64;
    let chars = trimmed.chars().count() as u64;
    words.max(chars.div_ceil(4))
}

/// Token-equivalents for one formatted message, including framing overhead.
#[must_use]
pub fn message_tokens(message: &FormattedMessage) -> u64 {
    let content: u64 = message
        .parts
        .iter()
        .map(|part| match part {
            FormattedPart::Text(text) => approximate_tokens(text),
            FormattedPart::InlineImage { .. } => IMAGE_TOKEN_EQUIVALENT,
        })
        .sum();

    MESSAGE_OVERHEAD_TOKENS + approximate_tokens(&message.role) + content
}

/// Token-equivalents for the full request side of a turn: every formatted
/// message plus any top-level system text (counted as one synthetic
/// message).
#[must_use]
pub fn input_tokens(payload: &ProviderPayload) -> u64 {
    let mut total: u64 = payload.messages.iter().map(message_tokens).sum();
    if let Some(system) = &payload.system {
        total += MESSAGE_OVERHEAD_TOKENS + approximate_tokens("system") + approximate_tokens(system);
    }
    total
}

/// Estimate the monetary cost of one turn.
///
/// `response` is the accumulated assistant text (empty when the stream
/// produced nothing). Rates are prices per one million tokens; the search
/// surcharge, when present, applies to input and output combined.
#[must_use]
pub fn estimate_cost(payload: &ProviderPayload, response: &str, rates: &BillingRates) -> f64 {
    let input = input_tokens(payload);
    let output = approximate_tokens(response);

    #[allow(clippy::cast_precision_loss)]
    let (input, output) = (input as f64, output as f64);

    let mut cost = input * rates.input / TOKENS_PER_MILLION
        + output * rates.output / TOKENS_PER_MILLION;
    if let Some(search) = rates.search {
        cost += (input + output) * search / TOKENS_PER_MILLION;
    }

    cost.max(0.0)
}
