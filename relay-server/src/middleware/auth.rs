use axum::{
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use cookie::Cookie;
use http::HeaderMap;
use tracing::debug;
use uuid::Uuid;

use crate::auth::session;

/// Per-request identity attached by the auth middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated user, when the session cookie verified.
    pub user_id: Option<Uuid>,
}

/// State for the auth middleware: what cookie to read and how to verify it.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub signing_key: String,
    pub cookie_name: String,
}

/// Reject requests without a valid session cookie and attach the resolved
/// [`RequestContext`] for handlers. Runs before any provider call, so an
/// invalid session can never produce billing.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_session_cookie(req.headers(), &state.cookie_name)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = session::verify(&state.signing_key, &token).map_err(|err| {
        debug!(error = %err, "session verification failed");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(RequestContext {
        user_id: Some(claims.sub),
    });

    Ok(next.run(req).await)
}

/// Pull the named cookie out of the `Cookie` header.
pub fn extract_session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(header::COOKIE)?.to_str().ok()?;
    Cookie::split_parse(value)
        .flatten()
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_extraction_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("other=1; access_token=abc; theme=dark"),
        );

        assert_eq!(
            extract_session_cookie(&headers, "access_token"),
            Some("abc".to_string())
        );
        assert_eq!(extract_session_cookie(&headers, "missing"), None);
    }

    #[test]
    fn absent_header_yields_none() {
        assert_eq!(extract_session_cookie(&HeaderMap::new(), "access_token"), None);
    }
}
