use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
    response::{AppendHeaders, IntoResponse},
};
use cookie::{Cookie, SameSite, time::Duration as CookieDuration};
use serde_json::{Value, json};
use shared::models::{AuthStatus, LoginRequest, RegisterRequest};
use std::sync::Arc;
use tracing::instrument;

use crate::{
    app_state::AppState,
    auth::session,
    http::error::{ApiError, AppResult},
    middleware::auth::extract_session_cookie,
};

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ApiError::internal_server_error(err.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// `POST /register`.
#[instrument(name = "auth.register", skip(state, request))]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<Json<Value>> {
    if request.email.is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("email and password are required"));
    }

    let password_hash = hash_password(&request.password)?;
    let user = state
        .users
        .create(&request.name, &request.email, &password_hash)
        .await?;

    Ok(Json(json!({
        "message": "Registration Success!",
        "user_id": user.user_id,
    })))
}

/// `POST /login` — verifies credentials and sets the HttpOnly session
/// cookie.
#[instrument(name = "auth.login", skip(state, request))]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let record = state
        .users
        .find_by_email(&request.email)
        .await?
        .filter(|record| verify_password(&request.password, &record.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Incorrect Email or Password"))?;

    let token = session::issue(
        &state.config.session.signing_key,
        &record.user,
        state.config.session.ttl_hours,
    )
    .map_err(|err| ApiError::internal_server_error(err.to_string()))?;

    let cookie = Cookie::build((state.config.session.cookie_name.clone(), token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie.to_string())]),
        Json(json!({
            "message": "Login Success.",
            "user_id": record.user.user_id,
            "name": record.user.name,
        })),
    ))
}

/// `POST /logout` — expires the session cookie.
#[instrument(name = "auth.logout", skip(state))]
pub async fn logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cookie = Cookie::build((state.config.session.cookie_name.clone(), ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(CookieDuration::ZERO)
        .build();

    (
        AppendHeaders([(header::SET_COOKIE, cookie.to_string())]),
        Json(json!({ "message": "Successfully Logged Out" })),
    )
}

/// `GET /auth/status` — session probe for the web client; never 401s.
#[instrument(name = "auth.status", skip(state, headers))]
pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<AuthStatus> {
    let Some(token) = extract_session_cookie(&headers, &state.config.session.cookie_name) else {
        return Json(AuthStatus::anonymous());
    };

    match session::verify(&state.config.session.signing_key, &token) {
        Ok(claims) => Json(AuthStatus {
            logged_in: true,
            user_id: Some(claims.sub),
            name: Some(claims.name),
            email: Some(claims.email),
        }),
        Err(_) => Json(AuthStatus::anonymous()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("hunter2", "not-a-phc-string"));
    }
}
