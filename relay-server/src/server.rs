use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::json;
use shared::config::{Config, LogFormat};
use sqlx::postgres::PgPoolOptions;
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    handlers::{auth, chat, conversations, upload},
    middleware::auth::{AuthState, auth_middleware},
    store::{ConversationStore, UserStore, memory::MemoryStore, postgres::PostgresStore},
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Service is running!" }))
}

async fn health(State(_state): State<Arc<AppState>>) -> StatusCode {
    StatusCode::OK
}

/// Initializes the tracing subscriber using the provided configuration.
pub fn initialize_tracing(config: &Config) {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    });

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true);

    if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }
}

/// Creates the CORS layer.
///
/// Credentials (the session cookie) are only allowed alongside an explicit
/// origin list; a wildcard origin downgrades to credential-less CORS.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::Method;

    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .max_age(Duration::from_secs(3600));

    if config.server.allowed_origins.is_empty() {
        cors.allow_origin(AllowOrigin::any())
    } else {
        let origins = config
            .server
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors.allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}

/// Creates the API router: public auth routes plus the session-protected
/// chat, conversation, and upload surface.
pub fn create_api_router(state: Arc<AppState>) -> Router {
    let auth_state = AuthState {
        signing_key: state.config.session.signing_key.clone(),
        cookie_name: state.config.session.cookie_name.clone(),
    };

    let protected = Router::new()
        .route("/gpt", post(chat::gpt))
        .route("/claude", post(chat::claude))
        .route("/gemini", post(chat::gemini))
        .route("/deepseek", post(chat::deepseek))
        .route("/llama", post(chat::llama))
        .route("/perplexity", post(chat::perplexity))
        .route("/grok", post(chat::grok))
        .route("/conversations", get(conversations::list_conversations))
        .route("/new_conversation", post(conversations::new_conversation))
        .route("/conversation/all", delete(conversations::delete_all_conversations))
        .route(
            "/conversation/{conversation_id}",
            get(conversations::get_conversation).delete(conversations::delete_conversation),
        )
        .route(
            "/conversation/{conversation_id}/rename",
            put(conversations::rename_conversation),
        )
        .route(
            "/conversation/{conversation_id}/{start_index}",
            delete(conversations::truncate_conversation),
        )
        .route("/upload", post(upload::upload))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/auth/status", get(auth::status))
        .merge(protected)
        .with_state(state)
}

/// Build the full application router with CORS and metrics wiring.
pub fn create_app_router(state: Arc<AppState>, metrics: PrometheusHandle) -> Router {
    let cors = create_cors_layer(&state.config);

    create_api_router(state)
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics))
        .layer(cors)
}

async fn create_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn ConversationStore>, Arc<dyn UserStore>)> {
    if config.database.url.is_empty() {
        warn!("no database URL configured; falling back to the in-memory store");
        let store = Arc::new(MemoryStore::new());
        return Ok((store.clone(), store));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let store = PostgresStore::new(pool);
    store.bootstrap().await?;

    let store = Arc::new(store);
    Ok((store.clone(), store))
}

/// Resolves when a shutdown signal is received.
pub async fn create_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutting down...");
}

/// Starts the gateway and serves until shutdown.
///
/// # Errors
/// Returns an error when the store connection or the listener bind fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    let metrics = metrics_handle();

    let config = Arc::new(config);
    let (conversations, users) = create_stores(&config).await?;
    let state = AppState::build(config.clone(), conversations, users);
    let app = create_app_router(state, metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("ChatRelay listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> Arc<AppState> {
        let store = Arc::new(MemoryStore::new());
        AppState::build(Arc::new(Config::with_defaults()), store.clone(), store)
    }

    #[test]
    fn api_router_builds() {
        let router = create_api_router(test_state());
        assert!(router.has_routes());
    }

    #[test]
    fn cors_layer_accepts_origin_lists() {
        let mut config = Config::with_defaults();
        config.server.allowed_origins = vec!["https://chat.example.com".into()];
        let _layer = create_cors_layer(&config);
    }
}
