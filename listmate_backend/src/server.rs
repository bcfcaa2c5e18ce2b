use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Path, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::conversation::{ChatReply, ConversationLoop};
use crate::database::TodoDatabase;
use crate::errors::TodoError;
use crate::model::{ChatMessage, CheckIn, CheckInSummary, ListShape, TodoList, UserProfile};
use crate::runtime::BackendRuntime;
use crate::scheduler::CheckInScheduler;

/// Header carrying the user id established by the fronting auth layer.
pub const USER_HEADER: &str = "x-listmate-user";

pub struct ServerState {
    pub db: Arc<TodoDatabase>,
    pub conversation: Arc<ConversationLoop>,
    pub scheduler: Option<Arc<CheckInScheduler>>,
    pub auth: BackendAuthConfig,
}

impl ServerState {
    pub fn from_runtime(runtime: &BackendRuntime, auth: BackendAuthConfig) -> Self {
        Self {
            db: runtime.db.clone(),
            conversation: runtime.conversation.clone(),
            scheduler: runtime.scheduler.clone(),
            auth,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendAuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

impl BackendAuthConfig {
    pub fn required(token: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Required,
            token: Some(token.into()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            mode: AuthMode::Disabled,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    check_ins_running: bool,
}

#[derive(Debug, Deserialize)]
struct UpdateProfileRequest {
    first_name: String,
    #[serde(default)]
    last_name: String,
    phone_number: String,
}

#[derive(Debug, Deserialize)]
struct CreateListRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    current_list: Option<ListShape>,
}

#[derive(Debug, Deserialize)]
struct ScheduleCheckInRequest {
    scheduled_at: DateTime<Utc>,
    #[serde(default)]
    notes: Option<String>,
}

/// Authenticated user id taken from [`USER_HEADER`].
pub struct CurrentUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = TodoError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| CurrentUser(value.to_string()))
            .ok_or_else(|| TodoError::validation(USER_HEADER, "header is required"))
    }
}

/// JSON body whose rejections surface as validation errors.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = TodoError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(TodoError::validation("body", rejection.body_text())),
        }
    }
}

pub async fn serve_backend(runtime: BackendRuntime) -> Result<()> {
    let bind_addr = std::env::var("LISTMATE_BACKEND_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
        .parse::<SocketAddr>()
        .context("Invalid LISTMATE_BACKEND_BIND (expected host:port)")?;

    let auth = load_auth_config()?;
    let state = Arc::new(ServerState::from_runtime(&runtime, auth));

    if let Some(scheduler) = &runtime.scheduler {
        scheduler.start();
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Listmate backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("Backend server failed")?;

    if let Some(scheduler) = &runtime.scheduler {
        scheduler.stop().await;
    }
    Ok(())
}

/// All routes nested under `/v1` behind the service-token middleware.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        .route("/health", get(health))
        .route("/me", put(update_profile))
        .route("/lists", get(list_lists).post(create_list))
        .route(
            "/lists/:id",
            get(get_list).put(merge_list).delete(delete_list),
        )
        .route("/lists/:id/messages", get(list_messages))
        .route("/lists/:id/chat", post(chat))
        .route("/items/:id/check-ins", post(schedule_check_in))
        .route("/check-ins", get(list_check_ins))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().nest("/v1", protected)
}

fn load_auth_config() -> Result<BackendAuthConfig> {
    let mode = parse_auth_mode(std::env::var("LISTMATE_BACKEND_AUTH_MODE").ok())?;
    let token = std::env::var("LISTMATE_BACKEND_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "LISTMATE_BACKEND_TOKEN is required when auth mode is 'required'"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Backend auth mode is disabled; all API routes are unauthenticated");
    }

    Ok(BackendAuthConfig { mode, token })
}

fn parse_auth_mode(raw: Option<String>) -> Result<AuthMode> {
    let normalized = raw
        .unwrap_or_else(|| "required".to_string())
        .trim()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "" | "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid LISTMATE_BACKEND_AUTH_MODE '{}'. Expected 'required' or 'disabled'",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &BackendAuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }
    let Some(token) = auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let expected = format!("Bearer {}", token);
    if auth_value.trim() != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        check_ins_running: state
            .scheduler
            .as_ref()
            .is_some_and(|scheduler| scheduler.is_running()),
    })
}

async fn update_profile(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    JsonBody(body): JsonBody<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, TodoError> {
    let profile = UserProfile {
        id: user_id,
        first_name: body.first_name,
        last_name: body.last_name,
        phone_number: body.phone_number,
    };
    state.db.upsert_user(&profile)?;
    let saved = state
        .db
        .get_user(&profile.id)?
        .ok_or_else(|| TodoError::NotFound(format!("user '{}'", profile.id)))?;
    Ok(Json(saved))
}

async fn list_lists(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<TodoList>>, TodoError> {
    state.db.list_lists(&user_id).map(Json)
}

async fn create_list(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    JsonBody(body): JsonBody<CreateListRequest>,
) -> Result<Json<TodoList>, TodoError> {
    state.db.create_list(&user_id, &body.name).map(Json)
}

async fn get_list(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(list_id): Path<String>,
) -> Result<Json<TodoList>, TodoError> {
    require_list(&state, &user_id, &list_id).map(Json)
}

async fn merge_list(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(list_id): Path<String>,
    JsonBody(body): JsonBody<ListShape>,
) -> Result<Json<TodoList>, TodoError> {
    state.db.merge_list(&user_id, &list_id, &body).map(Json)
}

async fn delete_list(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(list_id): Path<String>,
) -> Result<StatusCode, TodoError> {
    state.db.delete_list(&user_id, &list_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(list_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, TodoError> {
    state.db.chat_history(&user_id, &list_id).map(Json)
}

async fn chat(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(list_id): Path<String>,
    JsonBody(body): JsonBody<ChatRequest>,
) -> Result<Json<ChatReply>, TodoError> {
    let persisted = require_list(&state, &user_id, &list_id)?;
    let snapshot = body.current_list.unwrap_or_else(|| persisted.to_shape());

    let reply = state
        .conversation
        .converse(
            &user_id,
            &list_id,
            &body.message,
            &persisted.messages,
            &snapshot,
        )
        .await?;
    Ok(Json(reply))
}

async fn schedule_check_in(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(item_id): Path<String>,
    JsonBody(body): JsonBody<ScheduleCheckInRequest>,
) -> Result<Json<CheckIn>, TodoError> {
    state
        .db
        .schedule_check_in(&user_id, &item_id, body.scheduled_at, body.notes.as_deref())
        .map(Json)
}

async fn list_check_ins(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<CheckInSummary>>, TodoError> {
    state.db.upcoming_check_ins(&user_id, Utc::now()).map(Json)
}

fn require_list(state: &ServerState, user_id: &str, list_id: &str) -> Result<TodoList, TodoError> {
    state
        .db
        .get_list(user_id, list_id)?
        .ok_or_else(|| TodoError::NotFound(format!("list '{}'", list_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn authorize_accepts_matching_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer token-123"),
        );
        assert!(authorize(&headers, &BackendAuthConfig::required("token-123")).is_ok());
    }

    #[test]
    fn authorize_rejects_missing_or_invalid_token() {
        let auth = BackendAuthConfig::required("token-123");
        assert!(authorize(&HeaderMap::new(), &auth).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert_eq!(authorize(&headers, &auth), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn authorize_allows_when_auth_mode_disabled() {
        assert!(authorize(&HeaderMap::new(), &BackendAuthConfig::disabled()).is_ok());
    }

    #[test]
    fn parse_auth_mode_defaults_to_required() {
        assert!(matches!(parse_auth_mode(None).unwrap(), AuthMode::Required));
        assert!(matches!(
            parse_auth_mode(Some("disabled".to_string())).unwrap(),
            AuthMode::Disabled
        ));
        assert!(parse_auth_mode(Some("nope".to_string())).is_err());
    }
}
