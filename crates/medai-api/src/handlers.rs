//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its input via axum extractors, calls the
//! repositories or the chat pipeline on AppState, and returns JSON.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medai_chat::{ChatError, APOLOGY_RESPONSE, EMPTY_MESSAGE_RESPONSE};
use medai_core::error::MedaiError;
use medai_core::types::{ConversationTurn, Identity, MedicalProfile, ProfileUpdate};

use crate::auth;
use crate::error::ApiError;
use crate::extract::{JsonOrForm, MaybeIdentity};
use crate::state::AppState;

const MAX_USERNAME_CHARS: usize = 150;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: Uuid,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfilePageResponse {
    pub username: String,
    pub profile: MedicalProfile,
    pub conversations: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponseBody {
    pub response: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health - liveness and uptime.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// POST /api/register - create an account and its empty profile.
pub async fn register(
    State(state): State<AppState>,
    JsonOrForm(req): JsonOrForm<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_CHARS
        )));
    }

    let iterations = state.config.auth.pbkdf2_iterations;
    let password = req.password;
    let password_hash =
        tokio::task::spawn_blocking(move || auth::hash_password(&password, iterations))
            .await
            .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?;

    let user = state
        .users
        .register(&username, req.email.as_deref(), &password_hash)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            username: user.username,
        }),
    ))
}

/// POST /api/login - verify credentials and issue a session token.
pub async fn login(
    State(state): State<AppState>,
    JsonOrForm(req): JsonOrForm<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state.users.find_by_username(req.username.trim())?;

    // Unknown usernames still pay for a full key stretch.
    let password = req.password;
    let encoded = match &user {
        Some(user) => user.password_hash.clone(),
        None => auth::unmatchable_hash(state.config.auth.pbkdf2_iterations),
    };
    let valid = tokio::task::spawn_blocking(move || auth::verify_password(&password, &encoded))
        .await
        .map_err(|e| ApiError::Internal(format!("password verification failed: {}", e)))?;
    let user = match user {
        Some(user) if valid => user,
        Some(user) => {
            tracing::info!(username = %user.username, "Login rejected");
            return Err(MedaiError::InvalidCredentials.into());
        }
        None => return Err(MedaiError::InvalidCredentials.into()),
    };

    let now = Utc::now();
    match state.sessions.purge_expired(now) {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(removed, "Purged expired sessions"),
        Err(e) => tracing::warn!(error = %e, "Failed to purge expired sessions"),
    }

    let token = auth::generate_token();
    let expires_at = now + Duration::hours(i64::from(state.config.auth.session_ttl_hours));
    state
        .sessions
        .create(&auth::token_hash(&token), user.id, expires_at)?;

    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        expires_at,
    }))
}

/// POST /api/logout - revoke the presented session token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    if let Some(token) = auth::bearer_token(&headers)? {
        state.sessions.revoke(&auth::token_hash(token))?;
    }
    tracing::info!(user_id = %identity.user_id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/profile - profile plus the most recent conversation turns.
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ProfilePageResponse>, ApiError> {
    let profile = state.profiles.find_or_create(identity.user_id)?;
    let conversations = state
        .conversations
        .recent(identity.user_id, state.config.chat.display_limit())?;

    Ok(Json(ProfilePageResponse {
        username: identity.username,
        profile,
        conversations,
    }))
}

/// PUT /api/profile - replace the caller's profile attributes.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    JsonOrForm(update): JsonOrForm<ProfileUpdate>,
) -> Result<Json<MedicalProfile>, ApiError> {
    update.validate()?;
    let profile = state.profiles.upsert(identity.user_id, &update)?;
    Ok(Json(profile))
}

/// GET /api/conversations - most recent turns first, capped at the history limit.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let max = state.config.chat.display_limit();
    let limit = params.limit.unwrap_or(max).clamp(1, max);
    let conversations = state.conversations.recent(identity.user_id, limit)?;
    Ok(Json(ConversationsResponse { conversations }))
}

/// POST /api/chat - answer a message, logging the turn for logged-in users.
///
/// Every outcome, including an unreadable body, is a `{"response": ...}`
/// reply.
pub async fn chat(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    body: Result<JsonOrForm<ChatRequest>, ApiError>,
) -> (StatusCode, Json<ChatResponseBody>) {
    let outcome = match body {
        Ok(JsonOrForm(req)) => state.chat.handle_message(&req.message, identity.as_ref()).await,
        Err(rejection) => Err(ChatError::InvalidRequest(format!("{:?}", rejection))),
    };
    let (status, response) = match outcome {
        Ok(reply) => (StatusCode::OK, reply.response),
        Err(ChatError::EmptyMessage) => (StatusCode::BAD_REQUEST, EMPTY_MESSAGE_RESPONSE.to_string()),
        Err(e @ ChatError::MessageTooLong(_)) => (StatusCode::BAD_REQUEST, capitalize(&e.to_string())),
        Err(e) => {
            tracing::error!(error = %e, "Chat request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, APOLOGY_RESPONSE.to_string())
        }
    };
    (status, Json(ChatResponseBody { response }))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
