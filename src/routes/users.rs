use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::{Message, PublicUser};
use crate::routes::chats::SendMessageRequest;
use crate::state::AppState;
use crate::validation::{
    normalize_email, validate_display_name, validate_media_url, validate_presence_status,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).patch(update_me))
        .route("/me/status", patch(update_status))
        .route("/search", get(search_users))
        .route("/:user_id/messages", post(send_to_user))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SearchQuery {
    #[validate(length(min = 1, max = 64))]
    pub q: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStatusRequest {
    #[validate(custom(function = "validate_presence_status"))]
    pub status: String,
}

async fn get_me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<PublicUser>> {
    let me = state
        .store
        .user_by_id(user.id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(me.into()))
}

/// Only the provided fields change.
async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<PublicUser>> {
    if req.name.is_none() && req.email.is_none() && req.profile_picture.is_none() {
        return Err(ApiError::Validation("no profile fields provided".into()));
    }

    if let Some(name) = req.name.as_deref() {
        validate_display_name(name).map_err(|e| ApiError::Validation(e.to_string()))?;
    }
    let email = req.email.as_deref().map(normalize_email);
    if let Some(picture) = req.profile_picture.as_deref() {
        validate_media_url(picture).map_err(|e| ApiError::Validation(e.to_string()))?;
    }

    let updated = state
        .store
        .update_profile(
            user.id,
            req.name.as_deref().map(str::trim),
            email.as_deref(),
            req.profile_picture.as_deref(),
        )
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("users_email_key") {
                    return ApiError::Validation("email already in use".into());
                }
            }
            e.into()
        })?;

    Ok(Json(updated.into()))
}

async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<StatusCode> {
    req.validate()?;
    state.store.update_status(user.id, &req.status).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Search by display name or phone fragment.
async fn search_users(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<PublicUser>>> {
    query.validate()?;
    let users = state.store.search_users(query.q.trim()).await?;
    Ok(Json(users))
}

/// Direct send; the personal chat is created on first contact.
async fn send_to_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(recipient_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<Message>> {
    req.validate()?;
    let message = state
        .dispatcher
        .send_to_user(
            user.id,
            recipient_id,
            req.kind,
            req.content.trim(),
            req.media_url.as_deref(),
        )
        .await?;
    Ok(Json(message))
}
