use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::{Chat, ChatDetail, Message, MessageKind};
use crate::state::AppState;
use crate::validation::{validate_channel_name, validate_media_url, validate_message_content};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_chats))
        .route("/personal", post(create_personal))
        .route("/channel", post(create_channel))
        .route("/:chat_id", get(chat_detail))
        .route("/:chat_id/messages", get(get_messages).post(send_message))
        .route("/:chat_id/messages/:message_id/read", post(mark_read))
        .route("/:chat_id/block", post(block))
        .route("/:chat_id/unblock", post(unblock))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[validate(custom(function = "validate_message_content"))]
    pub content: String,
    #[validate(custom(function = "validate_media_url"))]
    pub media_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePersonalRequest {
    user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
struct CreateChannelRequest {
    #[validate(custom(function = "validate_channel_name"))]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PaginationParams {
    limit: Option<i64>,
    before: Option<String>,
}

/// Clamp to the page-size contract: default 50, ceiling 100, zero or
/// negative yields an empty page.
fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(0, MAX_PAGE_SIZE)
}

fn parse_before(before: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    match before {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| ApiError::Validation("before must be an ISO-8601 timestamp".into())),
    }
}

async fn list_chats(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Vec<Chat>>> {
    let chats = state.store.chats_for_user(user.id).await?;
    Ok(Json(chats))
}

async fn chat_detail(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Json<ChatDetail>> {
    let chat = state
        .store
        .chat_by_id(chat_id)
        .await?
        .ok_or(ApiError::NotFound("chat"))?;

    let members = state.store.members_of(chat_id).await?;
    if !members.iter().any(|m| m.user_id == user.id) {
        return Err(ApiError::NotAMember);
    }

    Ok(Json(ChatDetail { chat, members }))
}

/// Idempotent: returns the existing personal chat when one exists.
async fn create_personal(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreatePersonalRequest>,
) -> ApiResult<Json<Value>> {
    let chat = state
        .dispatcher
        .create_personal_chat(user.id, req.user_id)
        .await?;
    Ok(Json(json!({ "id": chat.id })))
}

async fn create_channel(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<Json<Chat>> {
    req.validate()?;
    let chat = state
        .dispatcher
        .create_channel(user.id, req.name.trim())
        .await?;
    Ok(Json(chat))
}

/// Ascending page of messages strictly older than `before`.
async fn get_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Json<Vec<Message>>> {
    if state.store.membership(chat_id, user.id).await?.is_none() {
        return Err(ApiError::NotAMember);
    }

    let limit = clamp_limit(params.limit);
    let before = parse_before(params.before.as_deref())?;
    let messages = state.store.messages_before(chat_id, before, limit).await?;
    Ok(Json(messages))
}

async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<Message>> {
    req.validate()?;
    let message = state
        .dispatcher
        .send_to_chat(
            chat_id,
            user.id,
            req.kind,
            req.content.trim(),
            req.media_url.as_deref(),
        )
        .await?;
    Ok(Json(message))
}

async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path((chat_id, message_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    state
        .dispatcher
        .mark_read(chat_id, message_id, user.id)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// Block the counterparty: flags the caller's own membership.
async fn block(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.dispatcher.block(chat_id, user.id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn unblock(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.dispatcher.unblock(chat_id, user.id).await?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps_to_contract() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(0)), 0);
        assert_eq!(clamp_limit(Some(-5)), 0);
        assert_eq!(clamp_limit(Some(101)), 100);
        assert_eq!(clamp_limit(Some(100_000)), 100);
    }

    #[test]
    fn before_must_be_iso8601() {
        assert!(parse_before(None).unwrap().is_none());
        assert!(parse_before(Some("2026-08-01T12:00:00Z")).unwrap().is_some());
        assert!(parse_before(Some("yesterday")).is_err());
    }
}
