use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::models::Story;
use crate::state::AppState;
use crate::validation::validate_media_url;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(active_stories).post(create_story))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateStoryRequest {
    #[validate(custom(function = "validate_media_url"))]
    media_url: String,
}

async fn active_stories(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<Vec<Story>>> {
    let stories = state.store.active_stories().await?;
    Ok(Json(stories))
}

/// Stories expire 24 hours after creation; the hourly purge removes them.
async fn create_story(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateStoryRequest>,
) -> ApiResult<Json<Story>> {
    req.validate()?;
    let story = state
        .dispatcher
        .create_story(user.id, req.media_url.trim())
        .await?;
    Ok(Json(story))
}
