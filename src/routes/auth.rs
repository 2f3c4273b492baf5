use axum::{extract::State, routing::post, Json, Router};

use crate::auth::{self, AuthResponse, LoginRequest, SignupRequest};
use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let response = auth::signup(&state.store, &state.config.auth, req).await?;
    tracing::info!(component = "auth", user_id = %response.user.id, "user registered");
    Ok(Json(response))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let response = auth::login(&state.store, &state.config.auth, req).await?;
    Ok(Json(response))
}
