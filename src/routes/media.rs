use axum::{extract::State, routing::post, Json, Router};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/upload-url", post(upload_url))
}

/// Characters that must not appear raw in a query-string value.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'/')
    .add(b'=')
    .add(b'?');

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UploadUrlRequest {
    #[validate(length(min = 1, max = 255))]
    file_name: String,
    #[validate(length(min = 1, max = 128))]
    file_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    media_url: String,
}

/// Hands out an upload slot against the configured media endpoint. The core
/// stores only the opaque media URL; blob storage lives elsewhere.
async fn upload_url(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UploadUrlRequest>,
) -> ApiResult<Json<UploadUrlResponse>> {
    req.validate()?;

    let key = object_key(user.id, &req.file_name);
    let base = state.config.media_base_url.trim_end_matches('/');

    Ok(Json(UploadUrlResponse {
        upload_url: format!(
            "{base}/upload/{key}?contentType={}",
            utf8_percent_encode(req.file_type.trim(), QUERY_VALUE)
        ),
        media_url: format!("{base}/{key}"),
    }))
}

fn object_key(user_id: Uuid, file_name: &str) -> String {
    let extension: String = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_lowercase();

    if extension.is_empty() {
        format!("{user_id}/{}", Uuid::new_v4())
    } else {
        format!("{user_id}/{}.{extension}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_keeps_a_safe_extension() {
        let user = Uuid::new_v4();
        let key = object_key(user, "holiday photo.JPG");
        assert!(key.starts_with(&user.to_string()));
        assert!(key.ends_with(".jpg"));

        let no_ext = object_key(user, "README");
        assert!(!no_ext.contains('.'));
    }

    #[test]
    fn content_type_is_escaped() {
        assert_eq!(
            utf8_percent_encode("image/png", QUERY_VALUE).to_string(),
            "image%2Fpng"
        );
        assert_eq!(
            utf8_percent_encode("plain-text_1.0", QUERY_VALUE).to_string(),
            "plain-text_1.0"
        );
        assert_eq!(
            utf8_percent_encode("a b&c", QUERY_VALUE).to_string(),
            "a%20b%26c"
        );
    }
}
