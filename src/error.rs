use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Request-layer error taxonomy. Forbidden variants carry a kind
/// discriminator in the response body so clients can tell a membership
/// failure from a block.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("not a member of this chat")]
    NotAMember,
    #[error("you have blocked this conversation")]
    Blocked,
    #[error("recipient has blocked this conversation")]
    BlockedByRecipient,
    #[error("cannot message yourself")]
    SelfSend,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("phone number already registered")]
    PhoneTaken,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("store unavailable")]
    StoreUnavailable,
    #[error("event bus unavailable")]
    BusUnavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::NotAMember | Self::Blocked | Self::BlockedByRecipient | Self::SelfSend => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PhoneTaken => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable | Self::BusUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::NotAMember => "NOT_A_MEMBER",
            Self::Blocked => "BLOCKED",
            Self::BlockedByRecipient => "BLOCKED_BY_RECIPIENT",
            Self::SelfSend => "SELF_SEND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PhoneTaken => "CONFLICT",
            Self::Validation(_) => "VALIDATION",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::BusUnavailable => "BUS_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            let correlation_id = Uuid::new_v4();
            tracing::error!(
                component = "http",
                correlation_id = %correlation_id,
                error = %self,
                "request failed"
            );
            format!("internal error (correlation id {correlation_id})")
        } else {
            self.to_string()
        };

        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                tracing::warn!(component = "store", error = %e, "store unavailable");
                ApiError::StoreUnavailable
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        ApiError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_kinds_are_distinguishable() {
        assert_eq!(ApiError::NotAMember.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Blocked.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::BlockedByRecipient.kind(), "BLOCKED_BY_RECIPIENT");
        assert_ne!(ApiError::Blocked.kind(), ApiError::NotAMember.kind());
    }

    #[test]
    fn infrastructure_faults_map_to_503() {
        assert_eq!(
            ApiError::StoreUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::BusUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
