use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{PublicUser, STATUS_ONLINE};
use crate::state::AppState;
use crate::store::Store;
use crate::validation::{
    normalize_email, normalize_phone, validate_display_name, validate_phone,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(email, length(max = 255))]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| ApiError::Internal("password hashing failed".into()))
}

pub fn verify_password(password: &str, hash: &str) -> ApiResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| ApiError::Internal("stored hash unreadable".into()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn generate_token(user_id: Uuid, config: &AuthConfig) -> ApiResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: now.timestamp() + config.expiration.as_secs() as i64,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&config.secret),
    )
    .map_err(|_| ApiError::Internal("token signing failed".into()))
}

/// Verify signature and expiry; missing/invalid/expired all collapse into
/// an authentication failure.
pub fn validate_token(token: &str, config: &AuthConfig) -> ApiResult<Uuid> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(&config.secret),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthenticated)?;

    Uuid::parse_str(&data.claims.sub).map_err(|_| ApiError::Unauthenticated)
}

pub async fn signup(
    store: &Store,
    config: &AuthConfig,
    req: SignupRequest,
) -> ApiResult<AuthResponse> {
    req.validate()?;

    let phone = normalize_phone(&req.phone);
    let email = req.email.as_deref().map(normalize_email);
    let password_hash = hash_password(&req.password)?;

    let user = store
        .create_user(req.name.trim(), &phone, email.as_deref(), &password_hash)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("users_phone_key") {
                    return ApiError::PhoneTaken;
                }
                if db_err.constraint() == Some("users_email_key") {
                    return ApiError::Validation("email already in use".into());
                }
            }
            e.into()
        })?;

    let token = generate_token(user.id, config)?;
    Ok(AuthResponse {
        token,
        user: user.into(),
    })
}

pub async fn login(
    store: &Store,
    config: &AuthConfig,
    req: LoginRequest,
) -> ApiResult<AuthResponse> {
    req.validate()?;

    let phone = normalize_phone(&req.phone);
    let mut user = store
        .user_by_phone(&phone)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(ApiError::InvalidCredentials);
    }

    store.update_status(user.id, STATUS_ONLINE).await?;
    user.status = STATUS_ONLINE.to_string();

    let token = generate_token(user.id, config)?;
    Ok(AuthResponse {
        token,
        user: user.into(),
    })
}

/// Authenticated user extractor: bearer token from the Authorization header.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| ApiError::Unauthenticated)?;

        let user_id = validate_token(bearer.token(), &state.config.auth)?;
        Ok(AuthUser { id: user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> AuthConfig {
        AuthConfig {
            secret: b"0123456789abcdef0123456789abcdef".to_vec(),
            expiration: Duration::from_secs(3600),
        }
    }

    #[test]
    fn token_round_trips_to_the_same_user() {
        let config = test_config();
        let user_id = Uuid::new_v4();
        let token = generate_token(user_id, &config).unwrap();
        assert_eq!(validate_token(&token, &config).unwrap(), user_id);
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = test_config();
        let now = Utc::now();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            iat: (now - chrono::Duration::hours(2)).timestamp(),
            exp: (now - chrono::Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&config.secret),
        )
        .unwrap();

        assert!(matches!(
            validate_token(&token, &config),
            Err(ApiError::Unauthenticated)
        ));
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let config = test_config();
        let other = AuthConfig {
            secret: b"another-secret-another-secret-32".to_vec(),
            expiration: Duration::from_secs(3600),
        };
        let token = generate_token(Uuid::new_v4(), &other).unwrap();
        assert!(validate_token(&token, &config).is_err());
    }

    #[test]
    fn password_hash_verifies_only_the_original() {
        let hash = hash_password("hunter2hunter2").unwrap();
        assert!(verify_password("hunter2hunter2", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }
}
