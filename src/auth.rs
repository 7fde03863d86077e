//! Bearer token authentication.
//!
//! Tokens are issued by the external credential service and signed with a
//! shared HS256 secret. The `sub` claim carries the integer client id.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::routes::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub struct ClientTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for ClientTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTokenVerifier")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl ClientTokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify `token` and return the client id it was issued to.
    pub fn verify(&self, token: &str) -> Result<i64, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        data.claims
            .sub
            .parse::<i64>()
            .map_err(|_| AuthError::InvalidSubject(data.claims.sub))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token subject {0:?} is not a client id")]
    InvalidSubject(String),
}

/// Client id of the caller, taken from the verified bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedClient(pub i64);

impl FromRequestParts<AppState> for AuthenticatedClient {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingToken)?;

        let client_id = state.tokens.verify(token.trim())?;
        Ok(Self(client_id))
    }
}

#[cfg(test)]
pub(crate) fn issue_test_token(secret: &str, client_id: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: client_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
