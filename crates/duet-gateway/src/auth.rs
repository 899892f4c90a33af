use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use duet_types::api::Claims;
use duet_types::models::UserId;

/// How long issued tokens stay valid.
const TOKEN_TTL_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Turns a bearer token into the user id it was issued for.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// HS256 keys shared with the service that issues login tokens.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn issue(&self, user_id: UserId) -> Result<String, AuthError> {
        let claims = Claims {
            user_id,
            exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}

impl TokenVerifier for JwtKeys {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims.user_id)
    }
}

/// Query parameters of the websocket upgrade request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeParams {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no user_id provided")]
    MissingUserId,

    #[error("invalid user_id: {0}")]
    InvalidUserId(String),

    #[error("token required but none provided")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] AuthError),

    #[error("token user id mismatch: token={token}, provided={provided}")]
    TokenMismatch { token: UserId, provided: UserId },
}

/// Resolve the participant id of a websocket handshake.
///
/// `user_id` is mandatory. A non-empty `token` must verify and name the same
/// user. Without a token the claimed id is accepted unless `require_token`.
pub fn authenticate(
    params: &HandshakeParams,
    verifier: &dyn TokenVerifier,
    require_token: bool,
) -> Result<UserId, HandshakeError> {
    let raw = params
        .user_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(HandshakeError::MissingUserId)?;
    let user_id: UserId = raw
        .parse()
        .map_err(|_| HandshakeError::InvalidUserId(raw.to_string()))?;

    match params.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => {
            let token_user = verifier.verify(token)?;
            if token_user != user_id {
                return Err(HandshakeError::TokenMismatch {
                    token: token_user,
                    provided: user_id,
                });
            }
        }
        None if require_token => return Err(HandshakeError::MissingToken),
        None => warn!("User {} connecting without token (unauthenticated mode)", user_id),
    }

    Ok(user_id)
}
