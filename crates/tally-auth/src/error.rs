use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("refresh token for grant '{grant}' was rejected: {reason}")]
    Revoked { grant: String, reason: String },

    #[error("token exchange for grant '{grant}' failed: {reason}")]
    Exchange { grant: String, reason: String },

    #[error("no refresh token configured for tenant '{0}'")]
    NoGrant(String),

    #[error("access token for tenant '{0}' was rejected again after a forced refresh")]
    Unauthorized(String),

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("invalid JWT: {0}")]
    Jwt(String),

    #[error("token state file error: {0}")]
    StateFile(String),
}
