use crate::auth::{AccessTokenError, AccessTokenErrorKind};
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::db::StoreError;
use crate::util::crypto::CryptoError;
use crate::util::hash::HashError;

/// Why a grant was refused. Each variant is distinct in logs but every one
/// surfaces as `invalid_grant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GrantFailure {
    #[error("authorization code not found")]
    CodeNotFound,
    #[error("authorization code already used")]
    CodeUsed,
    #[error("authorization code expired")]
    CodeExpired,
    #[error("authorization code was issued to another client")]
    ClientMismatch,
    #[error("redirect_uri does not match the authorization request")]
    RedirectMismatch,
    #[error("code_verifier is required")]
    MissingVerifier,
    #[error("code_verifier does not match the challenge")]
    VerifierMismatch,
    #[error("refresh token not found")]
    RefreshUnknown,
    #[error("refresh token expired")]
    RefreshExpired,
    #[error("refresh token revoked")]
    RefreshRevoked,
    #[error("refresh token does not match stored value")]
    RefreshMismatch,
    #[error("refresh token is bound to another device")]
    DeviceMismatch,
    #[error("requested scope exceeds the granted scope")]
    ScopeWidening,
    #[error("user no longer exists")]
    UnknownUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClientFailure {
    #[error("unknown client")]
    Unknown,
    #[error("bad client secret")]
    BadSecret,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("invalid grant: {0}")]
    Grant(#[from] GrantFailure),
    #[error("invalid client: {0}")]
    Client(#[from] ClientFailure),
    #[error("unsupported grant type")]
    UnsupportedGrantType,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl Error {
    pub fn kind(&self) -> AccessTokenErrorKind {
        match self {
            Self::Validation(_) => AccessTokenErrorKind::InvalidRequest,
            Self::Grant(_) | Self::Crypto(_) => AccessTokenErrorKind::InvalidGrant,
            Self::Client(_) => AccessTokenErrorKind::InvalidClient,
            Self::UnsupportedGrantType => AccessTokenErrorKind::UnsupportedGrantType,
            Self::Store(_) | Self::Cache(_) | Self::Hash(_) | Self::Config(_) | Self::Signing(_) => {
                AccessTokenErrorKind::ServerError
            }
        }
    }

    /// Wire form. Descriptions never carry internal detail.
    pub fn to_response(&self) -> AccessTokenError {
        let description = match self {
            Self::Validation(reason) => reason.clone(),
            Self::Grant(failure) => failure.to_string(),
            Self::Client(_) => "client authentication failed".to_string(),
            Self::UnsupportedGrantType => "grant_type is not supported".to_string(),
            Self::Crypto(_) => "invalid credential".to_string(),
            _ => "internal error".to_string(),
        };
        AccessTokenError::with_description(self.kind(), description)
    }
}

impl From<Error> for AccessTokenError {
    fn from(e: Error) -> Self {
        e.to_response()
    }
}
