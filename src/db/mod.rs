use std::fmt::Debug;

use async_trait::async_trait;

use crate::core::models::{AuthorizationCode, RefreshTokenRecord, SweepStats};
use crate::core::types::{Namespace, TokenHash, UserUuid};

pub mod diesel;
pub mod memory;
pub mod models;
pub mod schema;

pub use self::diesel::DbStore;
pub use self::memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] ::diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] ::diesel::r2d2::PoolError),
    #[error("migration failed: {0}")]
    Migration(#[from] diesel_migrations::RunMigrationsError),
    #[error("stored value is malformed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("duplicate key")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of [`DurableStore::touch_active_refresh_token`].
#[derive(Debug, Clone)]
pub enum RefreshTouch {
    Active(RefreshTokenRecord),
    Revoked,
    Expired,
    /// No row, or a row owned by another namespace.
    Missing,
}

impl RefreshTouch {
    /// Classifies a row that the conditional update skipped.
    pub(crate) fn skipped(row: Option<&RefreshTokenRecord>, namespace: &Namespace, now: i64) -> Self {
        match row {
            Some(r) if r.namespace() != *namespace => Self::Missing,
            Some(r) if r.is_revoked => Self::Revoked,
            Some(r) if r.expires_at <= now => Self::Expired,
            _ => Self::Missing,
        }
    }
}

/// System of record for authorization codes and refresh tokens.
///
/// Rows are keyed by the keyed hash of the secret value; no method ever sees
/// a raw code or token.
#[async_trait]
pub trait DurableStore: Send + Sync + Debug {
    async fn insert_authorization_code(&self, code: AuthorizationCode) -> Result<(), StoreError>;

    async fn find_authorization_code(
        &self,
        code_hash: &TokenHash,
    ) -> Result<Option<AuthorizationCode>, StoreError>;

    /// Compare-and-set `used = false -> true`. Returns whether this call won.
    async fn mark_authorization_code_used(
        &self,
        code_hash: &TokenHash,
        now: i64,
    ) -> Result<bool, StoreError>;

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError>;

    /// Bumps `last_used_at` on a token that is unrevoked, unexpired and owned
    /// by `namespace`, returning the updated row. When nothing was touched the
    /// result says why, without a second call.
    async fn touch_active_refresh_token(
        &self,
        token_hash: &TokenHash,
        namespace: &Namespace,
        now: i64,
    ) -> Result<RefreshTouch, StoreError>;

    async fn find_refresh_token(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Active tokens of a user in one namespace, least recently used first.
    async fn list_active_refresh_tokens(
        &self,
        user: &UserUuid,
        namespace: &Namespace,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError>;

    /// Revokes one token. Returns the row only if this call revoked it.
    async fn revoke_refresh_token(
        &self,
        token_hash: &TokenHash,
        reason: &str,
        now: i64,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Revokes every active token of a user in all namespaces.
    async fn revoke_all_for_user(
        &self,
        user: &UserUuid,
        reason: &str,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError>;

    /// Expires unused codes and deletes rows older than the retention window.
    async fn sweep(&self, now: i64, retention_secs: u64) -> Result<SweepStats, StoreError>;
}

pub(crate) fn retention_cutoff(now: i64, retention_secs: u64) -> i64 {
    now.saturating_sub(retention_secs as i64)
}
