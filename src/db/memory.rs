use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::models::{AuthorizationCode, RefreshTokenRecord, SweepStats};
use crate::core::types::{Namespace, TokenHash, UserUuid};

use super::{retention_cutoff, DurableStore, RefreshTouch, StoreError};

#[derive(Debug, Default)]
struct Tables {
    codes: HashMap<TokenHash, AuthorizationCode>,
    refresh_tokens: HashMap<TokenHash, RefreshTokenRecord>,
}

/// [`DurableStore`] kept in process memory. Every method takes the table lock
/// once, so each call is atomic the way a single SQL statement is.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh_token_count(&self) -> usize {
        self.tables.lock().await.refresh_tokens.len()
    }

    pub async fn code_count(&self) -> usize {
        self.tables.lock().await.codes.len()
    }
}

fn in_namespace(record: &RefreshTokenRecord, namespace: &Namespace) -> bool {
    &record.namespace() == namespace
}

fn revoke(record: &mut RefreshTokenRecord, reason: &str, now: i64) {
    record.is_revoked = true;
    record.revoked_at = Some(now);
    record.revoke_reason = Some(reason.to_string());
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn insert_authorization_code(&self, code: AuthorizationCode) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.codes.contains_key(&code.code_hash) {
            return Err(StoreError::Conflict);
        }
        tables.codes.insert(code.code_hash.clone(), code);
        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code_hash: &TokenHash,
    ) -> Result<Option<AuthorizationCode>, StoreError> {
        Ok(self.tables.lock().await.codes.get(code_hash).cloned())
    }

    async fn mark_authorization_code_used(
        &self,
        code_hash: &TokenHash,
        now: i64,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.codes.get_mut(code_hash) {
            Some(code) if !code.used => {
                code.used = true;
                code.used_time = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.refresh_tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict);
        }
        tables
            .refresh_tokens
            .insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn touch_active_refresh_token(
        &self,
        token_hash: &TokenHash,
        namespace: &Namespace,
        now: i64,
    ) -> Result<RefreshTouch, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.refresh_tokens.get_mut(token_hash) {
            Some(record) if record.is_active(now) && in_namespace(record, namespace) => {
                record.last_used_at = now;
                Ok(RefreshTouch::Active(record.clone()))
            }
            other => Ok(RefreshTouch::skipped(other.map(|r| &*r), namespace, now)),
        }
    }

    async fn find_refresh_token(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .refresh_tokens
            .get(token_hash)
            .cloned())
    }

    async fn list_active_refresh_tokens(
        &self,
        user: &UserUuid,
        namespace: &Namespace,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let tables = self.tables.lock().await;
        let mut active: Vec<RefreshTokenRecord> = tables
            .refresh_tokens
            .values()
            .filter(|r| &r.user_uuid == user && r.is_active(now) && in_namespace(r, namespace))
            .cloned()
            .collect();
        active.sort_by_key(|r| (r.last_used_at, r.created_at));
        Ok(active)
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &TokenHash,
        reason: &str,
        now: i64,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.refresh_tokens.get_mut(token_hash) {
            Some(record) if !record.is_revoked => {
                revoke(record, reason, now);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_all_for_user(
        &self,
        user: &UserUuid,
        reason: &str,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let mut tables = self.tables.lock().await;
        let revoked = tables
            .refresh_tokens
            .values_mut()
            .filter(|r| &r.user_uuid == user && r.is_active(now))
            .map(|r| {
                revoke(r, reason, now);
                r.clone()
            })
            .collect();
        Ok(revoked)
    }

    async fn sweep(&self, now: i64, retention_secs: u64) -> Result<SweepStats, StoreError> {
        let cutoff = retention_cutoff(now, retention_secs);
        let mut tables = self.tables.lock().await;
        let mut stats = SweepStats::default();

        for code in tables.codes.values_mut() {
            if !code.used && code.expires_at < now {
                code.used = true;
                code.used_time = Some(now);
                stats.codes_terminated += 1;
            }
        }

        let before = tables.codes.len();
        tables.codes.retain(|_, c| c.expires_at >= cutoff);
        stats.codes_deleted = before - tables.codes.len();

        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, r| {
            let revoked_long_ago = r.is_revoked && r.revoked_at.map_or(true, |t| t < cutoff);
            !(revoked_long_ago || r.expires_at < cutoff)
        });
        stats.refresh_tokens_deleted = before - tables.refresh_tokens.len();

        Ok(stats)
    }
}
