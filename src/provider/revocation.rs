use std::collections::HashSet;

use crate::auth::{revocation::RevocationRequest, AccessTokenError, ClientCredentials, TokenTypeHint};
use crate::cache::{CacheError, IndexedKey, TokenKind};
use crate::core::models::{RefreshTokenRecord, RevokeReason, TokenInfo, TokenRef};
use crate::core::types::{ClientId, DeviceId, Namespace, RefreshTokenValue, TokenHash, UserUuid};

use super::{error::Error, Components, Provider};

use tracing::{event, Level};

fn best_effort(result: Result<(), CacheError>, step: &'static str, hash: &TokenHash) {
    if let Err(e) = result {
        event!(
            Level::WARN,
            step,
            token_hash = hash.short(),
            error = %e,
            "Cache update after durable revocation failed"
        );
    }
}

/// Revokes refresh tokens. The durable update is the commit point; cache
/// eviction and blacklisting follow and never undo or fail a commit.
#[derive(Debug, Clone)]
pub struct RevocationCoordinator {
    parts: Components,
}

impl RevocationCoordinator {
    pub fn new(parts: Components) -> Self {
        Self { parts }
    }

    fn hash_of(&self, token: &TokenRef) -> TokenHash {
        match token {
            TokenRef::Raw(value) => self.parts.crypto.hash(value.as_ref()),
            TokenRef::Hash(hash) => hash.clone(),
        }
    }

    /// Returns whether this call revoked the token. Unknown and already
    /// revoked tokens are not an error.
    #[tracing::instrument(skip_all, fields(reason = reason.as_str()))]
    pub async fn revoke_one(&self, token: &TokenRef, reason: &RevokeReason) -> Result<bool, Error> {
        let hash = self.hash_of(token);
        let now = self.parts.clock.now();

        match self
            .parts
            .store
            .revoke_refresh_token(&hash, reason.as_str(), now)
            .await?
        {
            Some(record) => {
                event!(Level::INFO, token_hash = hash.short(), user = %record.user_uuid, "Revoked refresh token");
                self.purge_refresh(&record).await;
                self.purge_linked_access(&record).await;
                Ok(true)
            }
            None => {
                event!(Level::DEBUG, token_hash = hash.short(), "Nothing to revoke");
                Ok(false)
            }
        }
    }

    #[tracing::instrument(skip_all, fields(user = %user, reason = reason.as_str()))]
    pub async fn revoke_all_for_user(&self, user: &UserUuid, reason: &RevokeReason) -> Result<usize, Error> {
        let now = self.parts.clock.now();
        let records = self
            .parts
            .store
            .revoke_all_for_user(user, reason.as_str(), now)
            .await?;

        event!(Level::INFO, count = records.len(), "Revoked all refresh tokens for user");

        let mut purged = HashSet::new();
        for record in &records {
            self.purge_refresh(record).await;
            purged.insert(record.token_hash.clone());
        }

        let indexed = match self.parts.cache.user_keys(user).await {
            Ok(keys) => keys,
            Err(e) => {
                event!(Level::WARN, error = %e, "Could not read user index, access tokens stay cached until expiry");
                Vec::new()
            }
        };

        for key in indexed {
            match key.kind {
                TokenKind::Access => self.purge_access_key(&key).await,
                TokenKind::Refresh if !purged.contains(&key.hash) => {
                    best_effort(
                        self.parts.cache.evict(TokenKind::Refresh, &key.namespace, &key.hash).await,
                        "evict",
                        &key.hash,
                    );
                }
                TokenKind::Refresh => {}
            }
        }

        if let Err(e) = self.parts.cache.drop_user_index(user).await {
            event!(Level::WARN, error = %e, "Could not drop user index");
        }

        Ok(records.len())
    }

    /// Signs a device out of first-party sessions.
    #[tracing::instrument(skip_all, fields(user = %user, device = ?device))]
    pub async fn revoke_device(
        &self,
        user: &UserUuid,
        device: &DeviceId,
        reason: &RevokeReason,
    ) -> Result<usize, Error> {
        let namespace = Namespace::first_party();

        match self.parts.cache.device_token(&namespace, user, device).await {
            Ok(Some(hash)) => {
                if self.revoke_one(&TokenRef::Hash(hash), reason).await? {
                    return Ok(1);
                }
            }
            Ok(None) => {}
            Err(e) => {
                event!(Level::WARN, error = %e, "Device index unavailable, using durable store");
            }
        }

        let now = self.parts.clock.now();
        let active = self
            .parts
            .store
            .list_active_refresh_tokens(user, &namespace, now)
            .await?;

        let mut revoked = 0;
        for record in active.iter().filter(|r| r.device_id.as_ref() == Some(device)) {
            if self
                .revoke_one(&TokenRef::Hash(record.token_hash.clone()), reason)
                .await?
            {
                revoked += 1;
            }
        }

        Ok(revoked)
    }

    /// Denylists one access token until its natural expiry.
    pub async fn revoke_access_token(&self, namespace: &Namespace, token_hash: &TokenHash, expires_at: i64) {
        match self.parts.cache.get_access(namespace, token_hash).await {
            Ok(Some(info)) => self.purge_access(namespace, &info).await,
            _ => {
                best_effort(
                    self.parts.cache.evict(TokenKind::Access, namespace, token_hash).await,
                    "evict",
                    token_hash,
                );
                best_effort(
                    self.parts.cache.blacklist(namespace, token_hash, expires_at).await,
                    "blacklist",
                    token_hash,
                );
            }
        }
    }

    async fn purge_refresh(&self, record: &RefreshTokenRecord) {
        let cache = &self.parts.cache;
        let namespace = record.namespace();
        let hash = &record.token_hash;

        best_effort(cache.evict(TokenKind::Refresh, &namespace, hash).await, "evict", hash);
        best_effort(
            cache.blacklist(&namespace, hash, record.expires_at).await,
            "blacklist",
            hash,
        );
        best_effort(
            cache
                .unindex_user(&record.user_uuid, &IndexedKey::new(TokenKind::Refresh, &namespace, hash))
                .await,
            "unindex_user",
            hash,
        );
        if let Some(device) = &record.device_id {
            best_effort(
                cache
                    .unindex_device(&namespace, &record.user_uuid, device, hash)
                    .await,
                "unindex_device",
                hash,
            );
        }
    }

    /// Access tokens minted from a revoked refresh token go with it.
    async fn purge_linked_access(&self, record: &RefreshTokenRecord) {
        let namespace = record.namespace();
        let keys = match self.parts.cache.user_keys(&record.user_uuid).await {
            Ok(keys) => keys,
            Err(e) => {
                event!(Level::WARN, error = %e, "Could not read user index");
                return;
            }
        };

        for key in keys
            .iter()
            .filter(|k| k.kind == TokenKind::Access && k.namespace == namespace)
        {
            if let Ok(Some(info)) = self.parts.cache.get_access(&key.namespace, &key.hash).await {
                if info.refresh_token_hash.as_ref() == Some(&record.token_hash) {
                    self.purge_access(&key.namespace, &info).await;
                }
            }
        }
    }

    async fn purge_access_key(&self, key: &IndexedKey) {
        match self.parts.cache.get_access(&key.namespace, &key.hash).await {
            Ok(Some(info)) => self.purge_access(&key.namespace, &info).await,
            _ => best_effort(
                self.parts
                    .cache
                    .evict(TokenKind::Access, &key.namespace, &key.hash)
                    .await,
                "evict",
                &key.hash,
            ),
        }
    }

    async fn purge_access(&self, namespace: &Namespace, info: &TokenInfo) {
        let cache = &self.parts.cache;
        let hash = &info.token_hash;

        best_effort(cache.evict(TokenKind::Access, namespace, hash).await, "evict", hash);
        best_effort(cache.blacklist(namespace, hash, info.expires_at).await, "blacklist", hash);
        best_effort(
            cache
                .unindex_user(&info.user_uuid, &IndexedKey::new(TokenKind::Access, namespace, hash))
                .await,
            "unindex_user",
            hash,
        );
    }
}

impl Provider {
    /// Token revocation for an authenticated client. Unknown tokens and tokens
    /// owned by another client are answered with success and left alone.
    #[tracing::instrument(skip_all, fields(client_id = ?credentials.client_id))]
    pub async fn revocation_request(
        &self,
        credentials: ClientCredentials,
        request: RevocationRequest,
    ) -> Result<(), AccessTokenError> {
        let client = self
            .check_client_authentication(&credentials)
            .await
            .map_err(|e| e.to_response())?;

        let revoked = match request.token_type_hint {
            Some(TokenTypeHint::AccessToken) => self.revoke_client_access_token(&client.id, &request.token).await,
            _ => {
                let revoked = self
                    .revoke_client_refresh_token(&client.id, &request.token)
                    .await
                    .map_err(|e| e.to_response())?;
                revoked || self.revoke_client_access_token(&client.id, &request.token).await
            }
        };

        event!(Level::DEBUG, revoked, "Handled revocation request");
        Ok(())
    }

    async fn revoke_client_refresh_token(&self, client_id: &ClientId, token: &str) -> Result<bool, Error> {
        let raw = RefreshTokenValue(token.to_string());
        let hash = self.parts.crypto.hash(raw.as_ref());

        let record = match self.parts.store.find_refresh_token(&hash).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        if record.client_id.as_ref() != Some(client_id) {
            event!(
                Level::WARN,
                original_client_id = ?record.client_id,
                revoke_client_id = ?client_id,
                "client_ids do not match"
            );
            return Ok(false);
        }

        self.revocation
            .revoke_one(&TokenRef::Hash(hash), &RevokeReason::ClientRequest)
            .await
    }

    async fn revoke_client_access_token(&self, client_id: &ClientId, token: &str) -> bool {
        let now = self.parts.clock.now();
        let claims = match self.tokens.validate_token(token, now) {
            Ok(claims) => claims,
            Err(_) => return false,
        };

        if claims.client_id.as_ref() != Some(client_id) {
            event!(
                Level::WARN,
                original_client_id = ?claims.client_id,
                revoke_client_id = ?client_id,
                "client_ids do not match"
            );
            return false;
        }

        let namespace = Namespace::of(Some(client_id));
        let hash = self.parts.crypto.hash(claims.token_id.as_ref());
        self.revocation
            .revoke_access_token(&namespace, &hash, claims.exp)
            .await;
        true
    }
}
