use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::{event, Level};

use crate::cache::CachedState;
use crate::core::models::{
    CachedRefreshToken, DeviceInfo, OAuthContext, RefreshTokenRecord, RefreshedAccessToken, Subject,
    TokenInfo, TokenPair,
};
use crate::core::types::{ClientId, DeviceId, Namespace, RefreshTokenValue, TokenId};
use crate::db::RefreshTouch;
use crate::directory::UserDirectory;
use crate::util::random::FromRandom;

use super::{
    claims::AccessClaims,
    device::DeviceLimiter,
    error::{Error, GrantFailure},
    token::TokenService,
    Components,
};

/// Mints, refreshes and validates credentials. First-party sessions pass no
/// [`OAuthContext`]; OAuth2 clients pass theirs, which selects the cache
/// namespace and the claims carried by the access token.
#[derive(Debug, Clone)]
pub struct TokenLifecycle {
    parts: Components,
    tokens: Arc<TokenService>,
    users: Arc<dyn UserDirectory>,
    devices: DeviceLimiter,
    refresh_ttl_secs: u64,
}

impl TokenLifecycle {
    pub fn new(
        parts: Components,
        tokens: Arc<TokenService>,
        users: Arc<dyn UserDirectory>,
        devices: DeviceLimiter,
        refresh_ttl_secs: u64,
    ) -> Self {
        Self {
            parts,
            tokens,
            users,
            devices,
            refresh_ttl_secs,
        }
    }

    #[tracing::instrument(skip_all, fields(user = %subject.uuid, client_id = ?context.as_ref().map(|c| &c.client_id)))]
    pub async fn issue_pair(
        &self,
        subject: &Subject,
        device: DeviceInfo,
        context: Option<OAuthContext>,
    ) -> Result<TokenPair, Error> {
        let parts = &self.parts;
        let namespace = Namespace::of(context.as_ref().map(|c| &c.client_id));

        if context.is_none() {
            if let Err(e) = self.devices.make_room(&subject.uuid).await {
                event!(Level::WARN, error = %e, "Device limit check failed, issuing anyway");
            }
        }

        let now = parts.clock.now();
        let raw = RefreshTokenValue::from_random();
        let refresh_hash = parts.crypto.hash(raw.as_ref());

        let record = RefreshTokenRecord {
            id: uuid::Uuid::new_v4().to_string(),
            token_hash: refresh_hash.clone(),
            encrypted_token: parts.crypto.encrypt(raw.as_ref())?,
            user_uuid: subject.uuid.clone(),
            user_id: subject.id,
            client_id: context.as_ref().map(|c| c.client_id.clone()),
            scope: context.as_ref().map(|c| c.scope.clone()),
            device_id: device.device_id,
            ip_address: device.ip_address,
            user_agent: device.user_agent,
            created_at: now,
            expires_at: now.saturating_add(self.refresh_ttl_secs as i64),
            last_used_at: now,
            is_revoked: false,
            revoked_at: None,
            revoke_reason: None,
        };
        parts.store.insert_refresh_token(record.clone()).await?;

        let token_id = TokenId::new();
        let (access_token, claims) =
            self.tokens
                .new_access_token(subject, &token_id, context.as_ref(), now)?;

        self.cache_session(
            &namespace,
            CachedRefreshToken::from_record(&record, &subject.role),
            &claims,
        )
        .await;

        event!(Level::DEBUG, token_hash = refresh_hash.short(), "Issued token pair");

        Ok(TokenPair {
            access_token,
            token_id,
            access_expires_in: self.tokens.access_ttl_secs(),
            refresh_token: raw,
            refresh_expires_in: self.refresh_ttl_secs,
            scope: record.scope,
        })
    }

    /// Mints a new access token from a refresh token. The refresh token
    /// itself is not rotated.
    ///
    /// A non-empty scope in `context` narrows the new access token; it may
    /// never widen what was originally granted.
    #[tracing::instrument(skip_all, fields(client_id = ?context.map(|c| &c.client_id)))]
    pub async fn refresh(
        &self,
        raw: &RefreshTokenValue,
        context: Option<&OAuthContext>,
        device_id: Option<&DeviceId>,
    ) -> Result<RefreshedAccessToken, Error> {
        let parts = &self.parts;
        let hash = parts.crypto.hash(raw.as_ref());
        let namespace = Namespace::of(context.map(|c| &c.client_id));
        let now = parts.clock.now();

        let cached = match parts.cache.refresh_state(&namespace, &hash).await {
            Ok(state) if state.blacklisted => {
                event!(Level::DEBUG, token_hash = hash.short(), "Refresh token is blacklisted");
                return Err(GrantFailure::RefreshRevoked.into());
            }
            Ok(state) => state.entry,
            Err(e) => {
                event!(Level::WARN, error = %e, "Cache unavailable, using durable store");
                None
            }
        };

        if let Some(entry) = &cached {
            if entry.expires_at <= now {
                return Err(GrantFailure::RefreshExpired.into());
            }
            if !entry.is_valid {
                return Err(GrantFailure::RefreshRevoked.into());
            }
        }

        // The durable row decides, whatever the cache said.
        let record = match parts
            .store
            .touch_active_refresh_token(&hash, &namespace, now)
            .await?
        {
            RefreshTouch::Active(record) => record,
            RefreshTouch::Revoked => return Err(GrantFailure::RefreshRevoked.into()),
            RefreshTouch::Expired => return Err(GrantFailure::RefreshExpired.into()),
            RefreshTouch::Missing => return Err(GrantFailure::RefreshUnknown.into()),
        };

        let stored = parts.crypto.decrypt(&record.encrypted_token)?;
        if !bool::from(stored.as_bytes().ct_eq(raw.as_ref().as_bytes())) {
            event!(Level::WARN, token_hash = hash.short(), "Stored refresh token does not match");
            return Err(GrantFailure::RefreshMismatch.into());
        }

        if let (Some(requested), Some(bound)) = (device_id, record.device_id.as_ref()) {
            if requested != bound {
                return Err(GrantFailure::DeviceMismatch.into());
            }
        }

        let scope = match context.map(|c| &c.scope).filter(|s| !s.is_empty()) {
            Some(requested) => match &record.scope {
                Some(granted) if granted.contains_all(requested) => Some(requested.clone()),
                _ => return Err(GrantFailure::ScopeWidening.into()),
            },
            None => record.scope.clone(),
        };

        let role = match &cached {
            Some(entry) => entry.role.clone(),
            None => {
                self.users
                    .find_user(&record.user_uuid)
                    .await?
                    .ok_or(GrantFailure::UnknownUser)?
                    .role
            }
        };

        let subject = Subject {
            uuid: record.user_uuid.clone(),
            id: record.user_id,
            role,
        };
        let mint_context = record
            .client_id
            .clone()
            .map(|client_id| OAuthContext::new(client_id, scope.clone().unwrap_or_default()));

        let token_id = TokenId::new();
        let (access_token, claims) =
            self.tokens
                .new_access_token(&subject, &token_id, mint_context.as_ref(), now)?;

        let mut entry =
            cached.unwrap_or_else(|| CachedRefreshToken::from_record(&record, &subject.role));
        entry.last_accessed_at = now;
        entry.access_count += 1;
        self.cache_session(&namespace, entry, &claims).await;

        event!(Level::DEBUG, token_hash = hash.short(), "Refreshed access token");

        Ok(RefreshedAccessToken {
            access_token,
            token_id,
            access_expires_in: self.tokens.access_ttl_secs(),
            scope,
        })
    }

    /// Answers "is this bearer authenticated for `client_id`". Signature and
    /// expiry are always enforced. If the cache cannot be reached, those
    /// stateless checks alone decide.
    #[tracing::instrument(skip_all, fields(client_id = ?client_id))]
    pub async fn validate_access_token(
        &self,
        token: &str,
        client_id: Option<&ClientId>,
    ) -> Option<AccessClaims> {
        let parts = &self.parts;
        let now = parts.clock.now();

        let claims = match self.tokens.validate_token(token, now) {
            Ok(claims) => claims,
            Err(rejection) => {
                event!(Level::DEBUG, %rejection, "Rejected access token");
                return None;
            }
        };

        if claims.client_id.as_ref() != client_id {
            event!(Level::DEBUG, issued_to = ?claims.client_id, "Access token from another namespace");
            return None;
        }

        let namespace = Namespace::of(client_id);
        let hash = parts.crypto.hash(claims.token_id.as_ref());

        match parts.cache.access_state(&namespace, &hash).await {
            Ok(state) if state.blacklisted => None,
            Ok(CachedState { entry: Some(info), .. }) => {
                let live = info.is_valid && info.expires_at > now && info.user_uuid == claims.sub;
                if live {
                    Some(claims)
                } else {
                    None
                }
            }
            Ok(CachedState { entry: None, .. }) => {
                event!(Level::DEBUG, token_hash = hash.short(), "No live cache entry for access token");
                None
            }
            Err(e) => {
                event!(Level::WARN, error = %e, "Cache unavailable, accepting on signature");
                Some(claims)
            }
        }
    }

    /// The access token is cached as a child of `refresh`, next to it in the same pipeline.
    async fn cache_session(&self, namespace: &Namespace, refresh: CachedRefreshToken, claims: &AccessClaims) {
        let access = TokenInfo {
            user_uuid: claims.sub.clone(),
            client_id: claims.client_id.clone(),
            scope: claims.scope.clone(),
            token_hash: self.parts.crypto.hash(claims.token_id.as_ref()),
            refresh_token_hash: Some(refresh.token_hash.clone()),
            role: claims.role.clone(),
            device_id: refresh.device_id.clone(),
            issued_at: claims.iat,
            expires_at: claims.exp,
            last_accessed_at: claims.iat,
            access_count: 0,
            is_valid: true,
        };

        if let Err(e) = self.parts.cache.put_session(namespace, &refresh, &access).await {
            event!(
                Level::WARN,
                token_hash = refresh.token_hash.short(),
                error = %e,
                "Failed to cache token pair"
            );
        }
    }
}
