//! Namespaced token metadata cache.
//!
//! Every primary key is `(namespace, token hash)`. The cache is advisory: the
//! durable store decides whether a refresh token is live, and callers treat a
//! [`CacheError`] as a miss.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::core::models::{CachedRefreshToken, TokenInfo};
use crate::core::types::{DeviceId, Namespace, TokenHash, UserUuid};
use crate::util::clock::Clock;

pub mod memory;

pub use memory::MemoryCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache call timed out after {0:?}")]
    Timeout(Duration),
    #[error("cache entry is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-value port with TTLs and string sets, the subset of a Redis-like store
/// the token cache needs.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Adds `member` with its own TTL, like a sorted set scored by expiry.
    /// Members past their TTL are dropped here and never returned by
    /// [`set_members`](Self::set_members), so the set only holds live entries.
    async fn add_to_set(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), CacheError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError>;

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// Reads several keys in one round trip, like `MGET`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Applies `writes` in order as a single pipeline.
    async fn write_batch(&self, writes: Vec<CacheWrite>) -> Result<(), CacheError> {
        for write in writes {
            match write {
                CacheWrite::Set {
                    key,
                    value,
                    ttl_secs,
                } => self.set(&key, value, ttl_secs).await?,
                CacheWrite::AddToSet {
                    key,
                    member,
                    ttl_secs,
                } => self.add_to_set(&key, &member, ttl_secs).await?,
            }
        }
        Ok(())
    }
}

/// One command of a [`CacheStore::write_batch`] pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    Set {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    AddToSet {
        key: String,
        member: String,
        ttl_secs: u64,
    },
}

/// Denylist flag and cached projection of one token, read together.
#[derive(Debug, Clone)]
pub struct CachedState<T> {
    pub blacklisted: bool,
    pub entry: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// One entry of a user's reverse index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedKey {
    pub kind: TokenKind,
    pub hash: TokenHash,
    pub namespace: Namespace,
}

impl IndexedKey {
    pub fn new(kind: TokenKind, namespace: &Namespace, hash: &TokenHash) -> Self {
        Self {
            kind,
            hash: hash.clone(),
            namespace: namespace.clone(),
        }
    }

    // The namespace goes last since client ids may contain the separator.
    fn encode(&self) -> String {
        format!("{}:{}:{}", self.kind.as_str(), self.hash.0, self.namespace)
    }

    fn decode(member: &str) -> Option<Self> {
        let mut parts = member.splitn(3, ':');
        let kind = match parts.next()? {
            "access" => TokenKind::Access,
            "refresh" => TokenKind::Refresh,
            _ => return None,
        };
        let hash = TokenHash(parts.next()?.to_string());
        let namespace = parts.next()?;
        let namespace = if namespace.is_empty() {
            Namespace::first_party()
        } else {
            Namespace::of(Some(&crate::core::types::ClientId(namespace.to_string())))
        };
        Some(Self {
            kind,
            hash,
            namespace,
        })
    }
}

fn token_key(kind: TokenKind, namespace: &Namespace, hash: &TokenHash) -> String {
    format!("kagi:{}:{}:{}", kind.as_str(), namespace, hash.0)
}

fn blacklist_key(namespace: &Namespace, hash: &TokenHash) -> String {
    format!("kagi:blacklist:{}:{}", namespace, hash.0)
}

fn user_key(user: &UserUuid) -> String {
    format!("kagi:user:{}", user)
}

fn device_key(namespace: &Namespace, user: &UserUuid, device: &DeviceId) -> String {
    format!("kagi:device:{}:{}:{}", namespace, user, device.0)
}

/// Token-aware view over a [`CacheStore`]. Every call is bounded by a short
/// timeout and TTLs are clamped to the configured ceiling.
#[derive(Debug, Clone)]
pub struct TokenCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    ttl_ceiling_secs: u64,
}

impl TokenCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        ttl_ceiling_secs: u64,
    ) -> Self {
        Self {
            store,
            clock,
            timeout,
            ttl_ceiling_secs,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))?
    }

    /// `min(remaining lifetime, ceiling)`, or `None` once the token is dead.
    pub fn ttl_for(&self, expires_at: i64) -> Option<u64> {
        remaining_secs(expires_at, self.clock.now()).map(|r| r.min(self.ttl_ceiling_secs))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.bounded(self.store.get(key)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn state<T: DeserializeOwned>(
        &self,
        kind: TokenKind,
        namespace: &Namespace,
        hash: &TokenHash,
    ) -> Result<CachedState<T>, CacheError> {
        let keys = [blacklist_key(namespace, hash), token_key(kind, namespace, hash)];
        let mut values = self.bounded(self.store.get_many(&keys)).await?.into_iter();

        let blacklisted = values.next().flatten().is_some();
        let entry = match values.next().flatten() {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(CachedState { blacklisted, entry })
    }

    pub async fn access_state(
        &self,
        namespace: &Namespace,
        hash: &TokenHash,
    ) -> Result<CachedState<TokenInfo>, CacheError> {
        self.state(TokenKind::Access, namespace, hash).await
    }

    pub async fn refresh_state(
        &self,
        namespace: &Namespace,
        hash: &TokenHash,
    ) -> Result<CachedState<CachedRefreshToken>, CacheError> {
        self.state(TokenKind::Refresh, namespace, hash).await
    }

    fn access_writes(
        &self,
        namespace: &Namespace,
        info: &TokenInfo,
        writes: &mut Vec<CacheWrite>,
    ) -> Result<(), CacheError> {
        let ttl = match self.ttl_for(info.expires_at) {
            Some(ttl) => ttl,
            None => return Ok(()),
        };

        writes.push(CacheWrite::Set {
            key: token_key(TokenKind::Access, namespace, &info.token_hash),
            value: serde_json::to_string(info)?,
            ttl_secs: ttl,
        });
        writes.push(CacheWrite::AddToSet {
            key: user_key(&info.user_uuid),
            member: IndexedKey::new(TokenKind::Access, namespace, &info.token_hash).encode(),
            ttl_secs: ttl,
        });
        Ok(())
    }

    fn refresh_writes(
        &self,
        namespace: &Namespace,
        entry: &CachedRefreshToken,
        writes: &mut Vec<CacheWrite>,
    ) -> Result<(), CacheError> {
        let ttl = match self.ttl_for(entry.expires_at) {
            Some(ttl) => ttl,
            None => return Ok(()),
        };

        writes.push(CacheWrite::Set {
            key: token_key(TokenKind::Refresh, namespace, &entry.token_hash),
            value: serde_json::to_string(entry)?,
            ttl_secs: ttl,
        });
        writes.push(CacheWrite::AddToSet {
            key: user_key(&entry.user_uuid),
            member: IndexedKey::new(TokenKind::Refresh, namespace, &entry.token_hash).encode(),
            ttl_secs: ttl,
        });
        if let Some(device) = &entry.device_id {
            writes.push(CacheWrite::Set {
                key: device_key(namespace, &entry.user_uuid, device),
                value: entry.token_hash.0.clone(),
                ttl_secs: ttl,
            });
        }
        Ok(())
    }

    async fn flush(&self, writes: Vec<CacheWrite>) -> Result<(), CacheError> {
        if writes.is_empty() {
            return Ok(());
        }
        self.bounded(self.store.write_batch(writes)).await
    }

    /// Refresh entry and the access token minted from it, in one pipeline.
    pub async fn put_session(
        &self,
        namespace: &Namespace,
        refresh: &CachedRefreshToken,
        access: &TokenInfo,
    ) -> Result<(), CacheError> {
        let mut writes = Vec::new();
        self.refresh_writes(namespace, refresh, &mut writes)?;
        self.access_writes(namespace, access, &mut writes)?;
        self.flush(writes).await
    }

    pub async fn get_access(
        &self,
        namespace: &Namespace,
        hash: &TokenHash,
    ) -> Result<Option<TokenInfo>, CacheError> {
        self.get_json(&token_key(TokenKind::Access, namespace, hash))
            .await
    }

    /// Writes the refresh-token projection along with its user and device index entries.
    pub async fn put_refresh(
        &self,
        namespace: &Namespace,
        entry: &CachedRefreshToken,
    ) -> Result<(), CacheError> {
        let mut writes = Vec::new();
        self.refresh_writes(namespace, entry, &mut writes)?;
        self.flush(writes).await
    }

    pub async fn get_refresh(
        &self,
        namespace: &Namespace,
        hash: &TokenHash,
    ) -> Result<Option<CachedRefreshToken>, CacheError> {
        self.get_json(&token_key(TokenKind::Refresh, namespace, hash))
            .await
    }

    pub async fn evict(
        &self,
        kind: TokenKind,
        namespace: &Namespace,
        hash: &TokenHash,
    ) -> Result<(), CacheError> {
        self.bounded(self.store.delete(&token_key(kind, namespace, hash)))
            .await
    }

    /// Denylists a hash until the token would have expired anyway.
    pub async fn blacklist(
        &self,
        namespace: &Namespace,
        hash: &TokenHash,
        expires_at: i64,
    ) -> Result<(), CacheError> {
        let ttl = match remaining_secs(expires_at, self.clock.now()) {
            Some(ttl) => ttl,
            None => return Ok(()),
        };

        self.bounded(
            self.store
                .set(&blacklist_key(namespace, hash), "1".to_string(), ttl),
        )
        .await
    }

    pub async fn user_keys(&self, user: &UserUuid) -> Result<Vec<IndexedKey>, CacheError> {
        let members = self.bounded(self.store.set_members(&user_key(user))).await?;
        Ok(members.iter().filter_map(|m| IndexedKey::decode(m)).collect())
    }

    pub async fn unindex_user(&self, user: &UserUuid, member: &IndexedKey) -> Result<(), CacheError> {
        self.bounded(
            self.store
                .remove_from_set(&user_key(user), &member.encode()),
        )
        .await
    }

    pub async fn drop_user_index(&self, user: &UserUuid) -> Result<(), CacheError> {
        self.bounded(self.store.delete(&user_key(user))).await
    }

    pub async fn device_token(
        &self,
        namespace: &Namespace,
        user: &UserUuid,
        device: &DeviceId,
    ) -> Result<Option<TokenHash>, CacheError> {
        let found = self
            .bounded(self.store.get(&device_key(namespace, user, device)))
            .await?;
        Ok(found.map(TokenHash))
    }

    /// Clears the device entry, but only while it still points at `hash`.
    pub async fn unindex_device(
        &self,
        namespace: &Namespace,
        user: &UserUuid,
        device: &DeviceId,
        hash: &TokenHash,
    ) -> Result<(), CacheError> {
        match self.device_token(namespace, user, device).await? {
            Some(current) if &current == hash => {
                self.bounded(self.store.delete(&device_key(namespace, user, device)))
                    .await
            }
            _ => Ok(()),
        }
    }
}

fn remaining_secs(expires_at: i64, now: i64) -> Option<u64> {
    let remaining = expires_at.saturating_sub(now);
    if remaining > 0 {
        Some(remaining as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ClientId, Role};
    use crate::util::clock::ManualClock;

    fn info(user: &str, hash: &str, expires_at: i64) -> TokenInfo {
        TokenInfo {
            user_uuid: UserUuid(user.to_string()),
            client_id: None,
            scope: None,
            token_hash: TokenHash(hash.to_string()),
            refresh_token_hash: None,
            role: Role("member".to_string()),
            device_id: None,
            issued_at: 0,
            expires_at,
            last_accessed_at: 0,
            access_count: 0,
            is_valid: true,
        }
    }

    fn cache(clock: Arc<ManualClock>, ceiling: u64) -> (TokenCache, Arc<MemoryCache>) {
        let store = Arc::new(MemoryCache::new(clock.clone()));
        let cache = TokenCache::new(store.clone(), clock, Duration::from_millis(100), ceiling);
        (cache, store)
    }

    #[test]
    fn indexed_keys_survive_separators_in_client_ids() {
        let ns = Namespace::of(Some(&ClientId("urn:mcp:client".to_string())));
        let key = IndexedKey::new(TokenKind::Refresh, &ns, &TokenHash("abc".to_string()));
        assert_eq!(IndexedKey::decode(&key.encode()), Some(key));

        let first_party =
            IndexedKey::new(TokenKind::Access, &Namespace::first_party(), &TokenHash("x".to_string()));
        assert_eq!(IndexedKey::decode(&first_party.encode()), Some(first_party));
        assert_eq!(IndexedKey::decode("bogus:x:y"), None);
    }

    #[tokio::test]
    async fn ttl_is_clamped_to_ceiling() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let (cache, store) = cache(clock.clone(), 60);

        assert_eq!(cache.ttl_for(1_900), Some(60));
        assert_eq!(cache.ttl_for(1_030), Some(30));
        assert_eq!(cache.ttl_for(1_000), None);

        let ns = Namespace::first_party();
        let refresh = refresh_entry("u1", "r1", None, 5_000);
        cache.put_session(&ns, &refresh, &info("u1", "h1", 1_900)).await.unwrap();
        assert!(cache.get_access(&ns, &TokenHash("h1".to_string())).await.unwrap().is_some());

        clock.advance(61);
        assert!(cache.get_access(&ns, &TokenHash("h1".to_string())).await.unwrap().is_none());
        assert!(store.is_empty_for_prefix("kagi:access:"));
    }

    #[tokio::test]
    async fn namespaces_do_not_overlap() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let (cache, _) = cache(clock, 3_600);

        let x = Namespace::of(Some(&ClientId("x".to_string())));
        let y = Namespace::of(Some(&ClientId("y".to_string())));
        let hash = TokenHash("h".to_string());

        let refresh = refresh_entry("u1", "r", None, 5_000);
        cache.put_session(&x, &refresh, &info("u1", "h", 1_900)).await.unwrap();
        assert!(cache.get_access(&x, &hash).await.unwrap().is_some());
        assert!(cache.get_access(&y, &hash).await.unwrap().is_none());
        assert!(cache.get_access(&Namespace::first_party(), &hash).await.unwrap().is_none());
    }

    /// Counts calls that reach the backing store.
    #[derive(Debug)]
    struct Counting {
        inner: MemoryCache,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Counting {
        fn hit(&self) {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CacheStore for Counting {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.hit();
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError> {
            self.hit();
            self.inner.set(key, value, ttl_secs).await
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.hit();
            self.inner.delete(key).await
        }

        async fn add_to_set(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), CacheError> {
            self.hit();
            self.inner.add_to_set(key, member, ttl_secs).await
        }

        async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
            self.hit();
            self.inner.set_members(key).await
        }

        async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), CacheError> {
            self.hit();
            self.inner.remove_from_set(key, member).await
        }

        async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
            self.hit();
            self.inner.get_many(keys).await
        }

        async fn write_batch(&self, writes: Vec<CacheWrite>) -> Result<(), CacheError> {
            self.hit();
            self.inner.write_batch(writes).await
        }
    }

    fn refresh_entry(user: &str, hash: &str, device: Option<&str>, expires_at: i64) -> CachedRefreshToken {
        CachedRefreshToken {
            record_id: hash.to_string(),
            token_hash: TokenHash(hash.to_string()),
            encrypted_token: "blob".to_string(),
            user_uuid: UserUuid(user.to_string()),
            user_id: 1,
            role: Role("member".to_string()),
            client_id: None,
            scope: None,
            device_id: device.map(|d| DeviceId(d.to_string())),
            expires_at,
            last_accessed_at: 0,
            access_count: 0,
            is_valid: true,
        }
    }

    #[tokio::test]
    async fn session_is_written_and_read_in_single_calls() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let store = Arc::new(Counting {
            inner: MemoryCache::new(clock.clone()),
            calls: Default::default(),
        });
        let cache = TokenCache::new(store.clone(), clock, Duration::from_millis(100), 3_600);
        let ns = Namespace::first_party();

        let refresh = refresh_entry("u1", "r1", Some("phone"), 5_000);
        let mut access = info("u1", "a1", 1_900);
        access.refresh_token_hash = Some(TokenHash("r1".to_string()));

        cache.put_session(&ns, &refresh, &access).await.unwrap();
        assert_eq!(store.calls(), 1);

        let state = cache.refresh_state(&ns, &TokenHash("r1".to_string())).await.unwrap();
        assert!(!state.blacklisted);
        assert_eq!(state.entry.map(|e| e.record_id), Some("r1".to_string()));
        assert_eq!(store.calls(), 2);

        let state = cache.access_state(&ns, &TokenHash("a1".to_string())).await.unwrap();
        assert_eq!(
            state.entry.and_then(|e| e.refresh_token_hash),
            Some(TokenHash("r1".to_string()))
        );
        assert_eq!(store.calls(), 3);

        let keys = cache.user_keys(&UserUuid("u1".to_string())).await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn user_index_holds_only_live_access_tokens() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let (cache, _) = cache(clock.clone(), 3_600);
        let ns = Namespace::first_party();
        let refresh = refresh_entry("u1", "r1", None, 1_000_000);
        let user = UserUuid("u1".to_string());

        for n in 0..200 {
            let now = clock.now();
            let access = info("u1", &format!("a{}", n), now + 900);
            cache.put_session(&ns, &refresh, &access).await.unwrap();
            clock.advance(900);
        }

        let access = info("u1", "last", clock.now() + 900);
        cache.put_session(&ns, &refresh, &access).await.unwrap();

        let keys = cache.user_keys(&user).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().any(|k| k.kind == TokenKind::Access && k.hash.0 == "last"));
    }

    #[tokio::test]
    async fn blacklist_expires_with_token() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let (cache, _) = cache(clock.clone(), 3_600);
        let ns = Namespace::first_party();
        let hash = TokenHash("h".to_string());

        cache.blacklist(&ns, &hash, 1_100).await.unwrap();
        assert!(cache.access_state(&ns, &hash).await.unwrap().blacklisted);

        clock.advance(100);
        assert!(!cache.access_state(&ns, &hash).await.unwrap().blacklisted);

        // Already expired: nothing to denylist.
        cache.blacklist(&ns, &hash, 900).await.unwrap();
        assert!(!cache.access_state(&ns, &hash).await.unwrap().blacklisted);
    }

    #[tokio::test]
    async fn user_index_tracks_both_kinds() {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let (cache, _) = cache(clock, 3_600);
        let ns = Namespace::first_party();

        let refresh = CachedRefreshToken {
            record_id: "r".to_string(),
            token_hash: TokenHash("r1".to_string()),
            encrypted_token: "blob".to_string(),
            user_uuid: UserUuid("u1".to_string()),
            user_id: 1,
            role: Role("member".to_string()),
            client_id: None,
            scope: None,
            device_id: Some(DeviceId("phone".to_string())),
            expires_at: 5_000,
            last_accessed_at: 1_000,
            access_count: 0,
            is_valid: true,
        };
        cache.put_session(&ns, &refresh, &info("u1", "a1", 1_900)).await.unwrap();

        let keys = cache.user_keys(&UserUuid("u1".to_string())).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().any(|k| k.kind == TokenKind::Refresh && k.hash.0 == "r1"));

        let user = UserUuid("u1".to_string());
        let device = DeviceId("phone".to_string());
        assert_eq!(
            cache.device_token(&ns, &user, &device).await.unwrap(),
            Some(TokenHash("r1".to_string()))
        );

        // A stale hash leaves the device entry alone.
        cache
            .unindex_device(&ns, &user, &device, &TokenHash("old".to_string()))
            .await
            .unwrap();
        assert!(cache.device_token(&ns, &user, &device).await.unwrap().is_some());

        cache
            .unindex_device(&ns, &user, &device, &TokenHash("r1".to_string()))
            .await
            .unwrap();
        assert!(cache.device_token(&ns, &user, &device).await.unwrap().is_none());
    }
}
