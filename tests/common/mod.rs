#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use kagi::auth::{pkce, AuthorizationRequest, ClientCredentials};
use kagi::cache::{CacheError, CacheStore, CacheWrite, MemoryCache};
use kagi::config::{Config, Profile, Settings};
use kagi::core::models::Subject;
use kagi::core::types::{ClientId, ClientSecret, HashedClientSecret, RedirectUri, Role, Scope, UserUuid};
use kagi::db::MemoryStore;
use kagi::directory::{StaticClients, StaticUsers};
use kagi::provider::{Ports, Provider};
use kagi::util::{clock::ManualClock, crypto::CryptoCore, hash::HashingService};

pub const START: i64 = 1_700_000_000;

pub const SIGNING_KEY: [u8; 64] = [7; 64];
pub const ENCRYPTION_KEY: [u8; 32] = [3; 32];
pub const PEPPER: &[u8] = b"test-pepper";

pub const CLIENT_X: &str = "client-x";
pub const SECRET_X: &str = "secret-x";
pub const REDIRECT_X: &str = "https://a.example/cb";

pub const CLIENT_Y: &str = "client-y";
pub const SECRET_Y: &str = "secret-y";
pub const REDIRECT_Y: &str = "https://b.example/cb";

pub const ALICE: &str = "4a3c7f5e-1111-4d3b-9f2a-000000000001";
pub const BOB: &str = "4a3c7f5e-2222-4d3b-9f2a-000000000002";

// Argon2 is slow in debug builds; hash each secret once per test binary.
fn hashed_secrets() -> &'static (HashedClientSecret, HashedClientSecret) {
    static SECRETS: OnceLock<(HashedClientSecret, HashedClientSecret)> = OnceLock::new();
    SECRETS.get_or_init(|| {
        let hasher = HashingService::with_secret_key(PEPPER);
        (
            hasher.hash(&ClientSecret(SECRET_X.to_string())).unwrap(),
            hasher.hash(&ClientSecret(SECRET_Y.to_string())).unwrap(),
        )
    })
}

/// Cache that can be switched off, entirely or for writes only.
#[derive(Debug)]
pub struct FlakyCache {
    inner: MemoryCache,
    down: AtomicBool,
    writes_down: AtomicBool,
}

impl FlakyCache {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: MemoryCache::new(clock),
            down: AtomicBool::new(false),
            writes_down: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &MemoryCache {
        &self.inner
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_writes_down(&self, down: bool) {
        self.writes_down.store(down, Ordering::SeqCst);
    }

    fn read(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache is down".to_string()));
        }
        Ok(())
    }

    fn write(&self) -> Result<(), CacheError> {
        self.read()?;
        if self.writes_down.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache rejects writes".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.read()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError> {
        self.write()?;
        self.inner.set(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.write()?;
        self.inner.delete(key).await
    }

    async fn add_to_set(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.write()?;
        self.inner.add_to_set(key, member, ttl_secs).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.read()?;
        self.inner.set_members(key).await
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.write()?;
        self.inner.remove_from_set(key, member).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.read()?;
        self.inner.get_many(keys).await
    }

    async fn write_batch(&self, writes: Vec<CacheWrite>) -> Result<(), CacheError> {
        self.write()?;
        self.inner.write_batch(writes).await
    }
}

pub fn settings() -> Settings {
    Settings {
        profile: Profile::Test,
        signing_key: Some(SIGNING_KEY.to_vec()),
        encryption_key: Some(ENCRYPTION_KEY.to_vec()),
        client_secret_pepper: Some(PEPPER.to_vec()),
        ..Settings::test()
    }
}

pub struct Harness {
    pub provider: Arc<Provider>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<FlakyCache>,
    pub clock: Arc<ManualClock>,
    pub crypto: CryptoCore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let clock = Arc::new(ManualClock::starting_at(START));
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(FlakyCache::new(clock.clone()));

        let (secret_x, secret_y) = hashed_secrets().clone();
        let clients = StaticClients::new()
            .with_client(CLIENT_X, "Client X", secret_x, &[REDIRECT_X], "profile read write")
            .with_client(CLIENT_Y, "Client Y", secret_y, &[REDIRECT_Y], "profile read");
        let users = StaticUsers::new()
            .with_user(ALICE, 1, "member")
            .with_user(BOB, 2, "admin");

        let config = Config::from_settings(settings).unwrap();
        let provider = Provider::new(
            config,
            Ports {
                store: store.clone(),
                cache: cache.clone(),
                clients: Arc::new(clients),
                users: Arc::new(users),
                clock: clock.clone(),
            },
        )
        .unwrap();

        Self {
            provider: Arc::new(provider),
            store,
            cache,
            clock,
            crypto: CryptoCore::new(&ENCRYPTION_KEY).unwrap(),
        }
    }
}

pub fn alice() -> Subject {
    Subject {
        uuid: UserUuid(ALICE.to_string()),
        id: 1,
        role: Role("member".to_string()),
    }
}

pub fn bob() -> Subject {
    Subject {
        uuid: UserUuid(BOB.to_string()),
        id: 2,
        role: Role("admin".to_string()),
    }
}

pub fn client_x() -> ClientId {
    ClientId(CLIENT_X.to_string())
}

pub fn client_y() -> ClientId {
    ClientId(CLIENT_Y.to_string())
}

pub fn credentials_x() -> ClientCredentials {
    ClientCredentials::new(CLIENT_X, SECRET_X)
}

pub fn credentials_y() -> ClientCredentials {
    ClientCredentials::new(CLIENT_Y, SECRET_Y)
}

pub fn redirect_x() -> RedirectUri {
    RedirectUri(REDIRECT_X.to_string())
}

pub fn redirect_y() -> RedirectUri {
    RedirectUri(REDIRECT_Y.to_string())
}

pub fn scope(s: &str) -> Scope {
    Scope::from_delimited_parts(s)
}

pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

/// An approved request from client X carrying an S256 challenge.
pub fn authorization_request_x() -> AuthorizationRequest {
    AuthorizationRequest {
        client_id: client_x(),
        redirect_uri: redirect_x(),
        scope: scope("profile read"),
        state: Some("xyz".to_string()),
        pkce_challenge: Some(pkce::Challenge::s256(VERIFIER)),
    }
}
