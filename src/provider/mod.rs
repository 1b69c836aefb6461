use std::sync::Arc;

use crate::auth::ClientCredentials;
use crate::cache::{CacheStore, TokenCache};
use crate::config::Config;
use crate::core::models::{
    AuthorizationCode, Client, DeviceInfo, OAuthContext, RefreshedAccessToken, RevokeReason, Subject,
    SweepStats, TokenPair, TokenRef,
};
use crate::core::types::{AuthCode, ClientId, DeviceId, RedirectUri, RefreshTokenValue, UserUuid};
use crate::auth::{pkce, AuthorizationRequest};
use crate::db::DurableStore;
use crate::directory::{ClientRegistry, UserDirectory};
use crate::util::{clock::Clock, crypto::CryptoCore, hash::HashingService};

use tracing::{event, Level};

pub mod access_token;
pub mod authorization;
pub mod claims;
pub mod device;
pub mod error;
pub mod introspection;
pub mod lifecycle;
pub mod revocation;
pub mod token;

pub use authorization::AuthorizationCodeFlow;
pub use claims::AccessClaims;
pub use device::DeviceLimiter;
pub use error::{ClientFailure, Error, GrantFailure};
pub use lifecycle::TokenLifecycle;
pub use revocation::RevocationCoordinator;
pub use token::TokenService;

/// Collaborators shared by every component.
#[derive(Debug, Clone)]
pub struct Components {
    pub store: Arc<dyn DurableStore>,
    pub cache: TokenCache,
    pub crypto: Arc<CryptoCore>,
    pub clock: Arc<dyn Clock>,
}

/// External systems the provider is wired to.
#[derive(Debug, Clone)]
pub struct Ports {
    pub store: Arc<dyn DurableStore>,
    pub cache: Arc<dyn CacheStore>,
    pub clients: Arc<dyn ClientRegistry>,
    pub users: Arc<dyn UserDirectory>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug)]
pub struct Provider {
    config: Config,
    parts: Components,
    clients: Arc<dyn ClientRegistry>,
    users: Arc<dyn UserDirectory>,
    hasher: HashingService,
    tokens: Arc<TokenService>,
    codes: AuthorizationCodeFlow,
    lifecycle: TokenLifecycle,
    revocation: RevocationCoordinator,
}

impl Provider {
    pub fn new(config: Config, ports: Ports) -> Result<Self, Error> {
        let crypto = Arc::new(CryptoCore::new(config.encryption_key())?);
        let cache = TokenCache::new(
            ports.cache,
            ports.clock.clone(),
            config.cache_timeout(),
            config.cache_ttl_ceiling_secs(),
        );
        let parts = Components {
            store: ports.store,
            cache,
            crypto,
            clock: ports.clock,
        };

        let tokens = Arc::new(TokenService::new(
            config.signing_key(),
            config.access_ttl_secs(),
        ));
        let revocation = RevocationCoordinator::new(parts.clone());
        let devices = DeviceLimiter::new(parts.clone(), revocation.clone(), config.max_devices());
        let lifecycle = TokenLifecycle::new(
            parts.clone(),
            tokens.clone(),
            ports.users.clone(),
            devices,
            config.refresh_ttl_secs(),
        );
        let codes = AuthorizationCodeFlow::new(
            parts.store.clone(),
            parts.crypto.clone(),
            parts.clock.clone(),
        );
        let hasher = HashingService::with_secret_key(config.client_secret_pepper().to_vec());

        Ok(Self {
            config,
            parts,
            clients: ports.clients,
            users: ports.users,
            hasher,
            tokens,
            codes,
            lifecycle,
            revocation,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hasher(&self) -> &HashingService {
        &self.hasher
    }

    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.lifecycle
    }

    pub fn revocation(&self) -> &RevocationCoordinator {
        &self.revocation
    }

    pub async fn check_client_authentication(
        &self,
        cred: &ClientCredentials,
    ) -> Result<Client, Error> {
        let client = self
            .clients
            .find_client(&cred.client_id)
            .await?
            .ok_or(ClientFailure::Unknown)?;

        match self.hasher.verify(&cred.client_secret, &client.secret) {
            Ok(true) => Ok(client),
            Ok(false) => Err(ClientFailure::BadSecret.into()),
            Err(e) => {
                event!(Level::WARN, client_id = ?client.id, error = %e, "Stored client secret is unusable");
                Err(ClientFailure::BadSecret.into())
            }
        }
    }

    pub async fn create_authorization_code(
        &self,
        req: &AuthorizationRequest,
        subject: &Subject,
    ) -> Result<AuthCode, Error> {
        self.codes.create(req, subject).await
    }

    pub async fn consume_authorization_code(
        &self,
        code: &AuthCode,
        client_id: &ClientId,
        redirect_uri: &RedirectUri,
        verifier: Option<&pkce::Verifier>,
    ) -> Result<AuthorizationCode, Error> {
        self.codes
            .consume(code, client_id, redirect_uri, verifier)
            .await
    }

    pub async fn issue_pair(
        &self,
        subject: &Subject,
        device: DeviceInfo,
        context: Option<OAuthContext>,
    ) -> Result<TokenPair, Error> {
        self.lifecycle.issue_pair(subject, device, context).await
    }

    pub async fn refresh(
        &self,
        raw: &RefreshTokenValue,
        context: Option<&OAuthContext>,
        device_id: Option<&DeviceId>,
    ) -> Result<RefreshedAccessToken, Error> {
        self.lifecycle.refresh(raw, context, device_id).await
    }

    pub async fn validate_access_token(
        &self,
        token: &str,
        client_id: Option<&ClientId>,
    ) -> Option<AccessClaims> {
        self.lifecycle.validate_access_token(token, client_id).await
    }

    pub async fn revoke_one(&self, token: &TokenRef, reason: &RevokeReason) -> Result<bool, Error> {
        self.revocation.revoke_one(token, reason).await
    }

    pub async fn revoke_all_for_user(
        &self,
        user: &UserUuid,
        reason: &RevokeReason,
    ) -> Result<usize, Error> {
        self.revocation.revoke_all_for_user(user, reason).await
    }

    pub async fn revoke_device(
        &self,
        user: &UserUuid,
        device: &DeviceId,
        reason: &RevokeReason,
    ) -> Result<usize, Error> {
        self.revocation.revoke_device(user, device, reason).await
    }

    #[tracing::instrument(skip_all)]
    pub async fn sweep(&self) -> Result<SweepStats, Error> {
        let now = self.parts.clock.now();
        let stats = self
            .parts
            .store
            .sweep(now, self.config.retention_secs())
            .await?;

        event!(
            Level::INFO,
            codes_terminated = stats.codes_terminated,
            codes_deleted = stats.codes_deleted,
            refresh_tokens_deleted = stats.refresh_tokens_deleted,
            "Swept token tables"
        );
        Ok(stats)
    }

    /// Runs [`Provider::sweep`] on the configured interval, forever. A failed
    /// sweep is logged and retried on the next tick.
    pub async fn start_clean_up_worker(&self) {
        use tokio::time::interval;

        let mut interval = interval(self.config.sweep_interval());

        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                event!(Level::ERROR, error = %e, "Clean up sweep failed");
            }
        }
    }
}
