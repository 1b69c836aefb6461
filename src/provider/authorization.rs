use std::sync::Arc;

use crate::auth::{pkce, AuthenticationCodeResponse, AuthorizationRequest};
use crate::core::models::{AuthorizationCode, Subject};
use crate::core::types::{AuthCode, ClientId, Expire, RedirectUri};
use crate::db::DurableStore;
use crate::util::{clock::Clock, crypto::CryptoCore, random::FromRandom};

use super::error::{ClientFailure, Error, GrantFailure};
use super::Provider;

use tracing::{event, Level};

/// Issues authorization codes and consumes each at most once.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeFlow {
    store: Arc<dyn DurableStore>,
    crypto: Arc<CryptoCore>,
    clock: Arc<dyn Clock>,
}

impl AuthorizationCodeFlow {
    pub fn new(store: Arc<dyn DurableStore>, crypto: Arc<CryptoCore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            crypto,
            clock,
        }
    }

    #[tracing::instrument(skip_all, fields(client_id = ?req.client_id, user = %subject.uuid))]
    pub async fn create(&self, req: &AuthorizationRequest, subject: &Subject) -> Result<AuthCode, Error> {
        let code = AuthCode::from_random();
        let now = self.clock.now();

        let data = AuthorizationCode {
            code_hash: self.crypto.hash(code.as_ref()),
            client_id: req.client_id.clone(),
            user_uuid: subject.uuid.clone(),
            user_id: subject.id,
            redirect_uri: req.redirect_uri.clone(),
            scope: req.scope.clone(),
            state: req.state.clone(),
            pkce_challenge: req.pkce_challenge.clone(),
            created_at: now,
            expires_at: AuthorizationCode::expiry(now),
            used: false,
            used_time: None,
        };

        event!(
            Level::DEBUG,
            code = data.code_hash.short(),
            pkce = data.pkce_challenge.is_some(),
            "Storing authorization code"
        );
        self.store.insert_authorization_code(data).await?;

        Ok(code)
    }

    /// Checks run in a fixed order. Only a caller that passes all of them
    /// races for the single `used = false -> true` transition.
    #[tracing::instrument(skip_all, fields(client_id = ?client_id))]
    pub async fn consume(
        &self,
        code: &AuthCode,
        client_id: &ClientId,
        redirect_uri: &RedirectUri,
        verifier: Option<&pkce::Verifier>,
    ) -> Result<AuthorizationCode, Error> {
        let hash = self.crypto.hash(code.as_ref());
        let now = self.clock.now();

        let data = self
            .store
            .find_authorization_code(&hash)
            .await?
            .ok_or(GrantFailure::CodeNotFound)?;

        if data.used {
            event!(Level::WARN, code = hash.short(), "Authorization code replayed");
            return Err(GrantFailure::CodeUsed.into());
        }
        if now > data.expires_at {
            return Err(GrantFailure::CodeExpired.into());
        }
        if &data.client_id != client_id {
            event!(
                Level::WARN,
                issued_to = ?data.client_id,
                "Authorization code presented by another client"
            );
            return Err(GrantFailure::ClientMismatch.into());
        }
        if &data.redirect_uri != redirect_uri {
            return Err(GrantFailure::RedirectMismatch.into());
        }
        if let Some(challenge) = &data.pkce_challenge {
            pkce::verify(challenge, verifier).map_err(|e| match e {
                pkce::PkceFailure::MissingVerifier => GrantFailure::MissingVerifier,
                pkce::PkceFailure::Mismatch => GrantFailure::VerifierMismatch,
            })?;
        }

        if !self.store.mark_authorization_code_used(&hash, now).await? {
            event!(Level::WARN, code = hash.short(), "Lost race to consume authorization code");
            return Err(GrantFailure::CodeUsed.into());
        }

        event!(Level::DEBUG, code = hash.short(), "Consumed authorization code");
        Ok(AuthorizationCode {
            used: true,
            used_time: Some(now),
            ..data
        })
    }
}

impl Provider {
    /// Turns an already-approved authorization request into a code. The
    /// redirect URI must be well formed and registered, and the scope is
    /// trimmed to what the client may be granted.
    #[tracing::instrument(skip_all, fields(client_id = ?req.client_id))]
    pub async fn authorization_request(
        &self,
        req: AuthorizationRequest,
        subject: &Subject,
    ) -> Result<AuthenticationCodeResponse, Error> {
        url::Url::parse(&req.redirect_uri.0)
            .map_err(|_| Error::Validation("redirect_uri is not a valid URL".to_string()))?;

        self.clients
            .find_client(&req.client_id)
            .await?
            .ok_or(ClientFailure::Unknown)?;

        if !self
            .clients
            .check_redirect_uri(&req.client_id, &req.redirect_uri)
            .await?
        {
            event!(Level::WARN, redirect_uri = ?req.redirect_uri, "Unregistered redirect_uri");
            return Err(Error::Validation("redirect_uri is not registered".to_string()));
        }

        let scope = self.clients.allowed_scope(&req.client_id, &req.scope).await?;
        if scope != req.scope {
            event!(
                Level::DEBUG,
                requested = %req.scope.as_joined(),
                granted = %scope.as_joined(),
                "Trimmed requested scope"
            );
        }

        let state = req.state.clone();
        let req = AuthorizationRequest { scope, ..req };
        let code = self.create_authorization_code(&req, subject).await?;

        Ok(AuthenticationCodeResponse::new(code, state))
    }
}
