use crate::auth::pkce;
use crate::core::models as domain;
use crate::core::types::{
    ClientId, DeviceId, HashedClientSecret, RedirectUri, Scope, TokenHash, UserUuid,
};

use super::schema::*;

#[derive(Debug)]
#[derive(Queryable, Insertable)]
#[table_name = "uris"]
pub struct Uri {
    pub client_id: String,
    pub uri: String,
}

#[derive(Debug)]
#[derive(Queryable, Insertable)]
#[table_name = "clients"]
pub struct Client {
    pub client_id: String,
    pub secret_hash: String,
    pub name: String,
}

#[derive(Debug)]
#[derive(Queryable, Insertable)]
#[table_name = "authorization_codes"]
pub struct AuthorizationCode {
    pub code_hash: String,
    pub client_id: String,
    pub user_uuid: String,
    pub user_id: i64,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub used: bool,
    pub used_time: Option<i64>,
}

#[derive(Debug)]
#[derive(Queryable, Insertable)]
#[table_name = "refresh_tokens"]
pub struct RefreshToken {
    pub id: String,
    pub token_hash: String,
    pub encrypted_token: String,
    pub user_uuid: String,
    pub user_id: i64,
    pub client_id: Option<String>,
    pub scope: Option<String>,
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_used_at: i64,
    pub is_revoked: bool,
    pub revoked_at: Option<i64>,
    pub revoke_reason: Option<String>,
}

impl From<Client> for domain::Client {
    fn from(c: Client) -> Self {
        Self {
            id: ClientId(c.client_id),
            name: c.name,
            secret: HashedClientSecret(c.secret_hash),
        }
    }
}

impl From<domain::AuthorizationCode> for AuthorizationCode {
    fn from(c: domain::AuthorizationCode) -> Self {
        let (code_challenge, code_challenge_method) = match c.pkce_challenge {
            Some(challenge) => (Some(challenge.code), Some(challenge.method.as_str().to_string())),
            None => (None, None),
        };

        Self {
            code_hash: c.code_hash.0,
            client_id: c.client_id.0,
            user_uuid: c.user_uuid.0,
            user_id: c.user_id,
            redirect_uri: c.redirect_uri.0,
            scope: c.scope.as_joined(),
            state: c.state,
            code_challenge,
            code_challenge_method,
            created_at: c.created_at,
            expires_at: c.expires_at,
            used: c.used,
            used_time: c.used_time,
        }
    }
}

impl From<AuthorizationCode> for domain::AuthorizationCode {
    fn from(c: AuthorizationCode) -> Self {
        let method = c
            .code_challenge_method
            .as_deref()
            .and_then(pkce::Transformation::parse)
            .unwrap_or_default();
        let pkce_challenge = c.code_challenge.map(|code| pkce::Challenge { code, method });

        Self {
            code_hash: TokenHash(c.code_hash),
            client_id: ClientId(c.client_id),
            user_uuid: UserUuid(c.user_uuid),
            user_id: c.user_id,
            redirect_uri: RedirectUri(c.redirect_uri),
            scope: Scope::from_delimited_parts(&c.scope),
            state: c.state,
            pkce_challenge,
            created_at: c.created_at,
            expires_at: c.expires_at,
            used: c.used,
            used_time: c.used_time,
        }
    }
}

impl From<domain::RefreshTokenRecord> for RefreshToken {
    fn from(r: domain::RefreshTokenRecord) -> Self {
        Self {
            id: r.id,
            token_hash: r.token_hash.0,
            encrypted_token: r.encrypted_token,
            user_uuid: r.user_uuid.0,
            user_id: r.user_id,
            client_id: r.client_id.map(|c| c.0),
            scope: r.scope.map(|s| s.as_joined()),
            device_id: r.device_id.map(|d| d.0),
            ip_address: r.ip_address,
            user_agent: r.user_agent,
            created_at: r.created_at,
            expires_at: r.expires_at,
            last_used_at: r.last_used_at,
            is_revoked: r.is_revoked,
            revoked_at: r.revoked_at,
            revoke_reason: r.revoke_reason,
        }
    }
}

impl From<RefreshToken> for domain::RefreshTokenRecord {
    fn from(r: RefreshToken) -> Self {
        Self {
            id: r.id,
            token_hash: TokenHash(r.token_hash),
            encrypted_token: r.encrypted_token,
            user_uuid: UserUuid(r.user_uuid),
            user_id: r.user_id,
            client_id: r.client_id.map(ClientId),
            scope: r.scope.map(|s| Scope::from_delimited_parts(&s)),
            device_id: r.device_id.map(DeviceId),
            ip_address: r.ip_address,
            user_agent: r.user_agent,
            created_at: r.created_at,
            expires_at: r.expires_at,
            last_used_at: r.last_used_at,
            is_revoked: r.is_revoked,
            revoked_at: r.revoked_at,
            revoke_reason: r.revoke_reason,
        }
    }
}
