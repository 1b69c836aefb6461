use crate::auth::pkce;

use super::types::*;

/// The authenticated user an operation acts for, as resolved by the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub uuid: UserUuid,
    pub id: i64,
    pub role: Role,
}

/// OAuth2 context of a token. First-party tokens carry none.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthContext {
    pub client_id: ClientId,
    pub scope: Scope,
}

impl OAuthContext {
    pub fn new(client_id: ClientId, scope: Scope) -> Self {
        Self { client_id, scope }
    }
}

/// Request metadata recorded alongside a refresh token.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub device_id: Option<DeviceId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl DeviceInfo {
    pub fn device(id: &str) -> Self {
        Self {
            device_id: Some(DeviceId(id.to_string())),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub secret: HashedClientSecret,
}

#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code_hash: TokenHash,
    pub client_id: ClientId,
    pub user_uuid: UserUuid,
    pub user_id: i64,
    pub redirect_uri: RedirectUri,
    pub scope: Scope,
    pub state: Option<String>,
    pub pkce_challenge: Option<pkce::Challenge>,
    pub created_at: i64,
    pub expires_at: i64,
    pub used: bool,
    pub used_time: Option<i64>,
}

impl Expire for AuthorizationCode {
    const EXPIRES_IN_SECS: u64 = 10 * 60;
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub token_hash: TokenHash,
    pub encrypted_token: String,
    pub user_uuid: UserUuid,
    pub user_id: i64,
    pub client_id: Option<ClientId>,
    pub scope: Option<Scope>,
    pub device_id: Option<DeviceId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_used_at: i64,
    pub is_revoked: bool,
    pub revoked_at: Option<i64>,
    pub revoke_reason: Option<String>,
}

impl RefreshTokenRecord {
    pub fn namespace(&self) -> Namespace {
        Namespace::of(self.client_id.as_ref())
    }

    pub fn is_active(&self, now: i64) -> bool {
        !self.is_revoked && self.expires_at > now
    }
}

/// Cache projection of an access token, keyed by the hash of its `tokenId`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenInfo {
    pub user_uuid: UserUuid,
    pub client_id: Option<ClientId>,
    pub scope: Option<Scope>,
    pub token_hash: TokenHash,
    /// Refresh token this access token was minted from.
    pub refresh_token_hash: Option<TokenHash>,
    pub role: Role,
    pub device_id: Option<DeviceId>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub last_accessed_at: i64,
    pub access_count: u64,
    pub is_valid: bool,
}

/// Cache projection of a refresh token record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedRefreshToken {
    pub record_id: String,
    pub token_hash: TokenHash,
    pub encrypted_token: String,
    pub user_uuid: UserUuid,
    pub user_id: i64,
    pub role: Role,
    pub client_id: Option<ClientId>,
    pub scope: Option<Scope>,
    pub device_id: Option<DeviceId>,
    pub expires_at: i64,
    pub last_accessed_at: i64,
    pub access_count: u64,
    pub is_valid: bool,
}

impl CachedRefreshToken {
    pub fn from_record(record: &RefreshTokenRecord, role: &Role) -> Self {
        Self {
            record_id: record.id.clone(),
            token_hash: record.token_hash.clone(),
            encrypted_token: record.encrypted_token.clone(),
            user_uuid: record.user_uuid.clone(),
            user_id: record.user_id,
            role: role.clone(),
            client_id: record.client_id.clone(),
            scope: record.scope.clone(),
            device_id: record.device_id.clone(),
            expires_at: record.expires_at,
            last_accessed_at: record.last_used_at,
            access_count: 0,
            is_valid: !record.is_revoked,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub token_id: TokenId,
    pub access_expires_in: u64,
    pub refresh_token: RefreshTokenValue,
    pub refresh_expires_in: u64,
    pub scope: Option<Scope>,
}

#[derive(Debug, Clone)]
pub struct RefreshedAccessToken {
    pub access_token: String,
    pub token_id: TokenId,
    pub access_expires_in: u64,
    pub scope: Option<Scope>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeReason {
    Logout,
    DeviceLimit,
    DeviceSignOut,
    ClientRequest,
    Administrative,
    Other(String),
}

impl RevokeReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Logout => "logout",
            Self::DeviceLimit => "device_limit",
            Self::DeviceSignOut => "device_sign_out",
            Self::ClientRequest => "client_request",
            Self::Administrative => "administrative",
            Self::Other(reason) => reason,
        }
    }
}

impl From<&str> for RevokeReason {
    fn from(s: &str) -> Self {
        match s {
            "logout" => Self::Logout,
            "device_limit" => Self::DeviceLimit,
            "device_sign_out" => Self::DeviceSignOut,
            "client_request" => Self::ClientRequest,
            "administrative" => Self::Administrative,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Either a raw refresh token or its already-computed hash.
#[derive(Debug, Clone)]
pub enum TokenRef {
    Raw(RefreshTokenValue),
    Hash(TokenHash),
}

/// Rows touched by one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub codes_terminated: usize,
    pub codes_deleted: usize,
    pub refresh_tokens_deleted: usize,
}
