use crate::auth::pkce;
use crate::core::types::{AuthCode, ClientId, RedirectUri, Scope};

/// An authorization-code request whose user decision was already made upstream.
#[derive(Debug, Clone)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct AuthorizationRequest {
    pub client_id: ClientId,
    pub redirect_uri: RedirectUri,
    #[serde(default)]
    pub scope: Scope,
    pub state: Option<String>,
    #[serde(flatten)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkce_challenge: Option<pkce::Challenge>,
}

#[derive(Debug, Clone)]
#[derive(serde::Serialize)]
pub struct AuthenticationCodeResponse {
    pub code: AuthCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthenticationCodeResponse {
    pub fn new(code: AuthCode, state: Option<String>) -> Self {
        Self { code, state }
    }
}
