use crate::auth::pkce;
use crate::core::types::{AuthCode, RedirectUri, RefreshTokenValue, Scope};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum TokenType {
    Bearer,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "grant_type")]
pub enum TokenRequest {
    #[serde(rename = "authorization_code")]
    AuthenticationCode(AuthenticationCodeTokenRequest),
    #[serde(rename = "refresh_token")]
    RefreshToken(RefreshTokenRequest),
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, serde::Deserialize)]
pub struct AuthenticationCodeTokenRequest {
    pub redirect_uri: RedirectUri,
    pub code: AuthCode,
    #[serde(flatten)]
    pub pkce_verifier: Option<pkce::Verifier>,
}

#[derive(Debug, serde::Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: RefreshTokenValue,
    pub scope: Option<Scope>,
}

#[derive(Debug, serde::Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshTokenValue>,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}
