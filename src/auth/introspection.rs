use crate::core::types::{ClientId, Role, Scope};

use super::TokenType;

#[derive(Debug)]
#[derive(serde::Deserialize)]
pub struct IntrospectionRequest {
    pub token: String,
}

#[derive(Debug)]
#[derive(serde::Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
    #[serde(flatten)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<IntrospectionClaims>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self {
            active: false,
            token_type: None,
            claims: None,
        }
    }
}

#[derive(Debug)]
#[derive(serde::Serialize)]
pub struct IntrospectionClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    pub sub: String,
    pub jti: String,
}
