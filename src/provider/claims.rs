use crate::core::types::{ClientId, Role, Scope, TokenId, UserUuid};

pub const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AccessClaims {
    pub sub: UserUuid,
    pub role: Role,
    #[serde(rename = "type")]
    pub token_type: String,
    #[serde(rename = "tokenId")]
    pub token_id: TokenId,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub scope: Option<Scope>,
    pub iat: i64,
    pub exp: i64,
}
