use super::TokenTypeHint;

#[derive(Debug, serde::Deserialize)]
pub struct RevocationRequest {
    pub token: String,
    pub token_type_hint: Option<TokenTypeHint>,
}
