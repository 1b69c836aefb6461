use crate::core::types::{ClientId, ClientSecret};

pub mod access_token;
pub mod authorization;
pub mod error;
pub mod introspection;
pub mod pkce;
pub mod revocation;

pub use access_token::*;
pub use authorization::*;
pub use error::{AccessTokenError, AccessTokenErrorKind, ErrorResponse};

#[derive(Debug)]
#[derive(serde::Deserialize)]
pub struct ClientCredentials {
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
}

impl ClientCredentials {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: ClientId(client_id.to_string()),
            client_secret: ClientSecret(client_secret.to_string()),
        }
    }
}
