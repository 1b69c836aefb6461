use crate::auth::TokenType;
use crate::core::models::{OAuthContext, Subject};
use crate::core::types::TokenId;
use crate::provider::{
    claims::{AccessClaims, ACCESS_TOKEN_TYPE},
    Error,
};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::{event, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("token is malformed or its signature is invalid")]
    Signature,
    #[error("token expired")]
    Expired,
    #[error("token is not an access token")]
    WrongType,
}

/// Mints and verifies HS512 access tokens.
pub struct TokenService {
    secret: EncodingKey,
    public: DecodingKey<'static>,
    access_ttl_secs: u64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenService {{ ... }}")
    }
}

impl TokenService {
    pub fn new(signing_key: &[u8], access_ttl_secs: u64) -> Self {
        Self {
            secret: EncodingKey::from_secret(signing_key),
            public: DecodingKey::from_secret(signing_key).into_static(),
            access_ttl_secs,
        }
    }

    pub fn token_type() -> TokenType {
        TokenType::Bearer
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    #[tracing::instrument(skip_all, fields(user = %subject.uuid, client_id = ?context.map(|c| &c.client_id)))]
    pub fn new_access_token(
        &self,
        subject: &Subject,
        token_id: &TokenId,
        context: Option<&OAuthContext>,
        now: i64,
    ) -> Result<(String, AccessClaims), Error> {
        let claims = AccessClaims {
            sub: subject.uuid.clone(),
            role: subject.role.clone(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            token_id: token_id.clone(),
            client_id: context.map(|c| c.client_id.clone()),
            scope: context.map(|c| c.scope.clone()),
            iat: now,
            exp: now.saturating_add(self.access_ttl_secs as i64),
        };

        event!(Level::DEBUG, "Issuing access_token");
        let token = self.make_token(&claims)?;
        Ok((token, claims))
    }

    fn make_token(&self, claims: &AccessClaims) -> Result<String, Error> {
        let header = Header::new(Algorithm::HS512);
        Ok(jsonwebtoken::encode(&header, claims, &self.secret)?)
    }

    /// Signature, type and expiry against `now`. Expiry is checked here rather
    /// than by the JWT library so that it follows the injected clock.
    pub fn validate_token(&self, token: &str, now: i64) -> Result<AccessClaims, TokenRejection> {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_exp = false;

        let claims = jsonwebtoken::decode::<AccessClaims>(token, &self.public, &validation)
            .map(|td| td.claims)
            .map_err(|_| TokenRejection::Signature)?;

        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(TokenRejection::WrongType);
        }
        if now >= claims.exp {
            return Err(TokenRejection::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ClientId, Role, Scope, UserUuid};

    fn subject() -> Subject {
        Subject {
            uuid: UserUuid("u-1".to_string()),
            id: 1,
            role: Role("member".to_string()),
        }
    }

    fn service() -> TokenService {
        TokenService::new(&[9u8; 64], 900)
    }

    #[test]
    fn header_names_hs512() {
        let (token, _) = service()
            .new_access_token(&subject(), &TokenId::new(), None, 1_000)
            .unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::HS512);
    }

    #[test]
    fn payload_uses_wire_names() {
        let context = OAuthContext::new(ClientId("mcp".to_string()), Scope::from_delimited_parts("read"));
        let (_, claims) = service()
            .new_access_token(&subject(), &TokenId("t-1".to_string()), Some(&context), 1_000)
            .unwrap();
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["sub"], "u-1");
        assert_eq!(json["type"], "access");
        assert_eq!(json["tokenId"], "t-1");
        assert_eq!(json["client_id"], "mcp");
        assert_eq!(json["scope"], "read");
        assert_eq!(json["exp"], 1_900);
    }

    #[test]
    fn first_party_tokens_omit_oauth_claims() {
        let (_, claims) = service()
            .new_access_token(&subject(), &TokenId::new(), None, 1_000)
            .unwrap();
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("client_id").is_none());
        assert!(json.get("scope").is_none());
    }

    #[test]
    fn expiry_follows_supplied_clock() {
        let service = service();
        let (token, _) = service
            .new_access_token(&subject(), &TokenId::new(), None, 1_000)
            .unwrap();

        assert!(service.validate_token(&token, 1_899).is_ok());
        assert_eq!(service.validate_token(&token, 1_900), Err(TokenRejection::Expired));
        assert_eq!(service.validate_token(&token, 1_901), Err(TokenRejection::Expired));
    }

    #[test]
    fn other_key_is_rejected() {
        let (token, _) = service()
            .new_access_token(&subject(), &TokenId::new(), None, 1_000)
            .unwrap();
        let other = TokenService::new(&[1u8; 64], 900);
        assert_eq!(other.validate_token(&token, 1_001), Err(TokenRejection::Signature));
        assert_eq!(other.validate_token("not.a.jwt", 1_001), Err(TokenRejection::Signature));
    }
}
