use crate::auth::{AccessTokenError, AccessTokenResponse, ClientCredentials, TokenRequest};
use crate::core::models::{DeviceInfo, OAuthContext};
use crate::provider::token::TokenService;

use super::{Error, GrantFailure, Provider};

use tracing::{event, Level};

impl Provider {
    #[tracing::instrument(skip_all, fields(client_id = ?credentials.client_id))]
    pub async fn access_token_request(
        &self,
        credentials: ClientCredentials,
        req: TokenRequest,
    ) -> Result<AccessTokenResponse, AccessTokenError> {
        event!(Level::TRACE, "Handling access token request");
        self.grant(credentials, req).await.map_err(|e| {
            event!(Level::INFO, error = %e, "Token request refused");
            e.to_response()
        })
    }

    async fn grant(
        &self,
        credentials: ClientCredentials,
        req: TokenRequest,
    ) -> Result<AccessTokenResponse, Error> {
        let client = self.check_client_authentication(&credentials).await?;

        use TokenRequest::*;

        match req {
            AuthenticationCode(req) => {
                event!(Level::TRACE, "Handling authorization_code grant");
                let code = self
                    .consume_authorization_code(
                        &req.code,
                        &client.id,
                        &req.redirect_uri,
                        req.pkce_verifier.as_ref(),
                    )
                    .await?;

                let subject = self
                    .users
                    .find_user(&code.user_uuid)
                    .await?
                    .ok_or(GrantFailure::UnknownUser)?;

                let context = OAuthContext::new(client.id, code.scope);
                let pair = self
                    .issue_pair(&subject, DeviceInfo::default(), Some(context))
                    .await?;

                Ok(AccessTokenResponse {
                    access_token: pair.access_token,
                    token_type: TokenService::token_type(),
                    refresh_token: Some(pair.refresh_token),
                    expires_in: pair.access_expires_in,
                    scope: pair.scope,
                })
            }
            RefreshToken(req) => {
                event!(Level::TRACE, "Handling refresh_token grant");
                let context = OAuthContext::new(client.id, req.scope.unwrap_or_default());
                let refreshed = self
                    .refresh(&req.refresh_token, Some(&context), None)
                    .await?;

                Ok(AccessTokenResponse {
                    access_token: refreshed.access_token,
                    token_type: TokenService::token_type(),
                    refresh_token: None,
                    expires_in: refreshed.access_expires_in,
                    scope: refreshed.scope,
                })
            }
            Unsupported => Err(Error::UnsupportedGrantType),
        }
    }
}
