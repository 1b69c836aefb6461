use crate::auth::{
    introspection::{IntrospectionClaims, IntrospectionRequest, IntrospectionResponse},
    AccessTokenError, ClientCredentials,
};

use super::{token::TokenService, Provider};

use tracing::{event, Level};

impl Provider {
    /// A client may only see its own tokens; anything else reads as inactive.
    #[tracing::instrument(skip_all, fields(client_id = ?credentials.client_id))]
    pub async fn introspection_request(
        &self,
        credentials: ClientCredentials,
        request: IntrospectionRequest,
    ) -> Result<IntrospectionResponse, AccessTokenError> {
        let client = self
            .check_client_authentication(&credentials)
            .await
            .map_err(|e| e.to_response())?;

        match self
            .validate_access_token(&request.token, Some(&client.id))
            .await
        {
            Some(claims) => {
                event!(Level::DEBUG, sub = %claims.sub, "Valid token");
                Ok(IntrospectionResponse {
                    active: true,
                    token_type: Some(TokenService::token_type()),
                    claims: Some(IntrospectionClaims {
                        scope: claims.scope,
                        client_id: claims.client_id,
                        role: claims.role,
                        exp: claims.exp,
                        iat: claims.iat,
                        sub: claims.sub.0,
                        jti: claims.token_id.0,
                    }),
                })
            }
            None => {
                event!(Level::DEBUG, "Inactive token");
                Ok(IntrospectionResponse::inactive())
            }
        }
    }
}
