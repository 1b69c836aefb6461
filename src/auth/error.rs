#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse<K> {
    #[serde(rename = "error")]
    pub kind: K,
    #[serde(rename = "error_description")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "error_uri")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl<K> ErrorResponse<K> {
    pub fn new(kind: K) -> Self {
        Self {
            kind,
            description: None,
            uri: None,
        }
    }

    pub fn with_description(kind: K, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: Some(description.into()),
            uri: None,
        }
    }
}

/// Token-endpoint error vocabulary. The serialized strings are a compatibility contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenErrorKind {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    ServerError,
}

impl AccessTokenErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for AccessTokenErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type AccessTokenError = ErrorResponse<AccessTokenErrorKind>;

impl From<AccessTokenErrorKind> for AccessTokenError {
    fn from(kind: AccessTokenErrorKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_verbatim() {
        for (kind, expected) in [
            (AccessTokenErrorKind::InvalidGrant, "invalid_grant"),
            (AccessTokenErrorKind::InvalidClient, "invalid_client"),
            (AccessTokenErrorKind::InvalidRequest, "invalid_request"),
            (AccessTokenErrorKind::UnsupportedGrantType, "unsupported_grant_type"),
        ] {
            let json = serde_json::to_value(AccessTokenError::from(kind)).unwrap();
            assert_eq!(json["error"], expected);
            assert_eq!(kind.as_str(), expected);
        }
    }

    #[test]
    fn description_is_omitted_when_absent() {
        let json =
            serde_json::to_string(&AccessTokenError::from(AccessTokenErrorKind::InvalidGrant))
                .unwrap();
        assert_eq!(json, r#"{"error":"invalid_grant"}"#);
    }
}
