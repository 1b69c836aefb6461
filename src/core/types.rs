use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Default, Eq)]
pub struct Scope(HashSet<String>);

impl Scope {
    pub fn from_parts(mut parts: Vec<String>) -> Self {
        let set = parts.drain(..).filter(|p| !p.is_empty()).collect();
        Self(set)
    }

    pub fn from_delimited_parts(parts: &str) -> Self {
        let parts = parts
            .split(' ')
            .filter(|p| !p.is_empty())
            .map(ToString::to_string)
            .collect();
        Self(parts)
    }

    /// Space-joined, sorted so the stored form is stable.
    pub fn as_joined(&self) -> String {
        let mut parts = self.0.iter().map(AsRef::as_ref).collect::<Vec<&str>>();
        parts.sort_unstable();
        parts.join(" ")
    }

    pub fn as_parts(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    pub fn contains_all(&self, other: &Scope) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn intersection(&self, other: &Scope) -> Scope {
        Self(self.0.intersection(&other.0).cloned().collect())
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parts = String::deserialize(deserializer)?;
        Ok(Self::from_delimited_parts(&parts))
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.as_joined())
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl FromStr for ClientId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct RedirectUri(pub String);

#[derive(serde::Deserialize)]
#[serde(transparent)]
pub struct ClientSecret(pub String);

impl AsRef<str> for ClientSecret {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientSecret(..)")
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HashedClientSecret(pub String);

impl From<String> for HashedClientSecret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for HashedClientSecret {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Raw authorization code as handed to the client. Only its keyed hash is persisted.
#[derive(Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct AuthCode(pub String);

impl AsRef<str> for AuthCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthCode(..)")
    }
}

/// Raw opaque refresh token. Only its keyed hash and ciphertext are persisted.
#[derive(Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct RefreshTokenValue(pub String);

impl AsRef<str> for RefreshTokenValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshTokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefreshTokenValue(..)")
    }
}

/// Keyed HMAC fingerprint of a secret value, the only form used as a lookup key.
#[derive(Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct TokenHash(pub String);

impl TokenHash {
    /// Short prefix suitable for log fields.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl AsRef<str> for TokenHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({}..)", self.short())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct UserUuid(pub String);

impl fmt::Display for UserUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct Role(pub String);

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for TokenId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Cache partition: the OAuth2 client id, or the reserved empty value for first-party tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn first_party() -> Self {
        Self(String::new())
    }

    pub fn of(client_id: Option<&ClientId>) -> Self {
        match client_id {
            Some(id) => Self(id.0.clone()),
            None => Self::first_party(),
        }
    }

    pub fn is_first_party(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait Expire {
    const EXPIRES_IN_SECS: u64;

    fn expiry(now: i64) -> i64 {
        now.saturating_add(Self::EXPIRES_IN_SECS as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parses_and_joins_sorted() {
        let scope = Scope::from_delimited_parts("write read  openid");
        assert_eq!(scope.as_joined(), "openid read write");
        assert_eq!(scope.as_parts().len(), 3);
    }

    #[test]
    fn scope_subset_checks() {
        let granted = Scope::from_delimited_parts("read write");
        assert!(granted.contains_all(&Scope::from_delimited_parts("read")));
        assert!(!granted.contains_all(&Scope::from_delimited_parts("read admin")));
        assert!(granted.contains_all(&Scope::default()));
    }

    #[test]
    fn scope_serde_is_space_delimited() {
        let scope: Scope = serde_json::from_str("\"a b\"").unwrap();
        assert_eq!(serde_json::to_string(&scope).unwrap(), "\"a b\"");
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let code = AuthCode("super-secret".to_string());
        let token = RefreshTokenValue("also-secret".to_string());
        assert_eq!(format!("{:?}", code), "AuthCode(..)");
        assert_eq!(format!("{:?}", token), "RefreshTokenValue(..)");
    }

    #[test]
    fn namespace_of_client() {
        assert!(Namespace::of(None).is_first_party());
        let ns = Namespace::of(Some(&ClientId("abc".to_string())));
        assert_eq!(ns.as_str(), "abc");
        assert!(!ns.is_first_party());
    }
}
