//! Read-only ports onto the client registry and the user directory, both owned
//! by other systems.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use async_trait::async_trait;

use crate::core::models::{Client, Subject};
use crate::core::types::{ClientId, HashedClientSecret, RedirectUri, Role, Scope, UserUuid};
use crate::db::StoreError;

#[async_trait]
pub trait ClientRegistry: Send + Sync + Debug {
    async fn find_client(&self, id: &ClientId) -> Result<Option<Client>, StoreError>;

    async fn check_redirect_uri(&self, id: &ClientId, uri: &RedirectUri) -> Result<bool, StoreError>;

    /// The subset of `requested` the client may be granted.
    async fn allowed_scope(&self, id: &ClientId, requested: &Scope) -> Result<Scope, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync + Debug {
    async fn find_user(&self, uuid: &UserUuid) -> Result<Option<Subject>, StoreError>;
}

#[derive(Debug, Clone)]
struct ClientEntry {
    client: Client,
    uris: HashSet<String>,
    scopes: Vec<String>,
}

/// Fixed client registry, for tests and single-tenant deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticClients {
    clients: HashMap<ClientId, ClientEntry>,
}

impl StaticClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(
        mut self,
        id: &str,
        name: &str,
        secret: HashedClientSecret,
        uris: &[&str],
        scope: &str,
    ) -> Self {
        let id = ClientId(id.to_string());
        let entry = ClientEntry {
            client: Client {
                id: id.clone(),
                name: name.to_string(),
                secret,
            },
            uris: uris.iter().map(ToString::to_string).collect(),
            scopes: Scope::from_delimited_parts(scope).as_parts(),
        };
        self.clients.insert(id, entry);
        self
    }
}

#[async_trait]
impl ClientRegistry for StaticClients {
    async fn find_client(&self, id: &ClientId) -> Result<Option<Client>, StoreError> {
        Ok(self.clients.get(id).map(|e| e.client.clone()))
    }

    async fn check_redirect_uri(&self, id: &ClientId, uri: &RedirectUri) -> Result<bool, StoreError> {
        Ok(self
            .clients
            .get(id)
            .map_or(false, |e| e.uris.contains(&uri.0)))
    }

    async fn allowed_scope(&self, id: &ClientId, requested: &Scope) -> Result<Scope, StoreError> {
        let allowed = match self.clients.get(id) {
            Some(e) => Scope::from_parts(e.scopes.clone()),
            None => Scope::default(),
        };
        Ok(requested.intersection(&allowed))
    }
}

/// Fixed user directory keyed by uuid.
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    users: HashMap<UserUuid, Subject>,
}

impl StaticUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, uuid: &str, id: i64, role: &str) -> Self {
        let subject = Subject {
            uuid: UserUuid(uuid.to_string()),
            id,
            role: Role(role.to_string()),
        };
        self.users.insert(subject.uuid.clone(), subject);
        self
    }
}

#[async_trait]
impl UserDirectory for StaticUsers {
    async fn find_user(&self, uuid: &UserUuid) -> Result<Option<Subject>, StoreError> {
        Ok(self.users.get(uuid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StaticClients {
        StaticClients::new().with_client(
            "mcp",
            "MCP client",
            HashedClientSecret("hash".to_string()),
            &["https://a/cb"],
            "read write",
        )
    }

    #[tokio::test]
    async fn redirect_uris_must_be_registered() {
        let clients = registry();
        let id = ClientId("mcp".to_string());
        assert!(clients
            .check_redirect_uri(&id, &RedirectUri("https://a/cb".to_string()))
            .await
            .unwrap());
        assert!(!clients
            .check_redirect_uri(&id, &RedirectUri("https://b/cb".to_string()))
            .await
            .unwrap());
        assert!(!clients
            .check_redirect_uri(&ClientId("other".to_string()), &RedirectUri("https://a/cb".to_string()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn scope_is_trimmed_to_allowed() {
        let clients = registry();
        let trimmed = clients
            .allowed_scope(&ClientId("mcp".to_string()), &Scope::from_delimited_parts("read admin"))
            .await
            .unwrap();
        assert_eq!(trimmed, Scope::from_delimited_parts("read"));
    }

    #[tokio::test]
    async fn users_resolve_by_uuid() {
        let users = StaticUsers::new().with_user("u-1", 7, "admin");
        let subject = users.find_user(&UserUuid("u-1".to_string())).await.unwrap().unwrap();
        assert_eq!(subject.id, 7);
        assert_eq!(subject.role, Role("admin".to_string()));
        assert!(users.find_user(&UserUuid("u-2".to_string())).await.unwrap().is_none());
    }
}
