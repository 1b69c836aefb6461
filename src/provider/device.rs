use crate::core::models::{RevokeReason, TokenRef};
use crate::core::types::{Namespace, UserUuid};

use super::{error::Error, revocation::RevocationCoordinator, Components};

use tracing::{event, Level};

/// Caps the number of live first-party sessions per user.
#[derive(Debug, Clone)]
pub struct DeviceLimiter {
    parts: Components,
    revocation: RevocationCoordinator,
    max_devices: usize,
}

impl DeviceLimiter {
    pub fn new(parts: Components, revocation: RevocationCoordinator, max_devices: usize) -> Self {
        Self {
            parts,
            revocation,
            max_devices,
        }
    }

    pub fn max_devices(&self) -> usize {
        self.max_devices
    }

    /// Evicts least recently used sessions until one slot is free. Returns
    /// how many were evicted; a failure on one token is logged and skipped.
    #[tracing::instrument(skip_all, fields(user = %user))]
    pub async fn make_room(&self, user: &UserUuid) -> Result<usize, Error> {
        let now = self.parts.clock.now();
        let active = self
            .parts
            .store
            .list_active_refresh_tokens(user, &Namespace::first_party(), now)
            .await?;

        if active.len() < self.max_devices {
            return Ok(0);
        }

        let excess = active.len() + 1 - self.max_devices;
        let mut evicted = 0;

        for record in active.iter().take(excess) {
            let token = TokenRef::Hash(record.token_hash.clone());
            match self.revocation.revoke_one(&token, &RevokeReason::DeviceLimit).await {
                Ok(_) => evicted += 1,
                Err(e) => {
                    event!(
                        Level::WARN,
                        token_hash = record.token_hash.short(),
                        error = %e,
                        "Failed to evict stale session"
                    );
                }
            }
        }

        event!(Level::DEBUG, evicted, limit = self.max_devices, "Made room for new session");
        Ok(evicted)
    }
}
