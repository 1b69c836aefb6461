use std::fmt::Debug;

use crate::core::models::{AuthorizationCode, Client, RefreshTokenRecord, SweepStats};
use crate::core::types::{ClientId, Namespace, RedirectUri, Scope, TokenHash, UserUuid};
use crate::directory::ClientRegistry;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tokio::task::block_in_place;
use tracing::{event, Level};

use super::{models, retention_cutoff, schema, DurableStore, RefreshTouch, StoreError};

diesel_migrations::embed_migrations!("migrations");

pub struct DbStore {
    pool: Pool<ConnectionManager<PgConnection>>,
}

impl DbStore {
    pub fn acquire(uri: &str) -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(10)
            .build(ConnectionManager::new(uri))?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, StoreError> {
        Ok(self.pool.get()?)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        embedded_migrations::run_with_output(&self.conn()?, &mut std::io::stderr())?;
        event!(Level::INFO, "Ran migrations");
        Ok(())
    }
}

impl Debug for DbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbStore").finish()
    }
}

fn conflict_on_duplicate(e: DieselError) -> StoreError {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => StoreError::Conflict,
        e => e.into(),
    }
}

#[async_trait]
impl DurableStore for DbStore {
    async fn insert_authorization_code(&self, code: AuthorizationCode) -> Result<(), StoreError> {
        use schema::authorization_codes::dsl::authorization_codes;

        let model = models::AuthorizationCode::from(code);

        block_in_place(|| {
            diesel::insert_into(authorization_codes)
                .values(model)
                .execute(&self.conn()?)
                .map_err(conflict_on_duplicate)
        })?;

        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code_hash: &TokenHash,
    ) -> Result<Option<AuthorizationCode>, StoreError> {
        use schema::authorization_codes::dsl::authorization_codes;

        let found = block_in_place(|| -> Result<_, StoreError> {
            Ok(authorization_codes
                .find(&code_hash.0)
                .first::<models::AuthorizationCode>(&self.conn()?)
                .optional()?)
        })?;

        Ok(found.map(Into::into))
    }

    async fn mark_authorization_code_used(
        &self,
        code_hash: &TokenHash,
        now: i64,
    ) -> Result<bool, StoreError> {
        use schema::authorization_codes::dsl::{self, authorization_codes};

        // The `used = false` guard makes this a compare-and-set: of any number
        // of concurrent callers exactly one sees an affected row.
        let affected = block_in_place(|| -> Result<usize, StoreError> {
            Ok(diesel::update(
                authorization_codes
                    .find(&code_hash.0)
                    .filter(dsl::used.eq(false)),
            )
            .set((dsl::used.eq(true), dsl::used_time.eq(Some(now))))
            .execute(&self.conn()?)?)
        })?;

        Ok(affected == 1)
    }

    async fn insert_refresh_token(&self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        use schema::refresh_tokens::dsl::refresh_tokens;

        let model = models::RefreshToken::from(record);

        block_in_place(|| {
            diesel::insert_into(refresh_tokens)
                .values(model)
                .execute(&self.conn()?)
                .map_err(conflict_on_duplicate)
        })?;

        Ok(())
    }

    async fn touch_active_refresh_token(
        &self,
        token_hash: &TokenHash,
        namespace: &Namespace,
        now: i64,
    ) -> Result<RefreshTouch, StoreError> {
        use schema::refresh_tokens::dsl::{self, refresh_tokens};

        block_in_place(|| -> Result<_, StoreError> {
            let conn = self.conn()?;
            let active = refresh_tokens
                .filter(dsl::token_hash.eq(&token_hash.0))
                .filter(dsl::is_revoked.eq(false))
                .filter(dsl::expires_at.gt(now));

            let row = if namespace.is_first_party() {
                diesel::update(active.filter(dsl::client_id.is_null()))
                    .set(dsl::last_used_at.eq(now))
                    .get_result::<models::RefreshToken>(&conn)
                    .optional()?
            } else {
                diesel::update(active.filter(dsl::client_id.eq(namespace.as_str())))
                    .set(dsl::last_used_at.eq(now))
                    .get_result::<models::RefreshToken>(&conn)
                    .optional()?
            };

            if let Some(row) = row {
                return Ok(RefreshTouch::Active(row.into()));
            }

            // Same connection, so the miss is explained without another checkout.
            let skipped: Option<RefreshTokenRecord> = refresh_tokens
                .filter(dsl::token_hash.eq(&token_hash.0))
                .first::<models::RefreshToken>(&conn)
                .optional()?
                .map(Into::into);
            Ok(RefreshTouch::skipped(skipped.as_ref(), namespace, now))
        })
    }

    async fn find_refresh_token(
        &self,
        token_hash: &TokenHash,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        use schema::refresh_tokens::dsl::{self, refresh_tokens};

        let found = block_in_place(|| -> Result<_, StoreError> {
            Ok(refresh_tokens
                .filter(dsl::token_hash.eq(&token_hash.0))
                .first::<models::RefreshToken>(&self.conn()?)
                .optional()?)
        })?;

        Ok(found.map(Into::into))
    }

    async fn list_active_refresh_tokens(
        &self,
        user: &UserUuid,
        namespace: &Namespace,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        use schema::refresh_tokens::dsl::{self, refresh_tokens};

        let rows = block_in_place(|| -> Result<_, StoreError> {
            let mut query = refresh_tokens
                .filter(dsl::user_uuid.eq(&user.0))
                .filter(dsl::is_revoked.eq(false))
                .filter(dsl::expires_at.gt(now))
                .order((dsl::last_used_at.asc(), dsl::created_at.asc()))
                .into_boxed();

            query = if namespace.is_first_party() {
                query.filter(dsl::client_id.is_null())
            } else {
                query.filter(dsl::client_id.eq(namespace.as_str()))
            };

            Ok(query.load::<models::RefreshToken>(&self.conn()?)?)
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &TokenHash,
        reason: &str,
        now: i64,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        use schema::refresh_tokens::dsl::{self, refresh_tokens};

        let revoked = block_in_place(|| -> Result<_, StoreError> {
            Ok(diesel::update(
                refresh_tokens
                    .filter(dsl::token_hash.eq(&token_hash.0))
                    .filter(dsl::is_revoked.eq(false)),
            )
            .set((
                dsl::is_revoked.eq(true),
                dsl::revoked_at.eq(Some(now)),
                dsl::revoke_reason.eq(Some(reason)),
            ))
            .get_result::<models::RefreshToken>(&self.conn()?)
            .optional()?)
        })?;

        Ok(revoked.map(Into::into))
    }

    async fn revoke_all_for_user(
        &self,
        user: &UserUuid,
        reason: &str,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        use schema::refresh_tokens::dsl::{self, refresh_tokens};

        let revoked = block_in_place(|| -> Result<_, StoreError> {
            Ok(diesel::update(
                refresh_tokens
                    .filter(dsl::user_uuid.eq(&user.0))
                    .filter(dsl::is_revoked.eq(false))
                    .filter(dsl::expires_at.gt(now)),
            )
            .set((
                dsl::is_revoked.eq(true),
                dsl::revoked_at.eq(Some(now)),
                dsl::revoke_reason.eq(Some(reason)),
            ))
            .get_results::<models::RefreshToken>(&self.conn()?)?)
        })?;

        Ok(revoked.into_iter().map(Into::into).collect())
    }

    async fn sweep(&self, now: i64, retention_secs: u64) -> Result<SweepStats, StoreError> {
        use schema::authorization_codes::dsl::{self as codes_dsl, authorization_codes};
        use schema::refresh_tokens::dsl::{self as tokens_dsl, refresh_tokens};

        let cutoff = retention_cutoff(now, retention_secs);

        // Separate statements, none of which locks more than the rows it filters.
        let codes_terminated = block_in_place(|| -> Result<usize, StoreError> {
            Ok(diesel::update(
                authorization_codes
                    .filter(codes_dsl::used.eq(false))
                    .filter(codes_dsl::expires_at.lt(now)),
            )
            .set((codes_dsl::used.eq(true), codes_dsl::used_time.eq(Some(now))))
            .execute(&self.conn()?)?)
        })?;

        let codes_deleted = block_in_place(|| -> Result<usize, StoreError> {
            Ok(
                diesel::delete(authorization_codes.filter(codes_dsl::expires_at.lt(cutoff)))
                    .execute(&self.conn()?)?,
            )
        })?;

        let refresh_tokens_deleted = block_in_place(|| -> Result<usize, StoreError> {
            Ok(diesel::delete(
                refresh_tokens.filter(
                    tokens_dsl::is_revoked
                        .eq(true)
                        .and(tokens_dsl::revoked_at.lt(cutoff))
                        .or(tokens_dsl::expires_at.lt(cutoff)),
                ),
            )
            .execute(&self.conn()?)?)
        })?;

        Ok(SweepStats {
            codes_terminated,
            codes_deleted,
            refresh_tokens_deleted,
        })
    }
}

#[async_trait]
impl ClientRegistry for DbStore {
    async fn find_client(&self, id: &ClientId) -> Result<Option<Client>, StoreError> {
        use schema::clients::dsl::clients;

        let found = block_in_place(|| -> Result<_, StoreError> {
            Ok(clients
                .find(&id.0)
                .first::<models::Client>(&self.conn()?)
                .optional()?)
        })?;

        Ok(found.map(Into::into))
    }

    async fn check_redirect_uri(&self, id: &ClientId, uri: &RedirectUri) -> Result<bool, StoreError> {
        use schema::uris::dsl::uris;

        let found = block_in_place(|| -> Result<_, StoreError> {
            Ok(uris
                .find((&id.0, &uri.0))
                .first::<models::Uri>(&self.conn()?)
                .optional()?)
        })?;

        Ok(found.is_some())
    }

    async fn allowed_scope(&self, id: &ClientId, requested: &Scope) -> Result<Scope, StoreError> {
        use schema::client_scopes::dsl::{self, client_scopes};

        let requested_scopes = requested.as_parts();

        let allowed_scopes = block_in_place(|| -> Result<_, StoreError> {
            Ok(client_scopes
                .filter(dsl::client_id.eq(&id.0))
                .filter(dsl::scope.eq_any(requested_scopes))
                .select(dsl::scope)
                .get_results::<String>(&self.conn()?)?)
        })?;

        Ok(Scope::from_parts(allowed_scopes))
    }
}
