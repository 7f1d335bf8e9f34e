//! Sharded user repository: routed CRUD plus the global email index.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Bool, Text, Timestamptz};
use diesel::{OptionalExtension, QueryableByName};
use diesel_async::RunQueryDsl;

use crate::domain::ports::UserStore;
use crate::domain::{DataError, IdGenerator, IdGeneratorError, NewUser, User};

use super::diesel_helpers::{map_diesel_error, map_pool_error, trace_statement};
use super::router::ShardRouter;

/// Worker/datacenter identity of the user store's ID generator.
const USER_ID_WORKER: i64 = 1;
const USER_ID_DATACENTER: i64 = 1;

#[derive(QueryableByName)]
struct UserRow {
    #[diesel(sql_type = BigInt)]
    user_id: i64,
    #[diesel(sql_type = Text)]
    email: String,
    #[diesel(sql_type = Text)]
    password_hash: String,
    #[diesel(sql_type = Text)]
    verification_code: String,
    #[diesel(sql_type = Bool)]
    is_verified: bool,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.user_id,
            email: row.email,
            password_hash: row.password_hash,
            verification_code: row.verification_code,
            is_verified: row.is_verified,
            created_at: row.created_at,
        }
    }
}

#[derive(QueryableByName)]
struct UserIdRow {
    #[diesel(sql_type = BigInt)]
    user_id: i64,
}

#[derive(QueryableByName)]
struct CreatedAtRow {
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
}

/// Router-backed implementation of the [`UserStore`] port.
pub struct ShardedUserStore {
    router: Arc<ShardRouter>,
    ids: IdGenerator,
}

impl ShardedUserStore {
    /// Build the store with its own ID generator instance.
    pub fn new(router: Arc<ShardRouter>) -> Result<Self, IdGeneratorError> {
        Ok(Self {
            router,
            ids: IdGenerator::new(USER_ID_WORKER, USER_ID_DATACENTER)?,
        })
    }
}

#[async_trait]
impl UserStore for ShardedUserStore {
    async fn create(&self, new_user: NewUser) -> Result<User, DataError> {
        let user_id = self.ids.next_id()?;

        let route = self.router.route_user(user_id)?;
        trace_statement("create_user", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let inserted: CreatedAtRow = diesel::sql_query(format!(
            "INSERT INTO {} (user_id, email, password_hash, verification_code, is_verified) \
             VALUES ($1, $2, $3, $4, $5) RETURNING created_at",
            route.table
        ))
        .bind::<BigInt, _>(user_id)
        .bind::<Text, _>(new_user.email())
        .bind::<Text, _>(new_user.password_hash())
        .bind::<Text, _>(new_user.verification_code())
        .bind::<Bool, _>(false)
        .get_result(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "user insert"))?;
        drop(conn);

        // The email index may live on a different cluster; the primary row
        // stays in place if this write fails, and a duplicate email
        // surfaces here as a conflict.
        let idx_route = self.router.route_email_index(new_user.email())?;
        trace_statement("create_email_index", &idx_route);
        let mut idx_conn = idx_route.pool.get().await.map_err(map_pool_error)?;
        diesel::sql_query(format!(
            "INSERT INTO {} (email, user_id) VALUES ($1, $2)",
            idx_route.table
        ))
        .bind::<Text, _>(new_user.email())
        .bind::<BigInt, _>(user_id)
        .execute(&mut idx_conn)
        .await
        .map_err(|err| map_diesel_error(err, "email index insert"))?;

        Ok(User {
            id: user_id,
            email: new_user.email().to_owned(),
            password_hash: new_user.password_hash().to_owned(),
            verification_code: new_user.verification_code().to_owned(),
            is_verified: false,
            created_at: inserted.created_at,
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DataError> {
        let idx_route = self.router.route_email_index(email)?;
        trace_statement("email_index_lookup", &idx_route);
        let mut conn = idx_route.pool.get().await.map_err(map_pool_error)?;
        let hit: Option<UserIdRow> = diesel::sql_query(format!(
            "SELECT user_id FROM {} WHERE email = $1",
            idx_route.table
        ))
        .bind::<Text, _>(email)
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(|err| map_diesel_error(err, "email index lookup"))?;
        drop(conn);

        match hit {
            Some(row) => self.find_by_id(row.user_id).await,
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, DataError> {
        let route = self.router.route_user(id)?;
        trace_statement("find_user", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        let row: Option<UserRow> = diesel::sql_query(format!(
            "SELECT user_id, email, password_hash, verification_code, is_verified, created_at \
             FROM {} WHERE user_id = $1",
            route.table
        ))
        .bind::<BigInt, _>(id)
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(|err| map_diesel_error(err, "user fetch"))?;

        Ok(row.map(User::from))
    }

    async fn set_verified(&self, email: &str, verified: bool) -> Result<(), DataError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| DataError::not_found(format!("no user for email {email}")))?;

        let route = self.router.route_user(user.id)?;
        trace_statement("update_verification", &route);
        let mut conn = route.pool.get().await.map_err(map_pool_error)?;
        diesel::sql_query(format!(
            "UPDATE {} SET is_verified = $1, updated_at = now() WHERE user_id = $2",
            route.table
        ))
        .bind::<Bool, _>(verified)
        .bind::<BigInt, _>(user.id)
        .execute(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "verification update"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::persistence::pool::{DbPool, PoolConfig};
    use crate::outbound::persistence::router::DbCluster;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn store_builds_with_a_bounded_generator() {
        let router = Arc::new(ShardRouter::new(1024, 4096, 64));
        router.register_user_cluster(
            0,
            DbCluster::new(
                "todo_user_db_0",
                DbPool::connect_lazy(PoolConfig::new("postgres://localhost:1/unused")),
            ),
        );
        let store = ShardedUserStore::new(router).expect("generator ids in range");
        let id = store.ids.next_id().expect("mint succeeds");
        assert!(id > 0);
    }
}
