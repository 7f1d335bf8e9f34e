//! Table provisioning contract.
//!
//! Binaries issue `CREATE TABLE IF NOT EXISTS` for every table family at
//! boot; request paths never run DDL. The one exception is the per-cluster
//! retry table, which is lazily created by the enqueue path because it must
//! exist on whichever cluster is failing its index writes.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};
use tracing::info;

use crate::domain::DataError;

use super::diesel_helpers::map_pool_error;
use super::router::{DbCluster, ShardRouter};

/// DDL for the retry queue; `target_table` names the index table the
/// delayed write belongs to.
const RETRY_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS user_list_index_retry (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    list_id BIGINT NOT NULL,
    role VARCHAR(32) NOT NULL,
    target_table VARCHAR(64) NOT NULL,
    err_msg TEXT,
    retries INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS user_list_index_retry_user_idx
    ON user_list_index_retry (user_id);
CREATE INDEX IF NOT EXISTS user_list_index_retry_list_idx
    ON user_list_index_retry (list_id);";

pub(crate) fn user_table_ddl(index: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS users_{index:04} (
    user_id BIGINT PRIMARY KEY,
    email VARCHAR(255) NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    verification_code VARCHAR(10) NOT NULL DEFAULT '',
    is_verified BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);"
    )
}

pub(crate) fn user_list_index_ddl(index: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS user_list_index_{index:04} (
    user_id BIGINT NOT NULL,
    list_id BIGINT NOT NULL,
    role VARCHAR(50) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (user_id, list_id)
);
CREATE INDEX IF NOT EXISTS user_list_index_{index:04}_list_idx
    ON user_list_index_{index:04} (list_id);"
    )
}

pub(crate) fn user_email_index_ddl(index: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS user_email_index_{index:04} (
    email VARCHAR(255) PRIMARY KEY,
    user_id BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);"
    )
}

pub(crate) fn list_table_ddl(index: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS todo_lists_tab_{index:04} (
    list_id BIGINT PRIMARY KEY,
    owner_id BIGINT NOT NULL,
    title VARCHAR(255) NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS todo_lists_tab_{index:04}_owner_idx
    ON todo_lists_tab_{index:04} (owner_id);"
    )
}

pub(crate) fn item_table_ddl(index: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS todo_items_tab_{index:04} (
    item_id BIGINT PRIMARY KEY,
    list_id BIGINT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    status VARCHAR(32) NOT NULL DEFAULT 'not_started',
    priority VARCHAR(32) NOT NULL DEFAULT 'medium',
    due_date TIMESTAMPTZ,
    tags TEXT NOT NULL DEFAULT '',
    is_done BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS todo_items_tab_{index:04}_list_idx
    ON todo_items_tab_{index:04} (list_id);"
    )
}

pub(crate) fn collaborator_table_ddl(index: u32) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS list_collaborators_tab_{index:04} (
    list_id BIGINT NOT NULL,
    user_id BIGINT NOT NULL,
    role VARCHAR(50) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (list_id, user_id)
);"
    )
}

/// Create the retry queue table if absent.
pub async fn ensure_retry_table(conn: &mut AsyncPgConnection) -> Result<(), DataError> {
    conn.batch_execute(RETRY_TABLE_DDL)
        .await
        .map_err(|err| DataError::transient(err.to_string()))
}

/// Provision every user-family table on one cluster.
pub async fn ensure_user_tables(cluster: &DbCluster, tables_per_db: u32) -> Result<(), DataError> {
    let mut ddl = String::new();
    for index in 0..tables_per_db {
        ddl.push_str(&user_table_ddl(index));
        ddl.push('\n');
        ddl.push_str(&user_list_index_ddl(index));
        ddl.push('\n');
        ddl.push_str(&user_email_index_ddl(index));
        ddl.push('\n');
    }
    ddl.push_str(RETRY_TABLE_DDL);

    let mut conn = cluster.pool().get().await.map_err(map_pool_error)?;
    conn.batch_execute(&ddl)
        .await
        .map_err(|err| DataError::transient(err.to_string()))?;
    info!(cluster = cluster.id(), tables_per_db, "user tables ensured");
    Ok(())
}

/// Provision every todo-family table on one cluster.
pub async fn ensure_todo_tables(cluster: &DbCluster, tables_per_db: u32) -> Result<(), DataError> {
    let mut ddl = String::new();
    for index in 0..tables_per_db {
        ddl.push_str(&list_table_ddl(index));
        ddl.push('\n');
        ddl.push_str(&item_table_ddl(index));
        ddl.push('\n');
        ddl.push_str(&collaborator_table_ddl(index));
        ddl.push('\n');
    }

    let mut conn = cluster.pool().get().await.map_err(map_pool_error)?;
    conn.batch_execute(&ddl)
        .await
        .map_err(|err| DataError::transient(err.to_string()))?;
    info!(cluster = cluster.id(), tables_per_db, "todo tables ensured");
    Ok(())
}

/// Provision the whole registered fleet.
pub async fn ensure_fleet(router: &ShardRouter, tables_per_db: u32) -> Result<(), DataError> {
    for cluster in router.user_clusters() {
        ensure_user_tables(&cluster, tables_per_db).await?;
    }
    for cluster in router.todo_clusters() {
        ensure_todo_tables(&cluster, tables_per_db).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn table_suffixes_are_zero_padded() {
        assert!(user_table_ddl(7).contains("users_0007"));
        assert!(user_list_index_ddl(0).contains("user_list_index_0000"));
        assert!(user_email_index_ddl(63).contains("user_email_index_0063"));
        assert!(list_table_ddl(42).contains("todo_lists_tab_0042"));
        assert!(item_table_ddl(42).contains("todo_items_tab_0042"));
        assert!(collaborator_table_ddl(42).contains("list_collaborators_tab_0042"));
    }

    #[rstest]
    fn ddl_is_idempotent_by_construction() {
        for ddl in [
            user_table_ddl(0),
            user_list_index_ddl(0),
            user_email_index_ddl(0),
            list_table_ddl(0),
            item_table_ddl(0),
            collaborator_table_ddl(0),
            RETRY_TABLE_DDL.to_owned(),
        ] {
            assert!(ddl.contains("IF NOT EXISTS"), "non-idempotent ddl: {ddl}");
        }
    }

    #[rstest]
    fn index_tables_key_on_the_pair() {
        assert!(user_list_index_ddl(0).contains("PRIMARY KEY (user_id, list_id)"));
        assert!(collaborator_table_ddl(0).contains("PRIMARY KEY (list_id, user_id)"));
    }
}
