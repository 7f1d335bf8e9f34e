//! Durable catch-up for failed user-list index writes.
//!
//! Each user cluster carries a local `user_list_index_retry` queue; the
//! worker drains a bounded batch per pass, oldest rows first. Application
//! is at-least-once: the target tables' `(user_id, list_id)` primary key
//! makes replays idempotent, so a unique-key violation counts as success.
//! Rows that exhaust the retry budget stay in place for inspection.

use std::sync::Arc;

use diesel::sql_types::{BigInt, Integer, Text};
use diesel::QueryableByName;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::{info, warn};

use crate::domain::DataError;

use super::bootstrap::ensure_retry_table;
use super::diesel_helpers::{clamp_error_message, map_diesel_error, map_pool_error};
use super::router::ShardRouter;

#[derive(Debug, QueryableByName)]
struct RetryRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    user_id: i64,
    #[diesel(sql_type = BigInt)]
    list_id: i64,
    #[diesel(sql_type = Text)]
    role: String,
    #[diesel(sql_type = Text)]
    target_table: String,
    #[diesel(sql_type = Integer)]
    retries: i32,
}

/// Outcome counters for one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPassStats {
    pub applied: usize,
    pub failed: usize,
}

impl RetryPassStats {
    fn merge(&mut self, other: Self) {
        self.applied += other.applied;
        self.failed += other.failed;
    }
}

/// Batch worker draining the per-cluster retry queues.
pub struct IndexRetryWorker {
    router: Arc<ShardRouter>,
    max_retries: i32,
    batch_size: i64,
}

impl IndexRetryWorker {
    pub fn new(router: Arc<ShardRouter>, max_retries: u32, batch_size: u32) -> Self {
        Self {
            router,
            max_retries: max_retries as i32,
            batch_size: i64::from(batch_size),
        }
    }

    /// Drain one batch from every registered user cluster.
    pub async fn run_pass(&self) -> Result<RetryPassStats, DataError> {
        let mut stats = RetryPassStats::default();
        for cluster in self.router.user_clusters() {
            match self.drain_cluster(cluster.pool()).await {
                Ok(cluster_stats) => stats.merge(cluster_stats),
                Err(err) => {
                    // A dead cluster cannot drain its own queue; move on and
                    // let the next pass pick it up.
                    warn!(cluster = cluster.id(), error = %err, "retry pass skipped cluster");
                }
            }
        }
        if stats.applied > 0 || stats.failed > 0 {
            info!(
                applied = stats.applied,
                failed = stats.failed,
                "index retry pass finished"
            );
        }
        Ok(stats)
    }

    async fn drain_cluster(
        &self,
        pool: &super::pool::DbPool,
    ) -> Result<RetryPassStats, DataError> {
        let mut conn = pool.get().await.map_err(map_pool_error)?;
        ensure_retry_table(&mut conn).await?;

        let batch: Vec<RetryRow> = diesel::sql_query(
            "SELECT id, user_id, list_id, role, target_table, retries \
             FROM user_list_index_retry WHERE retries < $1 ORDER BY id ASC LIMIT $2",
        )
        .bind::<Integer, _>(self.max_retries)
        .bind::<BigInt, _>(self.batch_size)
        .load(&mut conn)
        .await
        .map_err(|err| map_diesel_error(err, "retry batch select"))?;

        let mut stats = RetryPassStats::default();
        for row in batch {
            match apply_one(&mut conn, &row).await {
                Ok(()) => {
                    delete_row(&mut conn, row.id).await?;
                    stats.applied += 1;
                }
                // The index row already exists: an earlier attempt (or a
                // concurrent writer) converged first. Unique-key idempotence
                // makes this a success.
                Err(err) if err.is_conflict() => {
                    delete_row(&mut conn, row.id).await?;
                    stats.applied += 1;
                }
                Err(err) => {
                    warn!(
                        retry_id = row.id,
                        user_id = row.user_id,
                        list_id = row.list_id,
                        table = %row.target_table,
                        error = %err,
                        "delayed index insert failed"
                    );
                    record_failure(&mut conn, row.id, &err).await?;
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}

async fn apply_one(conn: &mut AsyncPgConnection, row: &RetryRow) -> Result<(), DataError> {
    // target_table was written by the router when the row was enqueued; it
    // is not caller input.
    diesel::sql_query(format!(
        "INSERT INTO {} (user_id, list_id, role) VALUES ($1, $2, $3)",
        row.target_table
    ))
    .bind::<BigInt, _>(row.user_id)
    .bind::<BigInt, _>(row.list_id)
    .bind::<Text, _>(&row.role)
    .execute(conn)
    .await
    .map_err(|err| map_diesel_error(err, "delayed index insert"))?;
    Ok(())
}

async fn delete_row(conn: &mut AsyncPgConnection, id: i64) -> Result<(), DataError> {
    diesel::sql_query("DELETE FROM user_list_index_retry WHERE id = $1")
        .bind::<BigInt, _>(id)
        .execute(conn)
        .await
        .map_err(|err| map_diesel_error(err, "retry row delete"))?;
    Ok(())
}

async fn record_failure(
    conn: &mut AsyncPgConnection,
    id: i64,
    cause: &DataError,
) -> Result<(), DataError> {
    let message = cause.to_string();
    diesel::sql_query(
        "UPDATE user_list_index_retry \
         SET retries = retries + 1, last_error = $1, updated_at = now() WHERE id = $2",
    )
    .bind::<Text, _>(clamp_error_message(&message))
    .bind::<BigInt, _>(id)
    .execute(conn)
    .await
    .map_err(|err| map_diesel_error(err, "retry row update"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn stats_merge_accumulates() {
        let mut stats = RetryPassStats {
            applied: 2,
            failed: 1,
        };
        stats.merge(RetryPassStats {
            applied: 3,
            failed: 0,
        });
        assert_eq!(
            stats,
            RetryPassStats {
                applied: 5,
                failed: 1,
            }
        );
    }

    #[rstest]
    fn worker_pass_over_an_empty_fleet_is_a_noop() {
        let router = Arc::new(ShardRouter::new(1024, 4096, 64));
        let worker = IndexRetryWorker::new(router, 5, 100);
        let stats = futures_util::future::FutureExt::now_or_never(worker.run_pass())
            .expect("no clusters, no awaits")
            .expect("empty pass succeeds");
        assert_eq!(stats, RetryPassStats::default());
    }
}
