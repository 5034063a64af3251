//! The store abstraction and its PostgreSQL-backed implementation.
//!
//! [`PodStore`] is the narrow interface the [`crate::Splitter`] depends on.
//! It is the system's sole synchronization medium: every mutating method
//! must be a single atomically-applied operation, since `actualize_pod` is
//! the protocol's only compare-and-set primitive.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::dto::PodRecord;
use crate::error::StoreError;

#[async_trait]
pub trait PodStore: Send + Sync {
    /// Count of records in `group` with `now - updated_at <= max_age`.
    async fn get_active_pod_count(&self, group: &str, max_age: Duration) -> Result<i64, StoreError>;

    /// The record in `group` with minimal `num` among those whose age
    /// exceeds `max_age`. `Err(StoreError::NoEntries)` when none exist.
    async fn get_first_unused_pod(
        &self,
        group: &str,
        max_age: Duration,
    ) -> Result<PodRecord, StoreError>;

    /// Insert a record with the given `num`. Must fail with
    /// `StoreError::NoEntries` if `(group, num)` already exists as active.
    async fn add_pod(&self, num: i32, group: &str) -> Result<PodRecord, StoreError>;

    /// Atomic CAS-refresh. Two modes:
    ///  - `old_id == 0`: refresh record `new_id` if it exists.
    ///  - `old_id != 0`: transfer `new_id` to the caller previously holding
    ///    `old_id`, provided `new_id` is currently unused (age > `max_age`)
    ///    or already belongs to `old_id`'s owner. `Err(StoreError::NoEntries)`
    ///    when the precondition is violated (lost the race).
    async fn actualize_pod(
        &self,
        new_id: i64,
        old_id: i64,
        max_age: Duration,
    ) -> Result<PodRecord, StoreError>;
}

/// A [`PodStore`] backed by a single `pod_records` table in PostgreSQL.
///
/// Each method is a single parameterized statement, so the existence and
/// ownership checks happen under the same row-level lock as the refresh:
/// no explicit transaction or application-level lock is needed.
pub struct PgPodStore {
    pool: PgPool,
}

impl PgPodStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|error| StoreError::Storage(error.to_string()))?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    fn pool_for_test(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PodStore for PgPodStore {
    async fn get_active_pod_count(&self, group: &str, max_age: Duration) -> Result<i64, StoreError> {
        let max_age = pg_interval(max_age);

        let (count,): (i64,) = sqlx::query_as(
            r#"
SELECT count(*)
FROM pod_records
WHERE group_name = $1
  AND now() - updated_at <= $2::interval
            "#,
        )
        .bind(group)
        .bind(&max_age)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(count)
    }

    async fn get_first_unused_pod(
        &self,
        group: &str,
        max_age: Duration,
    ) -> Result<PodRecord, StoreError> {
        let max_age = pg_interval(max_age);

        let record: Option<PodRecord> = sqlx::query_as(
            r#"
SELECT id, num, group_name, created_at, updated_at
FROM pod_records
WHERE group_name = $1
  AND now() - updated_at > $2::interval
ORDER BY num ASC
LIMIT 1
            "#,
        )
        .bind(group)
        .bind(&max_age)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        record.ok_or(StoreError::NoEntries)
    }

    async fn add_pod(&self, num: i32, group: &str) -> Result<PodRecord, StoreError> {
        // ON CONFLICT DO NOTHING makes the uniqueness check and the insert
        // one atomic statement, closing the race a check-then-insert
        // (WHERE NOT EXISTS) pattern would leave open under concurrent
        // callers both creating the same (group, num) at once.
        let record: Option<PodRecord> = sqlx::query_as(
            r#"
INSERT INTO pod_records (num, group_name)
VALUES ($1, $2)
ON CONFLICT (group_name, num) DO NOTHING
RETURNING id, num, group_name, created_at, updated_at
            "#,
        )
        .bind(num)
        .bind(group)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        record.ok_or(StoreError::NoEntries)
    }

    async fn actualize_pod(
        &self,
        new_id: i64,
        old_id: i64,
        max_age: Duration,
    ) -> Result<PodRecord, StoreError> {
        let max_age = pg_interval(max_age);

        let record: Option<PodRecord> = if old_id == 0 {
            sqlx::query_as(
                r#"
UPDATE pod_records
SET updated_at = now()
WHERE id = $1
RETURNING id, num, group_name, created_at, updated_at
                "#,
            )
            .bind(new_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?
        } else {
            sqlx::query_as(
                r#"
UPDATE pod_records
SET updated_at = now()
WHERE id = $1
  AND (now() - updated_at > $2::interval OR id = $3)
RETURNING id, num, group_name, created_at, updated_at
                "#,
            )
            .bind(new_id)
            .bind(&max_age)
            .bind(old_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?
        };

        record.ok_or(StoreError::NoEntries)
    }
}

/// Format a `Duration` as a Postgres interval literal, e.g. `"30.500 seconds"`.
fn pg_interval(duration: Duration) -> String {
    format!("{} seconds", duration.as_secs_f64())
}
