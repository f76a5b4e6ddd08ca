//! One batch, one transaction.
//!
//! A batch either lands completely or not at all. Dropping an open
//! transaction (failure, timeout, cancellation) rolls it back when the
//! connection returns to the pool.

use super::catalog::TableRef;
use super::coerce::Value;
use super::error::WriteError;
use super::pg_config::PgConfig;
use super::statement::{
    MergeStatement, copy_statement, create_staging_statement, drop_staging_statement,
    encode_copy_row, identity_resync_statement, insert_from_staging_statement, quote_ident,
};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// COPY payload is flushed to the server in chunks of about this size.
const COPY_CHUNK_BYTES: usize = 1 << 20;

/// A coerced row in destination column order.
pub type TypedRow = Vec<Value>;

/// Anything that can durably apply one batch of rows as a unit.
pub trait BatchWriter: Send + Sync + 'static {
    /// Apply `rows` atomically and return the affected row count.
    fn write(&self, rows: Vec<TypedRow>) -> impl Future<Output = Result<u64, WriteError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteMode {
    /// COPY straight into the destination.
    InsertOnly,
    /// Staging table followed by a key-matched merge.
    Upsert,
}

/// SQL for every batch of one import, rendered once.
#[derive(Debug, Clone)]
pub struct WritePlan {
    table: TableRef,
    columns: Vec<String>,
    key_columns: Vec<String>,
    identity_columns: Vec<String>,
    staging: String,
    direct_copy: String,
    create_staging: String,
    copy_staging: String,
    apply_staging: String,
    drop_staging: String,
}

impl WritePlan {
    /// `identity_columns` lists the mapped identity columns whose explicit
    /// values must be forced in; leave it empty to let the server assign them.
    pub fn new(
        table: TableRef,
        columns: Vec<String>,
        key_columns: Vec<String>,
        identity_columns: Vec<String>,
    ) -> Self {
        let staging = format!("bulk_loader_stage_{}", Uuid::new_v4().simple());
        let overriding = !identity_columns.is_empty();

        let direct_copy = copy_statement(&table.quoted(), &columns);
        let create_staging = create_staging_statement(&staging, &table, &columns);
        let copy_staging = copy_statement(&quote_ident(&staging), &columns);
        let apply_staging = if key_columns.is_empty() {
            insert_from_staging_statement(&table, &staging, &columns, overriding)
        } else {
            MergeStatement {
                target: &table,
                source: &staging,
                columns: &columns,
                key_columns: &key_columns,
                overriding_system_value: overriding,
            }
            .render()
        };
        let drop_staging = drop_staging_statement(&staging);

        Self {
            table,
            columns,
            key_columns,
            identity_columns,
            staging,
            direct_copy,
            create_staging,
            copy_staging,
            apply_staging,
            drop_staging,
        }
    }

    pub fn mode(&self) -> WriteMode {
        if self.key_columns.is_empty() {
            WriteMode::InsertOnly
        } else {
            WriteMode::Upsert
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn overrides_identity(&self) -> bool {
        !self.identity_columns.is_empty()
    }

    fn uses_staging(&self) -> bool {
        self.mode() == WriteMode::Upsert || self.overrides_identity()
    }
}

/// Writes batches into PostgreSQL through COPY.
#[derive(Clone)]
pub struct PgBatchWriter {
    pool: PgPool,
    plan: Arc<WritePlan>,
    timeout: Duration,
    synchronous_commit: bool,
}

impl PgBatchWriter {
    pub fn new(pool: PgPool, plan: WritePlan, timeout: Duration) -> Self {
        Self {
            pool,
            plan: Arc::new(plan),
            timeout,
            synchronous_commit: true,
        }
    }

    pub fn with_synchronous_commit(mut self, enabled: bool) -> Self {
        self.synchronous_commit = enabled;
        self
    }

    pub fn plan(&self) -> &WritePlan {
        &self.plan
    }

    async fn write_batch(&self, rows: &[TypedRow]) -> Result<u64, WriteError> {
        let plan = &self.plan;
        let mut tx = self.pool.begin().await?;

        PgConfig::apply_batch_settings(&mut tx, self.timeout, self.synchronous_commit).await?;

        let written = if plan.uses_staging() {
            sqlx::query(&plan.create_staging).execute(&mut *tx).await?;
            let staged = copy_rows(&mut tx, &plan.copy_staging, rows).await?;
            let applied = sqlx::query(&plan.apply_staging)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            sqlx::query(&plan.drop_staging).execute(&mut *tx).await?;
            log::trace!(
                "staged {} rows in {}, applied {}",
                staged,
                plan.staging,
                applied
            );
            applied
        } else {
            copy_rows(&mut tx, &plan.direct_copy, rows).await?
        };

        tx.commit().await?;
        Ok(written)
    }
}

impl BatchWriter for PgBatchWriter {
    async fn write(&self, rows: Vec<TypedRow>) -> Result<u64, WriteError> {
        match tokio::time::timeout(self.timeout, self.write_batch(&rows)).await {
            Ok(result) => result,
            Err(_) => Err(WriteError::Timeout(self.timeout)),
        }
    }
}

/// Move each identity sequence past the largest stored value.
///
/// Runs once after every batch has finished: a batch transaction cannot see
/// rows of sibling batches that have not committed yet, so resyncing from
/// inside one could move a sequence backwards.
pub async fn resync_identity_sequences(
    pool: &PgPool,
    table: &TableRef,
    columns: &[String],
) -> Result<(), sqlx::Error> {
    for column in columns {
        sqlx::query(&identity_resync_statement(table, column))
            .bind(table.quoted())
            .bind(column)
            .execute(pool)
            .await?;
        log::debug!("identity sequence of {}.{} resynchronised", table, column);
    }
    Ok(())
}

async fn copy_rows(
    conn: &mut PgConnection,
    statement: &str,
    rows: &[TypedRow],
) -> Result<u64, sqlx::Error> {
    let mut copy = conn.copy_in_raw(statement).await?;
    let mut buffer = String::with_capacity(COPY_CHUNK_BYTES);

    for row in rows {
        encode_copy_row(row, &mut buffer);
        if buffer.len() >= COPY_CHUNK_BYTES {
            let sent = copy.send(buffer.as_bytes()).await.map(|_| ());
            if let Err(err) = sent {
                let _ = copy.abort(err.to_string()).await;
                return Err(err);
            }
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        let sent = copy.send(buffer.as_bytes()).await.map(|_| ());
        if let Err(err) = sent {
            let _ = copy.abort(err.to_string()).await;
            return Err(err);
        }
    }

    copy.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn plan_without_keys_copies_directly() {
        let plan = WritePlan::new(
            TableRef::new("public", "events"),
            names(&["id", "payload"]),
            Vec::new(),
            Vec::new(),
        );

        assert_eq!(plan.mode(), WriteMode::InsertOnly);
        assert!(!plan.uses_staging());
        assert_eq!(
            plan.direct_copy,
            "COPY \"public\".\"events\" (\"id\", \"payload\") FROM STDIN"
        );
    }

    #[test]
    fn plan_with_keys_merges_from_unique_staging() {
        let first = WritePlan::new(
            TableRef::new("dbo", "shipping"),
            names(&["id", "name"]),
            names(&["id"]),
            Vec::new(),
        );
        let second = WritePlan::new(
            TableRef::new("dbo", "shipping"),
            names(&["id", "name"]),
            names(&["id"]),
            Vec::new(),
        );

        assert_eq!(first.mode(), WriteMode::Upsert);
        assert!(first.uses_staging());
        assert_ne!(first.staging, second.staging);
        assert!(first.apply_staging.starts_with("MERGE INTO \"dbo\".\"shipping\""));
        assert!(first.copy_staging.starts_with(&format!("COPY \"{}\"", first.staging)));
        assert!(!first.apply_staging.contains("OVERRIDING"));
    }

    #[test]
    fn identity_override_routes_inserts_through_staging() {
        let plan = WritePlan::new(
            TableRef::new("public", "orders"),
            names(&["id", "qty"]),
            Vec::new(),
            names(&["id"]),
        );

        assert_eq!(plan.mode(), WriteMode::InsertOnly);
        assert!(plan.overrides_identity());
        assert!(plan.uses_staging());
        assert!(plan.apply_staging.starts_with("INSERT INTO \"public\".\"orders\""));
        assert!(plan.apply_staging.contains("OVERRIDING SYSTEM VALUE"));
    }
}
