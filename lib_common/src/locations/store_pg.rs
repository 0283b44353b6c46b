//! # PostgreSQL Store
//!
//! `StoreGateway` backed by the `location_data` table, using a `deadpool_postgres`
//! pool for connections and `tokio-postgres` for queries.
//!
//! ## Statement Design:
//! - **Snapshot**: `query_raw` streams rows off the wire one at a time instead of
//!   buffering a driver-side result set first.
//! - **Insert**: each chunk is a single `INSERT ... SELECT FROM UNNEST(...)` with
//!   three array parameters, so the parameter count stays at three whatever the
//!   chunk size. `RETURNING` hands back the assigned keys.
//! - **Delete**: each chunk is `DELETE ... WHERE id = ANY($1) RETURNING ...`.
//! - **Atomicity**: all chunks run on one `tokio_postgres::Transaction`. It is
//!   committed after the last chunk; on any error (or if the future is dropped)
//!   the transaction is dropped and the server rolls it back.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use futures_util::{pin_mut, TryStreamExt};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Row, Transaction};
use tracing::{debug, info};

use super::store::{
    apply_in_batches, AppliedBatch, BatchWriter, NewRow, PersistedRow, PersistenceError,
    StoreGateway, BATCH_SIZE,
};

/// Idempotent bootstrap of the `location_data` table.
pub const LOCATION_DATA_DDL: &str = "
CREATE TABLE IF NOT EXISTS location_data (
    id     SERIAL PRIMARY KEY,
    lac    INTEGER NULL,
    cellid INTEGER NULL,
    eci    INTEGER NULL,
    note   VARCHAR(200) NULL,
    CONSTRAINT valid_combination_check CHECK (
        (lac IS NOT NULL AND eci IS NULL) OR
        (lac IS NULL AND cellid IS NULL AND eci IS NOT NULL)
    )
)";

const SELECT_ALL: &str = "SELECT id, lac, cellid, eci, note FROM location_data";

const INSERT_CHUNK: &str = "
INSERT INTO location_data (lac, cellid, eci)
SELECT * FROM UNNEST($1::INTEGER[], $2::INTEGER[], $3::INTEGER[])
RETURNING id, lac, cellid, eci, note";

const DELETE_CHUNK: &str = "
DELETE FROM location_data
WHERE id = ANY($1)
RETURNING id, lac, cellid, eci, note";

/// # PostgreSQL Location Store
#[derive(Clone)]
pub struct PgLocationStore {
    pool: Pool,
}

impl PgLocationStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the `location_data` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        let client = self.pool.get().await?;
        client.batch_execute(LOCATION_DATA_DDL).await?;
        info!("Table 'location_data' is ready.");
        Ok(())
    }
}

#[async_trait]
impl StoreGateway for PgLocationStore {
    async fn read_all(&self) -> Result<Vec<PersistedRow>, PersistenceError> {
        let client = self.pool.get().await?;

        let no_params: [&(dyn ToSql + Sync); 0] = [];
        let stream = client.query_raw(SELECT_ALL, no_params).await?;
        pin_mut!(stream);

        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await? {
            rows.push(row_to_persisted(&row)?);
        }
        debug!("Read {} rows from location_data", rows.len());
        Ok(rows)
    }

    async fn apply_batch(
        &self,
        to_insert: Vec<NewRow>,
        to_delete: Vec<i32>,
    ) -> Result<AppliedBatch, PersistenceError> {
        let mut object = self.pool.get().await?;
        let client: &mut tokio_postgres::Client = &mut object;
        let transaction = client.transaction().await?;

        let applied = {
            let mut writer = PgBatchWriter { tx: &transaction };
            apply_in_batches(&mut writer, &to_insert, &to_delete, BATCH_SIZE).await?
        };

        transaction.commit().await?;
        debug!(
            "Committed {} inserts and {} deletes",
            applied.inserted.len(),
            applied.deleted.len()
        );
        Ok(applied)
    }
}

struct PgBatchWriter<'a, 't> {
    tx: &'a Transaction<'t>,
}

#[async_trait]
impl<'a, 't> BatchWriter for PgBatchWriter<'a, 't> {
    async fn insert_chunk(&mut self, rows: &[NewRow]) -> Result<Vec<PersistedRow>, PersistenceError> {
        let lacs: Vec<Option<i32>> = rows.iter().map(|r| r.lac).collect();
        let cellids: Vec<Option<i32>> = rows.iter().map(|r| r.cellid).collect();
        let ecis: Vec<Option<i32>> = rows.iter().map(|r| r.eci).collect();

        let returned = self.tx.query(INSERT_CHUNK, &[&lacs, &cellids, &ecis]).await?;
        returned.iter().map(row_to_persisted).collect()
    }

    async fn delete_chunk(&mut self, ids: &[i32]) -> Result<Vec<PersistedRow>, PersistenceError> {
        let ids: Vec<i32> = ids.to_vec();
        let returned = self.tx.query(DELETE_CHUNK, &[&ids]).await?;
        returned.iter().map(row_to_persisted).collect()
    }
}

fn row_to_persisted(row: &Row) -> Result<PersistedRow, PersistenceError> {
    Ok(PersistedRow {
        id: row.try_get("id")?,
        lac: row.try_get("lac")?,
        cellid: row.try_get("cellid")?,
        eci: row.try_get("eci")?,
        note: row.try_get("note")?,
    })
}
