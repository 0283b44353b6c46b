//! # Store Gateway
//!
//! The storage contract of the synchronizer and the batching logic shared by
//! every backend.
//!
//! A backend only has to know how to write *one* chunk inside an open
//! transaction (`BatchWriter`). `apply_in_batches` splits the tick's mutation
//! set into chunks of `BATCH_SIZE`, inserts first and deletes second, and
//! collects what the backend returns. Chunk boundaries mean nothing: the
//! backend commits once, after the whole loop succeeded, or not at all.

use async_trait::async_trait;
use thiserror::Error;

use super::model::{LocationIdentifier, ValidationError};

/// Maximum number of records written by a single statement.
pub const BATCH_SIZE: usize = 10_000;

/// Errors raised by a store backend. Any of them aborts the tick and leaves the
/// store at its pre-tick state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// # Persisted Row
///
/// One row of the `location_data` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRow {
    pub id: i32,
    pub lac: Option<i32>,
    pub cellid: Option<i32>,
    pub eci: Option<i32>,
    /// Free-text annotation maintained outside the synchronizer.
    pub note: Option<String>,
}

/// The insert shape of a row. The key is assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewRow {
    pub lac: Option<i32>,
    pub cellid: Option<i32>,
    pub eci: Option<i32>,
}

impl NewRow {
    /// Mirrors the table's `valid_combination_check` constraint.
    pub fn has_valid_combination(&self) -> bool {
        (self.lac.is_some() && self.eci.is_none())
            || (self.lac.is_none() && self.cellid.is_none() && self.eci.is_some())
    }
}

impl From<&LocationIdentifier> for NewRow {
    fn from(identifier: &LocationIdentifier) -> Self {
        // Validated values are below 0xFFFFFFF and always fit an INTEGER column.
        let column = |v: Option<u32>| v.map(|v| v as i32);
        Self {
            lac: column(identifier.lac()),
            cellid: column(identifier.cellid()),
            eci: column(identifier.eci()),
        }
    }
}

impl LocationIdentifier {
    /// The insert shape of this identifier. Any store key is dropped.
    pub fn to_new_row(&self) -> NewRow {
        NewRow::from(self)
    }
}

impl TryFrom<&PersistedRow> for LocationIdentifier {
    type Error = ValidationError;

    fn try_from(row: &PersistedRow) -> Result<Self, Self::Error> {
        let widen = |v: Option<i32>| v.map(i64::from);
        Ok(LocationIdentifier::new(widen(row.lac), widen(row.cellid), widen(row.eci))?
            .with_id(row.id))
    }
}

/// What a transactional apply wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedBatch {
    /// Inserted rows with their newly assigned keys.
    pub inserted: Vec<PersistedRow>,
    /// Removed rows as they were right before deletion.
    pub deleted: Vec<PersistedRow>,
}

/// # Store Gateway
///
/// The capability the synchronizer needs from storage.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Reads every persisted row.
    async fn read_all(&self) -> Result<Vec<PersistedRow>, PersistenceError>;

    /// Inserts `to_insert` and deletes the rows keyed by `to_delete` inside one
    /// transaction, in chunks of at most `BATCH_SIZE`.
    async fn apply_batch(
        &self,
        to_insert: Vec<NewRow>,
        to_delete: Vec<i32>,
    ) -> Result<AppliedBatch, PersistenceError>;
}

/// Writes single chunks inside a transaction owned by the caller.
#[async_trait]
pub trait BatchWriter: Send {
    async fn insert_chunk(&mut self, rows: &[NewRow]) -> Result<Vec<PersistedRow>, PersistenceError>;

    async fn delete_chunk(&mut self, ids: &[i32]) -> Result<Vec<PersistedRow>, PersistenceError>;
}

/// # Apply In Batches
///
/// Runs the insert loop, then the delete loop, through `writer`. The first
/// failing chunk aborts the whole apply; the caller must then drop (roll back)
/// its transaction instead of committing it.
pub async fn apply_in_batches<W>(
    writer: &mut W,
    to_insert: &[NewRow],
    to_delete: &[i32],
    batch_size: usize,
) -> Result<AppliedBatch, PersistenceError>
where
    W: BatchWriter + ?Sized,
{
    let batch_size = batch_size.max(1);
    let mut applied = AppliedBatch::default();

    for chunk in to_insert.chunks(batch_size) {
        let rows = writer.insert_chunk(chunk).await?;
        applied.inserted.extend(rows);
    }

    for chunk in to_delete.chunks(batch_size) {
        let rows = writer.delete_chunk(chunk).await?;
        applied.deleted.extend(rows);
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingWriter {
        next_id: i32,
        insert_sizes: Vec<usize>,
        delete_sizes: Vec<usize>,
        fail_delete_at: Option<usize>,
    }

    #[async_trait]
    impl BatchWriter for CountingWriter {
        async fn insert_chunk(&mut self, rows: &[NewRow]) -> Result<Vec<PersistedRow>, PersistenceError> {
            self.insert_sizes.push(rows.len());
            Ok(rows
                .iter()
                .map(|r| {
                    self.next_id += 1;
                    PersistedRow {
                        id: self.next_id,
                        lac: r.lac,
                        cellid: r.cellid,
                        eci: r.eci,
                        note: None,
                    }
                })
                .collect())
        }

        async fn delete_chunk(&mut self, ids: &[i32]) -> Result<Vec<PersistedRow>, PersistenceError> {
            self.delete_sizes.push(ids.len());
            if self.fail_delete_at == Some(self.delete_sizes.len()) {
                return Err(PersistenceError::Backend("chunk rejected".into()));
            }
            Ok(Vec::new())
        }
    }

    fn rows(n: usize) -> Vec<NewRow> {
        (0..n)
            .map(|i| NewRow {
                lac: Some((i % 65_000) as i32 + 1),
                cellid: None,
                eci: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn chunks_respect_the_batch_size() {
        let mut writer = CountingWriter::default();
        let ids: Vec<i32> = (1..=20_001).collect();

        let applied = apply_in_batches(&mut writer, &rows(25_000), &ids, BATCH_SIZE)
            .await
            .unwrap();

        assert_eq!(writer.insert_sizes, vec![10_000, 10_000, 5_000]);
        assert_eq!(writer.delete_sizes, vec![10_000, 10_000, 1]);
        assert_eq!(applied.inserted.len(), 25_000);
    }

    #[tokio::test]
    async fn failing_chunk_stops_the_loop() {
        let mut writer = CountingWriter {
            fail_delete_at: Some(2),
            ..Default::default()
        };
        let ids: Vec<i32> = (1..=30_000).collect();

        let result = apply_in_batches(&mut writer, &rows(1), &ids, BATCH_SIZE).await;

        assert!(matches!(result, Err(PersistenceError::Backend(_))));
        assert_eq!(writer.delete_sizes.len(), 2);
    }

    #[test]
    fn row_conversions_keep_values_and_key() {
        let identifier = LocationIdentifier::new(Some(12), Some(34), None).unwrap();
        let new_row = identifier.to_new_row();
        assert_eq!(
            new_row,
            NewRow {
                lac: Some(12),
                cellid: Some(34),
                eci: None
            }
        );
        assert!(new_row.has_valid_combination());

        let stored = PersistedRow {
            id: 8,
            lac: Some(12),
            cellid: Some(34),
            eci: None,
            note: Some("tower on the hill".into()),
        };
        assert_eq!(LocationIdentifier::try_from(&stored).unwrap(), identifier.with_id(8));
    }

    #[test]
    fn invalid_stored_row_does_not_convert() {
        let stored = PersistedRow {
            id: 1,
            lac: Some(0),
            cellid: None,
            eci: None,
            note: None,
        };
        assert!(LocationIdentifier::try_from(&stored).is_err());
    }
}
