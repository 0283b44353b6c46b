//! # In-Memory Store
//!
//! A `StoreGateway` kept in process memory. Transactions are emulated by
//! applying a tick's chunks to a staged copy of the table and swapping it in
//! only once every chunk succeeded. Faults can be injected per read, per insert
//! chunk or per delete chunk, which makes it the backend of choice for
//! exercising the synchronizer without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::store::{
    apply_in_batches, AppliedBatch, BatchWriter, NewRow, PersistedRow, PersistenceError,
    StoreGateway, BATCH_SIZE,
};

/// Faults to inject. Chunk numbers are 1-based and counted per apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreFaults {
    pub fail_reads: bool,
    pub fail_insert_chunk: Option<usize>,
    pub fail_delete_chunk: Option<usize>,
}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<i32, PersistedRow>,
    next_id: i32,
}

/// # Memory Location Store
#[derive(Debug)]
pub struct MemoryLocationStore {
    table: Mutex<Table>,
    faults: std::sync::Mutex<StoreFaults>,
    batch_size: usize,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            faults: std::sync::Mutex::new(StoreFaults::default()),
            batch_size: BATCH_SIZE,
        }
    }

    /// Builds a store pre-populated with `rows`, keys assigned from 1.
    pub fn with_rows(rows: impl IntoIterator<Item = NewRow>) -> Self {
        let mut table = Table::default();
        for row in rows {
            table.next_id += 1;
            table.rows.insert(
                table.next_id,
                PersistedRow {
                    id: table.next_id,
                    lac: row.lac,
                    cellid: row.cellid,
                    eci: row.eci,
                    note: None,
                },
            );
        }
        Self {
            table: Mutex::new(table),
            ..Self::new()
        }
    }

    /// Overrides the chunk size used by `apply_batch`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Replaces the injected faults.
    pub fn set_faults(&self, faults: StoreFaults) {
        *self.faults.lock().unwrap_or_else(|e| e.into_inner()) = faults;
    }

    /// The committed rows, ordered by key.
    pub async fn rows(&self) -> Vec<PersistedRow> {
        self.table.lock().await.rows.values().cloned().collect()
    }

    fn faults(&self) -> StoreFaults {
        *self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryLocationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreGateway for MemoryLocationStore {
    async fn read_all(&self) -> Result<Vec<PersistedRow>, PersistenceError> {
        if self.faults().fail_reads {
            return Err(PersistenceError::Backend("injected read failure".into()));
        }
        Ok(self.rows().await)
    }

    async fn apply_batch(
        &self,
        to_insert: Vec<NewRow>,
        to_delete: Vec<i32>,
    ) -> Result<AppliedBatch, PersistenceError> {
        let mut table = self.table.lock().await;
        let mut writer = StagedWriter {
            staged: table.clone(),
            faults: self.faults(),
            insert_chunks: 0,
            delete_chunks: 0,
        };

        let applied = apply_in_batches(&mut writer, &to_insert, &to_delete, self.batch_size).await?;

        // Commit.
        *table = writer.staged;
        Ok(applied)
    }
}

struct StagedWriter {
    staged: Table,
    faults: StoreFaults,
    insert_chunks: usize,
    delete_chunks: usize,
}

#[async_trait]
impl BatchWriter for StagedWriter {
    async fn insert_chunk(&mut self, rows: &[NewRow]) -> Result<Vec<PersistedRow>, PersistenceError> {
        self.insert_chunks += 1;
        if self.faults.fail_insert_chunk == Some(self.insert_chunks) {
            return Err(PersistenceError::Backend(format!(
                "injected failure on insert chunk {}",
                self.insert_chunks
            )));
        }

        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.has_valid_combination() {
                return Err(PersistenceError::Backend(format!(
                    "row {row:?} violates valid_combination_check"
                )));
            }
            self.staged.next_id += 1;
            let persisted = PersistedRow {
                id: self.staged.next_id,
                lac: row.lac,
                cellid: row.cellid,
                eci: row.eci,
                note: None,
            };
            self.staged.rows.insert(persisted.id, persisted.clone());
            inserted.push(persisted);
        }
        Ok(inserted)
    }

    async fn delete_chunk(&mut self, ids: &[i32]) -> Result<Vec<PersistedRow>, PersistenceError> {
        self.delete_chunks += 1;
        if self.faults.fail_delete_chunk == Some(self.delete_chunks) {
            return Err(PersistenceError::Backend(format!(
                "injected failure on delete chunk {}",
                self.delete_chunks
            )));
        }

        Ok(ids
            .iter()
            .filter_map(|id| self.staged.rows.remove(id))
            .collect())
    }
}
