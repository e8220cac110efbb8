//! Durable tier backed by redb.
//!
//! Each session owns one redb database holding two append-oriented tables,
//! `dom_changes` and `resources`, both keyed by a monotonically increasing
//! `u64`. Values are postcard-encoded rows; the tables know nothing about the
//! row types.

use crate::error::{StoreResult, durable_err};
use redb::{Database, ReadableTable, TableDefinition, TableHandle};
use std::path::Path;
use std::sync::Arc;

/// Table holding DOM change records keyed by global id
pub const DOM_CHANGES: TableDefinition<'static, u64, &'static [u8]> =
    TableDefinition::new("dom_changes");

/// Table holding captured resources keyed by resource id
pub const RESOURCES: TableDefinition<'static, u64, &'static [u8]> =
    TableDefinition::new("resources");

/// Durable side of a [`crate::TieredTable`]
pub trait DurableTable: Send + Sync {
    /// Table name, for logs and errors
    fn name(&self) -> &str;

    /// Persist every row in a single atomic write
    ///
    /// # Errors
    ///
    /// Returns error if the write transaction fails
    fn write_batch(&self, rows: &[(u64, Vec<u8>)]) -> StoreResult<()>;

    /// Point read
    ///
    /// # Errors
    ///
    /// Returns error if the read transaction fails
    fn get(&self, id: u64) -> StoreResult<Option<Vec<u8>>>;

    /// All rows with id >= `start`, in id order
    ///
    /// # Errors
    ///
    /// Returns error if the read transaction fails
    fn range_from(&self, start: u64) -> StoreResult<Vec<(u64, Vec<u8>)>>;

    /// Largest persisted id
    ///
    /// # Errors
    ///
    /// Returns error if the read transaction fails
    fn last_id(&self) -> StoreResult<Option<u64>>;
}

/// A session database
#[derive(Clone)]
pub struct SessionDb {
    db: Arc<Database>,
}

impl SessionDb {
    /// Open (or create) a session database on disk
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or initialized
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path.as_ref()).map_err(durable_err)?;
        Self::from_database(db)
    }

    /// Create a database that lives only in memory
    ///
    /// # Errors
    ///
    /// Returns error if initialization fails
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(durable_err)?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> StoreResult<Self> {
        // Create both tables up front so read transactions never see a missing table.
        let txn = db.begin_write().map_err(durable_err)?;
        txn.open_table(DOM_CHANGES).map_err(durable_err)?;
        txn.open_table(RESOURCES).map_err(durable_err)?;
        txn.commit().map_err(durable_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Durable tier for DOM change records
    #[must_use]
    pub fn dom_changes(&self) -> Arc<dyn DurableTable> {
        Arc::new(RedbTable::new(Arc::clone(&self.db), DOM_CHANGES))
    }

    /// Durable tier for captured resources
    #[must_use]
    pub fn resources(&self) -> Arc<dyn DurableTable> {
        Arc::new(RedbTable::new(Arc::clone(&self.db), RESOURCES))
    }
}

/// One redb table
pub struct RedbTable {
    db: Arc<Database>,
    definition: TableDefinition<'static, u64, &'static [u8]>,
}

impl RedbTable {
    /// Wrap a table of an open database
    #[must_use]
    pub fn new(db: Arc<Database>, definition: TableDefinition<'static, u64, &'static [u8]>) -> Self {
        Self { db, definition }
    }
}

impl DurableTable for RedbTable {
    fn name(&self) -> &str {
        self.definition.name()
    }

    fn write_batch(&self, rows: &[(u64, Vec<u8>)]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(durable_err)?;
        {
            let mut table = txn.open_table(self.definition).map_err(durable_err)?;
            for (id, bytes) in rows {
                table.insert(*id, bytes.as_slice()).map_err(durable_err)?;
            }
        }
        txn.commit().map_err(durable_err)?;
        Ok(())
    }

    fn get(&self, id: u64) -> StoreResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(durable_err)?;
        let table = txn.open_table(self.definition).map_err(durable_err)?;
        let value = table.get(id).map_err(durable_err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn range_from(&self, start: u64) -> StoreResult<Vec<(u64, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(durable_err)?;
        let table = txn.open_table(self.definition).map_err(durable_err)?;
        let mut rows = Vec::new();
        for entry in table.range(start..).map_err(durable_err)? {
            let (key, value) = entry.map_err(durable_err)?;
            rows.push((key.value(), value.value().to_vec()));
        }
        Ok(rows)
    }

    fn last_id(&self) -> StoreResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(durable_err)?;
        let table = txn.open_table(self.definition).map_err(durable_err)?;
        let last = table.last().map_err(durable_err)?;
        Ok(last.map(|(key, _)| key.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_roundtrip() {
        let db = SessionDb::in_memory().unwrap();
        let table = db.dom_changes();
        assert_eq!(table.name(), "dom_changes");

        table
            .write_batch(&[(1, b"one".to_vec()), (2, b"two".to_vec())])
            .unwrap();
        assert_eq!(table.get(1).unwrap(), Some(b"one".to_vec()));
        assert_eq!(table.get(3).unwrap(), None);

        let rows = table.range_from(2).unwrap();
        assert_eq!(rows, vec![(2, b"two".to_vec())]);
        assert_eq!(table.last_id().unwrap(), Some(2));
        assert_eq!(db.resources().last_id().unwrap(), None);
    }

    #[test]
    fn test_tables_are_independent() {
        let db = SessionDb::in_memory().unwrap();
        db.dom_changes().write_batch(&[(1, b"dom".to_vec())]).unwrap();
        assert_eq!(db.resources().get(1).unwrap(), None);
    }

    #[test]
    fn test_on_disk_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");
        {
            let db = SessionDb::open(&path).unwrap();
            db.resources().write_batch(&[(7, b"row".to_vec())]).unwrap();
        }
        let db = SessionDb::open(&path).unwrap();
        assert_eq!(db.resources().get(7).unwrap(), Some(b"row".to_vec()));
    }
}
