//! Two-tier table: ordered pending queue in front of a durable table.
//!
//! Writers only touch the queue. `flush` moves a snapshot of the queue into
//! one durable write and then drops exactly the rows it wrote, unless a newer
//! version of a row was queued while the write was in flight.
//!
//! Read rule: the queue is consulted first, then the durable table. The queue
//! snapshot is always taken before the durable read, and flushed rows leave
//! the queue only after commit, so a reader can never miss a row that is in
//! the middle of being flushed.

use crate::durable::DurableTable;
use crate::error::{StoreError, StoreResult};
use crate::flusher::Flushable;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// A row that can live in a [`TieredTable`]
pub trait Row: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Primary key of the row
    fn row_id(&self) -> u64;
}

struct PendingRow<R> {
    row: R,
    bytes: Vec<u8>,
    version: u64,
}

struct TableState<R> {
    pending: BTreeMap<u64, PendingRow<R>>,
    version: u64,
    last_write: Instant,
    poisoned: Option<u64>,
    stats: TableStats,
}

/// Table statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Rows written through `upsert`
    pub upserts: u64,
    /// Successful flushes
    pub flushes: u64,
    /// Rows persisted by those flushes
    pub flushed_rows: u64,
    /// Pending rows dropped by a failed flush
    pub lost_rows: u64,
}

/// Pending queue + durable table for one row type
pub struct TieredTable<R: Row> {
    durable: Arc<dyn DurableTable>,
    state: Mutex<TableState<R>>,
    flush_lock: Mutex<()>,
    flush_threshold: usize,
}

impl<R: Row> TieredTable<R> {
    /// Create a table over a durable tier
    #[must_use]
    pub fn new(durable: Arc<dyn DurableTable>, flush_threshold: usize) -> Self {
        Self {
            durable,
            state: Mutex::new(TableState {
                pending: BTreeMap::new(),
                version: 0,
                last_write: Instant::now(),
                poisoned: None,
                stats: TableStats::default(),
            }),
            flush_lock: Mutex::new(()),
            flush_threshold,
        }
    }

    /// Table name
    #[must_use]
    pub fn name(&self) -> &str {
        self.durable.name()
    }

    /// Queue a row, replacing any queued row with the same id
    ///
    /// Only blocks on durable I/O when the queue reaches the flush threshold.
    ///
    /// # Errors
    ///
    /// Returns error if the row cannot be encoded, the table is poisoned, or
    /// the threshold flush fails
    pub fn upsert(&self, row: R) -> StoreResult<()> {
        let bytes = postcard::to_allocvec(&row)?;
        let should_flush = {
            let mut state = self.state.lock();
            if let Some(lost_rows) = state.poisoned {
                return Err(self.poisoned_error(lost_rows));
            }
            state.version += 1;
            let version = state.version;
            state.pending.insert(row.row_id(), PendingRow { row, bytes, version });
            state.last_write = Instant::now();
            state.stats.upserts += 1;
            self.flush_threshold > 0 && state.pending.len() >= self.flush_threshold
        };

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Apply `update` to a queued row in place
    ///
    /// Returns `false` when the row is not queued.
    ///
    /// # Errors
    ///
    /// Returns error if the updated row cannot be encoded or the table is poisoned
    pub fn update_pending<F>(&self, id: u64, update: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut R),
    {
        let mut state = self.state.lock();
        if let Some(lost_rows) = state.poisoned {
            return Err(self.poisoned_error(lost_rows));
        }
        state.version += 1;
        let version = state.version;
        let Some(pending) = state.pending.get_mut(&id) else {
            return Ok(false);
        };
        update(&mut pending.row);
        pending.bytes = postcard::to_allocvec(&pending.row)?;
        pending.version = version;
        state.last_write = Instant::now();
        Ok(true)
    }

    /// Point read: queue first, then durable table
    ///
    /// # Errors
    ///
    /// Returns error if the durable read or decoding fails
    pub fn get(&self, id: u64) -> StoreResult<Option<R>> {
        if let Some(pending) = self.state.lock().pending.get(&id) {
            return Ok(Some(pending.row.clone()));
        }
        match self.durable.get(id)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All rows with id >= `start` in id order, queued rows taking precedence
    ///
    /// # Errors
    ///
    /// Returns error if the durable read or decoding fails
    pub fn scan_from(&self, start: u64) -> StoreResult<Vec<R>> {
        let queued: Vec<(u64, R)> = {
            let state = self.state.lock();
            state
                .pending
                .range(start..)
                .map(|(id, pending)| (*id, pending.row.clone()))
                .collect()
        };

        let mut merged = BTreeMap::new();
        for (id, bytes) in self.durable.range_from(start)? {
            merged.insert(id, decode::<R>(&bytes)?);
        }
        merged.extend(queued);
        Ok(merged.into_values().collect())
    }

    /// All rows in id order that satisfy `predicate`
    ///
    /// # Errors
    ///
    /// Returns error if the durable read or decoding fails
    pub fn scan<P>(&self, predicate: P) -> StoreResult<Vec<R>>
    where
        P: Fn(&R) -> bool,
    {
        Ok(self
            .scan_from(0)?
            .into_iter()
            .filter(|row| predicate(row))
            .collect())
    }

    /// Largest row id in either tier
    ///
    /// # Errors
    ///
    /// Returns error if the durable read fails
    pub fn last_id(&self) -> StoreResult<Option<u64>> {
        let queued = self.state.lock().pending.keys().next_back().copied();
        let durable = self.durable.last_id()?;
        Ok(queued.max(durable))
    }

    /// Persist every queued row in one durable write
    ///
    /// A failed write poisons the table: queued rows are dropped and every
    /// later write is rejected until [`TieredTable::reinitialize`].
    ///
    /// # Errors
    ///
    /// Returns error if the table is poisoned or the durable write fails
    pub fn flush(&self) -> StoreResult<usize> {
        let _flushing = self.flush_lock.lock();

        let batch: Vec<(u64, u64, Vec<u8>)> = {
            let state = self.state.lock();
            if let Some(lost_rows) = state.poisoned {
                return Err(self.poisoned_error(lost_rows));
            }
            state
                .pending
                .iter()
                .map(|(id, pending)| (*id, pending.version, pending.bytes.clone()))
                .collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let rows: Vec<(u64, Vec<u8>)> = batch
            .iter()
            .map(|(id, _, bytes)| (*id, bytes.clone()))
            .collect();

        if let Err(err) = self.durable.write_batch(&rows) {
            let mut state = self.state.lock();
            let lost_rows = state.pending.len() as u64;
            state.pending.clear();
            state.poisoned = Some(lost_rows);
            state.stats.lost_rows += lost_rows;
            error!(
                table = self.name(),
                lost_rows,
                error = %err,
                "flush failed; table poisoned"
            );
            return Err(err);
        }

        let mut state = self.state.lock();
        for (id, version, _) in &batch {
            if state.pending.get(id).is_some_and(|p| p.version == *version) {
                state.pending.remove(id);
            }
        }
        state.stats.flushes += 1;
        state.stats.flushed_rows += batch.len() as u64;
        debug!(table = self.name(), rows = batch.len(), "flushed pending rows");
        Ok(batch.len())
    }

    /// Clear the poisoned state after a failed flush
    pub fn reinitialize(&self) {
        let mut state = self.state.lock();
        state.poisoned = None;
        state.last_write = Instant::now();
    }

    /// Whether a failed flush has poisoned the table
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned.is_some()
    }

    /// Number of queued rows
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// How long the queue has been idle, if anything is queued
    #[must_use]
    pub fn idle_for(&self) -> Option<Duration> {
        let state = self.state.lock();
        if state.pending.is_empty() {
            None
        } else {
            Some(state.last_write.elapsed())
        }
    }

    /// Table statistics
    #[must_use]
    pub fn stats(&self) -> TableStats {
        self.state.lock().stats.clone()
    }

    fn poisoned_error(&self, lost_rows: u64) -> StoreError {
        StoreError::Poisoned {
            table: self.name().to_string(),
            lost_rows,
        }
    }
}

impl<R: Row> Flushable for TieredTable<R> {
    fn name(&self) -> &str {
        TieredTable::name(self)
    }

    fn flush(&self) -> StoreResult<usize> {
        TieredTable::flush(self)
    }

    fn idle_for(&self) -> Option<Duration> {
        TieredTable::idle_for(self)
    }
}

fn decode<R: DeserializeOwned>(bytes: &[u8]) -> StoreResult<R> {
    Ok(postcard::from_bytes(bytes)?)
}
