//! The session change log.
//!
//! Records are appended in arrival order and keyed by their global id. The
//! log never reorders a record once it is appended; every read returns
//! records in global id order.

use crate::error::{LogError, LogResult};
use crate::record::DomChangeRecord;
use indexmap::IndexSet;
use parking_lot::Mutex;
use std::time::Duration;
use timelapse_core::{CommandId, FrameId, GlobalId, TabId};
use timelapse_storage::{Flushable, SessionDb, StoreConfig, StoreResult, TableStats, TieredTable};
use tracing::warn;

/// Durable, ordered log of DOM change records
pub struct ChangeLogStore {
    table: TieredTable<DomChangeRecord>,
    last_id: Mutex<GlobalId>,
    max_gap: u64,
}

impl ChangeLogStore {
    /// Open the change log of a session database
    ///
    /// # Errors
    ///
    /// Returns error if the last persisted id cannot be read
    pub fn open(db: &SessionDb, config: &StoreConfig) -> LogResult<Self> {
        Self::with_table(TieredTable::new(db.dom_changes(), config.flush_threshold), config)
    }

    /// Open a change log over any two-tier table
    ///
    /// # Errors
    ///
    /// Returns error if the last persisted id cannot be read
    pub fn with_table(table: TieredTable<DomChangeRecord>, config: &StoreConfig) -> LogResult<Self> {
        let last = table.last_id()?.unwrap_or(0);
        Ok(Self {
            table,
            last_id: Mutex::new(GlobalId::new(last)),
            max_gap: config.max_global_id_gap,
        })
    }

    /// Append a record, assigning its global id if it has none
    ///
    /// A supplied id far beyond the last one is accepted and logged.
    ///
    /// # Errors
    ///
    /// Returns error if the id does not increase, the table is poisoned, or a
    /// threshold flush fails
    pub fn append(&self, mut record: DomChangeRecord) -> LogResult<GlobalId> {
        let mut last = self.last_id.lock();
        if record.global_id.is_unassigned() {
            record.global_id = last.next();
        } else if record.global_id <= *last {
            return Err(LogError::GlobalIdRegression {
                id: record.global_id,
                last: *last,
            });
        } else if record.global_id.get() - last.get() > self.max_gap {
            warn!(
                global_id = %record.global_id,
                last = %*last,
                gap = record.global_id.get() - last.get(),
                "out-of-order change record accepted"
            );
        }

        let id = record.global_id;
        self.table.upsert(record)?;
        *last = id;
        Ok(id)
    }

    /// Append records in order
    ///
    /// # Errors
    ///
    /// Stops at the first record that fails to append
    pub fn append_all<I>(&self, records: I) -> LogResult<Vec<GlobalId>>
    where
        I: IntoIterator<Item = DomChangeRecord>,
    {
        records.into_iter().map(|record| self.append(record)).collect()
    }

    /// Records of the given frames, optionally only those logged after a command
    ///
    /// An empty frame list selects every frame.
    ///
    /// # Errors
    ///
    /// Returns error if the durable read fails
    pub fn query(
        &self,
        frame_ids: &[FrameId],
        since_command_id: Option<CommandId>,
    ) -> LogResult<Vec<DomChangeRecord>> {
        Ok(self.table.scan(|record| {
            (frame_ids.is_empty() || frame_ids.contains(&record.frame_id))
                && since_command_id.is_none_or(|since| record.command_id > since)
        })?)
    }

    /// Records of a tab after `since_global_id`
    ///
    /// # Errors
    ///
    /// Returns error if the durable read fails
    pub fn query_tab(&self, tab_id: TabId, since_global_id: Option<GlobalId>) -> LogResult<Vec<DomChangeRecord>> {
        let start = since_global_id.map_or(0, |id| id.get() + 1);
        Ok(self
            .table
            .scan_from(start)?
            .into_iter()
            .filter(|record| record.tab_id == tab_id)
            .collect())
    }

    /// Every record in the log
    ///
    /// # Errors
    ///
    /// Returns error if the durable read fails
    pub fn all(&self) -> LogResult<Vec<DomChangeRecord>> {
        Ok(self.table.scan_from(0)?)
    }

    /// Point read
    ///
    /// # Errors
    ///
    /// Returns error if the durable read fails
    pub fn get(&self, global_id: GlobalId) -> LogResult<Option<DomChangeRecord>> {
        Ok(self.table.get(global_id.get())?)
    }

    /// Frames of a tab, in order of first appearance
    ///
    /// # Errors
    ///
    /// Returns error if the durable read fails
    pub fn frames_for_tab(&self, tab_id: TabId) -> LogResult<Vec<FrameId>> {
        let frames: IndexSet<FrameId> = self
            .table
            .scan_from(0)?
            .into_iter()
            .filter(|record| record.tab_id == tab_id)
            .map(|record| record.frame_id)
            .collect();
        Ok(frames.into_iter().collect())
    }

    /// Tabs with at least one record, in order of first appearance
    ///
    /// # Errors
    ///
    /// Returns error if the durable read fails
    pub fn tabs(&self) -> LogResult<Vec<TabId>> {
        let tabs: IndexSet<TabId> = self
            .table
            .scan_from(0)?
            .into_iter()
            .map(|record| record.tab_id)
            .collect();
        Ok(tabs.into_iter().collect())
    }

    /// Last appended global id ([`GlobalId::UNASSIGNED`] when empty)
    #[must_use]
    pub fn last_global_id(&self) -> GlobalId {
        *self.last_id.lock()
    }

    /// Persist queued records
    ///
    /// # Errors
    ///
    /// Returns error if the durable write fails; the log is then poisoned
    pub fn flush(&self) -> LogResult<usize> {
        Ok(self.table.flush()?)
    }

    /// Accept writes again after a failed flush
    pub fn reinitialize(&self) {
        self.table.reinitialize();
    }

    /// Whether a failed flush has poisoned the log
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.table.is_poisoned()
    }

    /// Queued records not yet flushed
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.table.pending_len()
    }

    /// Table statistics
    #[must_use]
    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }
}

impl Flushable for ChangeLogStore {
    fn name(&self) -> &str {
        self.table.name()
    }

    fn flush(&self) -> StoreResult<usize> {
        self.table.flush()
    }

    fn idle_for(&self) -> Option<Duration> {
        self.table.idle_for()
    }
}
