//! Shared replay context for the tabs of one session.

use crate::config::ReplayConfig;
use crate::error::{ReplayError, ReplayResult};
use crate::mirror::ResourceMirror;
use crate::reconstructor::StateReconstructor;
use crate::snapshot::StorageSnapshot;
use crate::ticks::{RecordedSession, TickIndex};
use std::sync::Arc;
use timelapse_core::{SessionId, TabId};
use timelapse_log::{ChangeLogStore, SessionTimeline};
use timelapse_storage::ResourceStore;
use tracing::debug;

/// One session's records and mirror, handed out to per-tab reconstructors
pub struct MirrorContext {
    session: Arc<RecordedSession>,
    mirror: Arc<ResourceMirror>,
    config: ReplayConfig,
    storage: Option<StorageSnapshot>,
}

impl MirrorContext {
    /// Context over an already loaded session
    #[must_use]
    pub fn new(session: Arc<RecordedSession>, mirror: Arc<ResourceMirror>, config: ReplayConfig) -> Self {
        Self {
            session,
            mirror,
            config,
            storage: None,
        }
    }

    /// Load a session and index its resources
    ///
    /// # Errors
    ///
    /// Returns error if either store cannot be read
    pub fn open(
        id: SessionId,
        log: &ChangeLogStore,
        resources: Arc<ResourceStore>,
        timeline: SessionTimeline,
        config: ReplayConfig,
    ) -> ReplayResult<Self> {
        let session = RecordedSession::load(id, log, &resources, timeline)?;
        let mirror = ResourceMirror::from_store(resources)?;
        debug!(
            session = %id,
            changes = session.changes.len(),
            urls = mirror.len(),
            "opened mirror context"
        );
        Ok(Self::new(Arc::new(session), Arc::new(mirror), config))
    }

    /// Storage every reconstructor restores at its first load
    #[must_use]
    pub fn with_storage_snapshot(mut self, snapshot: StorageSnapshot) -> Self {
        self.storage = Some(snapshot);
        self
    }

    /// Recorded session
    #[must_use]
    pub fn session(&self) -> &RecordedSession {
        &self.session
    }

    /// Shared mirror
    #[must_use]
    pub fn mirror(&self) -> &Arc<ResourceMirror> {
        &self.mirror
    }

    /// Tabs of the session
    #[must_use]
    pub fn tabs(&self) -> Vec<TabId> {
        self.session.tabs()
    }

    /// Tick index of every tab
    #[must_use]
    pub fn tick_index(&self) -> TickIndex {
        TickIndex::build(&self.session)
    }

    /// Fresh reconstructor seeded with only this tab's records
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::UnknownTab`] if the session never saw the tab
    pub fn reconstructor(&self, tab_id: TabId) -> ReplayResult<StateReconstructor> {
        if !self.session.tabs().contains(&tab_id) {
            return Err(ReplayError::UnknownTab(tab_id));
        }
        let reconstructor = StateReconstructor::new(
            tab_id,
            self.session.changes_for(tab_id),
            Arc::clone(&self.mirror),
            self.config.clone(),
        );
        Ok(match &self.storage {
            Some(snapshot) => reconstructor.with_storage_snapshot(snapshot.clone()),
            None => reconstructor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timelapse_core::{CommandId, FrameId, NodeId, Timestamp};
    use timelapse_log::DomChangeRecord;
    use timelapse_storage::{SessionDb, StoreConfig};

    fn context() -> MirrorContext {
        let db = SessionDb::in_memory().unwrap();
        let config = StoreConfig::default();
        let log = ChangeLogStore::open(&db, &config).unwrap();
        for (tab, url) in [(1, "https://a.test/"), (2, "https://b.test/")] {
            log.append(DomChangeRecord::new_document(
                TabId::new(tab),
                FrameId::new(tab),
                CommandId::new(1),
                Timestamp::from_millis(10),
                NodeId::new(1),
                url,
            ))
            .unwrap();
        }
        let resources = Arc::new(ResourceStore::new(&db, &config));
        MirrorContext::open(SessionId::new(), &log, resources, SessionTimeline::default(), ReplayConfig::default())
            .unwrap()
    }

    #[test]
    fn test_reconstructor_per_tab() {
        let context = context();
        assert_eq!(context.tabs(), vec![TabId::new(1), TabId::new(2)]);
        assert_eq!(context.tick_index().tabs.len(), 2);

        let mut second = context.reconstructor(TabId::new(2)).unwrap();
        second.load(None).unwrap();
        assert_eq!(second.document_url(None), Some("https://b.test/"));
        assert_eq!(second.main_frame(), Some(FrameId::new(2)));
    }

    #[test]
    fn test_unknown_tab() {
        let context = context();
        assert!(matches!(
            context.reconstructor(TabId::new(9)),
            Err(ReplayError::UnknownTab(tab)) if tab == TabId::new(9)
        ));
    }

    #[test]
    fn test_storage_is_handed_to_every_reconstructor() {
        let snapshot = StorageSnapshot::from_json(r#"{"session_storage":{"https://a.test":{"s":"1"}}}"#).unwrap();
        let context = context().with_storage_snapshot(snapshot.clone());
        for tab in context.tabs() {
            let mut replay = context.reconstructor(tab).unwrap();
            replay.load(None).unwrap();
            assert_eq!(replay.storage(), Some(&snapshot));
        }
        assert!(Arc::ptr_eq(context.mirror(), context.mirror()));
    }
}
