//! Per-tab DOM reconstruction.
//!
//! A [`StateReconstructor`] replays one tab's change records against an
//! offline [`DomArena`]. Moving forward applies only the records between the
//! current position and the target. Moving backward clears everything and
//! replays from the first record, since changes are not invertible.
//!
//! Records are keyed into the arena through a tracker of
//! `(frame, recorder node id)`. Removing a node detaches it but keeps its
//! tracker entry, so a later `Added` for the same id moves the existing node
//! with its attributes intact.

use crate::config::ReplayConfig;
use crate::dom::{DomArena, DomNodeId, DomNodeKind};
use crate::error::{ReplayError, ReplayResult};
use crate::mirror::{MirrorResponse, ResourceMirror};
use crate::resolve::{is_fetchable, resolve_url};
use crate::snapshot::StorageSnapshot;
use crate::ticks::Tick;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use timelapse_core::{FrameId, GlobalId, Hash, NodeId, ResourceId, TabId, Timestamp};
use timelapse_log::{DomAction, DomChangeRecord, NodeType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a load reached its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadMode {
    /// Cleared and replayed from the first record
    Reset,
    /// Applied only the records past the previous position
    FastForward,
    /// Already at the target
    Unchanged,
}

/// Result of a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    /// Reset, fast-forward or no-op
    pub mode: LoadMode,
    /// Records applied by this load
    pub applied: usize,
    /// Records skipped as malformed by this load
    pub skipped: usize,
    /// Position after the load
    pub position: GlobalId,
}

/// A fetch issued during replay and how the mirror answered it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRecord {
    /// Record whose attribute triggered the fetch
    pub global_id: GlobalId,
    /// Request method
    pub method: String,
    /// Resolved URL
    pub url: String,
    /// Replay instant the fetch was keyed by
    pub at: Timestamp,
    /// Status served; 0 when not mirrored
    pub status_code: u16,
    /// Resource that answered, if any
    pub resource_id: Option<ResourceId>,
    /// Store failure while serving
    pub error: Option<String>,
}

impl FetchRecord {
    /// Whether the mirror had the resource
    #[must_use]
    pub fn is_mirrored(&self) -> bool {
        self.resource_id.is_some()
    }
}

/// A record replay could not apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Skipped record
    pub global_id: GlobalId,
    /// Its action
    pub action: DomAction,
    /// Node it referred to
    pub node_id: NodeId,
    /// Why it could not be applied
    pub reason: String,
}

#[derive(Debug)]
struct FrameDocument {
    root: DomNodeId,
    url: String,
}

/// Everything a reset throws away
#[derive(Debug, Default)]
struct ReplayState {
    arena: DomArena,
    tracker: HashMap<(FrameId, NodeId), DomNodeId>,
    documents: HashMap<FrameId, FrameDocument>,
    main_frame: Option<FrameId>,
    position: GlobalId,
    skipped: Vec<SkippedRecord>,
}

struct Fetcher<'a> {
    mirror: &'a ResourceMirror,
    config: &'a ReplayConfig,
    at: Timestamp,
    log: &'a mut Vec<FetchRecord>,
}

impl Fetcher<'_> {
    fn fetch(&mut self, global_id: GlobalId, base: &str, reference: &str) {
        if !self.config.fetch_resources {
            return;
        }
        let Some(url) = resolve_url(base, reference) else {
            debug!(base, reference, "not fetching unresolvable url");
            return;
        };
        if !is_fetchable(&url) {
            debug!(%url, "not fetching non-network url");
            return;
        }
        let url = String::from(url);
        let method = self.config.default_method.clone();
        let mut record = FetchRecord {
            global_id,
            method,
            url,
            at: self.at,
            status_code: 0,
            resource_id: None,
            error: None,
        };
        match self.mirror.serve(&record.method, &record.url, self.at) {
            Ok(MirrorResponse::Mirrored(resource)) => {
                record.status_code = resource.status_code;
                record.resource_id = Some(resource.resource_id);
            }
            Ok(MirrorResponse::NotMirrored { .. }) => {}
            Err(err) => {
                warn!(url = %record.url, error = %err, "mirrored fetch failed");
                record.error = Some(err.to_string());
            }
        }
        self.log.push(record);
    }
}

impl ReplayState {
    fn apply(&mut self, change: &DomChangeRecord, fetcher: &mut Fetcher<'_>) -> Result<(), &'static str> {
        match change.action {
            DomAction::NewDocument => {
                self.start_document(change);
                Ok(())
            }
            DomAction::Location => {
                let url = change.url().ok_or("location change without a url")?;
                let document = self
                    .documents
                    .get_mut(&change.frame_id)
                    .ok_or("location change in a frame without a document")?;
                url.clone_into(&mut document.url);
                Ok(())
            }
            DomAction::Added => self.add(change, fetcher),
            DomAction::Removed => {
                let node = self.tracked(change)?;
                self.arena.detach(node);
                Ok(())
            }
            DomAction::Text => {
                let node = self.tracked(change)?;
                let text = change.data.text.as_deref().unwrap_or_default();
                if self.arena.set_text(node, text) {
                    Ok(())
                } else {
                    Err("text change on a node without character data")
                }
            }
            DomAction::Attribute => {
                let node = self.tracked(change)?;
                self.set_attributes(node, change)?;
                self.fetch_triggered(node, change, fetcher);
                Ok(())
            }
            DomAction::Property => {
                let node = self.tracked(change)?;
                for (name, value) in &change.data.properties {
                    self.arena.set_property(node, name, value);
                }
                Ok(())
            }
        }
    }

    fn tracked(&self, change: &DomChangeRecord) -> Result<DomNodeId, &'static str> {
        self.tracker
            .get(&(change.frame_id, change.node_id))
            .copied()
            .ok_or("change references an untracked node")
    }

    fn start_document(&mut self, change: &DomChangeRecord) {
        let frame = change.frame_id;
        if self.main_frame == Some(frame) {
            // Child frames went away with the previous page.
            self.documents.retain(|f, _| *f == frame);
            self.tracker.retain(|(f, _), _| *f == frame);
        }
        if self.documents.remove(&frame).is_some() {
            self.tracker.retain(|(f, _), _| *f != frame);
        }
        let root = self.arena.create(DomNodeKind::Document);
        self.tracker.insert((frame, change.node_id), root);
        self.documents.insert(
            frame,
            FrameDocument {
                root,
                url: change.url().unwrap_or_default().to_string(),
            },
        );
        self.main_frame.get_or_insert(frame);
    }

    fn add(&mut self, change: &DomChangeRecord, fetcher: &mut Fetcher<'_>) -> Result<(), &'static str> {
        let frame = change.frame_id;
        let parent_id = change.data.parent_id.ok_or("added node without a parent")?;
        let parent = *self
            .tracker
            .get(&(frame, parent_id))
            .ok_or("added under an untracked parent")?;
        let existing = self.tracker.get(&(frame, change.node_id)).copied();
        let node = match existing {
            Some(node) => node,
            None => self.arena.create(node_kind(change)?),
        };
        let previous = change
            .data
            .previous_sibling_id
            .and_then(|prev| self.tracker.get(&(frame, prev)).copied());
        if !self.arena.insert_after(parent, previous, node) {
            return Err("insertion would make a node its own ancestor");
        }
        if existing.is_some() {
            return Ok(());
        }
        self.tracker.insert((frame, change.node_id), node);
        self.set_attributes(node, change)?;
        for (name, value) in &change.data.properties {
            self.arena.set_property(node, name, value);
        }
        self.fetch_triggered(node, change, fetcher);
        Ok(())
    }

    fn set_attributes(&mut self, node: DomNodeId, change: &DomChangeRecord) -> Result<(), &'static str> {
        for (name, value) in &change.data.attributes {
            let applied = match value {
                Some(value) => self.arena.set_attribute(node, name, value),
                None => self.arena.remove_attribute(node, name),
            };
            if !applied {
                return Err("attribute change on a node that is not an element");
            }
        }
        Ok(())
    }

    /// `src` on anything, or `href` on a stylesheet link
    fn fetch_triggered(&self, node: DomNodeId, change: &DomChangeRecord, fetcher: &mut Fetcher<'_>) {
        let gained = |name: &str| {
            change
                .data
                .attributes
                .iter()
                .any(|(n, v)| v.is_some() && n.eq_ignore_ascii_case(name))
        };
        let mut references = Vec::new();
        if gained("src") {
            references.extend(self.arena.attribute(node, "src"));
        }
        let is_link = self.arena.tag(node).as_deref() == Some("link");
        if is_link && (gained("href") || gained("rel")) {
            let stylesheet = self.arena.attribute(node, "rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("stylesheet"))
            });
            if stylesheet {
                references.extend(self.arena.attribute(node, "href"));
            }
        }
        if references.is_empty() {
            return;
        }
        let base = self
            .documents
            .get(&change.frame_id)
            .map_or("", |doc| doc.url.as_str());
        for reference in references.into_iter().filter(|r| !r.trim().is_empty()) {
            fetcher.fetch(change.global_id, base, reference);
        }
    }
}

fn node_kind(change: &DomChangeRecord) -> Result<DomNodeKind, &'static str> {
    let data = &change.data;
    let element = |tag: &String| DomNodeKind::Element {
        tag: tag.clone(),
        attributes: IndexMap::new(),
    };
    match change.node_type {
        Some(NodeType::Element) => data.tag.as_ref().map(element).ok_or("element without a tag"),
        Some(NodeType::Text) => Ok(DomNodeKind::Text(data.text.clone().unwrap_or_default())),
        Some(NodeType::Comment) => Ok(DomNodeKind::Comment(data.text.clone().unwrap_or_default())),
        Some(NodeType::Doctype) => Ok(DomNodeKind::Doctype {
            name: data.tag.clone().unwrap_or_else(|| "html".to_string()),
        }),
        Some(NodeType::Document) => Err("document node added as a child"),
        None => match (&data.tag, &data.text) {
            (Some(tag), _) => Ok(element(tag)),
            (None, Some(text)) => Ok(DomNodeKind::Text(text.clone())),
            (None, None) => Err("added node without a type"),
        },
    }
}

/// Replays one tab's DOM to any recorded instant
///
/// Loads on one instance must not overlap; it is single-writer state.
/// After a cancelled load the instance is discarded and must be replaced.
pub struct StateReconstructor {
    tab_id: TabId,
    changes: Vec<DomChangeRecord>,
    mirror: Arc<ResourceMirror>,
    config: ReplayConfig,
    pending_storage: Option<StorageSnapshot>,
    storage: Option<StorageSnapshot>,
    state: Option<ReplayState>,
    fetches: Vec<FetchRecord>,
    discarded: bool,
}

impl StateReconstructor {
    /// Reconstructor for `tab_id`; records of other tabs are ignored
    #[must_use]
    pub fn new(
        tab_id: TabId,
        changes: impl IntoIterator<Item = DomChangeRecord>,
        mirror: Arc<ResourceMirror>,
        config: ReplayConfig,
    ) -> Self {
        let mut changes: Vec<DomChangeRecord> = changes.into_iter().filter(|c| c.tab_id == tab_id).collect();
        changes.sort_by_key(|c| c.global_id);
        Self {
            tab_id,
            changes,
            mirror,
            config,
            pending_storage: None,
            storage: None,
            state: None,
            fetches: Vec::new(),
            discarded: false,
        }
    }

    /// Storage to restore on the first load
    #[must_use]
    pub fn with_storage_snapshot(mut self, snapshot: StorageSnapshot) -> Self {
        self.pending_storage = Some(snapshot);
        self
    }

    /// Tab being reconstructed
    #[must_use]
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Last record of the tab
    #[must_use]
    pub fn last_global_id(&self) -> GlobalId {
        self.changes.last().map_or(GlobalId::UNASSIGNED, |c| c.global_id)
    }

    /// Applied position; `None` before the first load
    #[must_use]
    pub fn position(&self) -> Option<GlobalId> {
        self.state.as_ref().map(|s| s.position)
    }

    /// Whether a cancelled load discarded this instance
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    /// Replay to `tick`, or to the end of the tab's log
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::Discarded`] if an earlier load was cancelled
    pub fn load(&mut self, tick: Option<&Tick>) -> ReplayResult<LoadOutcome> {
        self.load_until(tick, None)
    }

    /// Like [`load`](Self::load), checking `cancel` between records
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::Discarded`] if the token fires during the load
    /// or an earlier load was cancelled
    pub fn load_cancellable(&mut self, tick: Option<&Tick>, cancel: &CancellationToken) -> ReplayResult<LoadOutcome> {
        self.load_until(tick, Some(cancel))
    }

    fn load_until(&mut self, tick: Option<&Tick>, cancel: Option<&CancellationToken>) -> ReplayResult<LoadOutcome> {
        if self.discarded {
            return Err(ReplayError::Discarded);
        }
        let target = tick.map_or_else(|| self.last_global_id(), |t| t.change_range_end);
        let at = tick.map_or(Timestamp::MAX, |t| t.timestamp);

        if let Some(snapshot) = self.pending_storage.take() {
            info!(tab = %self.tab_id, origins = snapshot.origins().len(), "restored storage snapshot");
            self.storage = Some(snapshot);
        }

        let (mode, mut state) = match self.state.take() {
            Some(state) if target == state.position => (LoadMode::Unchanged, state),
            Some(state) if target > state.position => (LoadMode::FastForward, state),
            _ => (LoadMode::Reset, ReplayState::default()),
        };
        match mode {
            LoadMode::Reset => info!(tab = %self.tab_id, target = %target, "resetting reconstruction"),
            LoadMode::FastForward => info!(
                tab = %self.tab_id,
                from = %state.position,
                target = %target,
                "fast-forwarding reconstruction"
            ),
            LoadMode::Unchanged => debug!(tab = %self.tab_id, target = %target, "reconstruction already at target"),
        }

        let start = self.changes.partition_point(|c| c.global_id <= state.position);
        let skipped_before = state.skipped.len();
        let mut applied = 0;
        let mut fetcher = Fetcher {
            mirror: &self.mirror,
            config: &self.config,
            at,
            log: &mut self.fetches,
        };
        for change in self.changes[start..].iter().take_while(|c| c.global_id <= target) {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                warn!(tab = %self.tab_id, at = %change.global_id, "load cancelled, discarding reconstructor");
                self.discarded = true;
                return Err(ReplayError::Discarded);
            }
            match state.apply(change, &mut fetcher) {
                Ok(()) => applied += 1,
                Err(reason) => {
                    warn!(
                        global_id = %change.global_id,
                        action = %change.action,
                        node = %change.node_id,
                        reason,
                        "skipping malformed record"
                    );
                    state.skipped.push(SkippedRecord {
                        global_id: change.global_id,
                        action: change.action,
                        node_id: change.node_id,
                        reason: reason.to_string(),
                    });
                }
            }
        }

        state.position = target;
        let outcome = LoadOutcome {
            mode,
            applied,
            skipped: state.skipped.len() - skipped_before,
            position: target,
        };
        self.state = Some(state);
        Ok(outcome)
    }

    fn document(&self, frame: Option<FrameId>) -> Option<(&ReplayState, &FrameDocument)> {
        let state = self.state.as_ref()?;
        let frame = frame.or(state.main_frame)?;
        state.documents.get(&frame).map(|doc| (state, doc))
    }

    /// Serialized document of `frame` (the main frame when `None`)
    ///
    /// Empty before the first load or for a frame without a document.
    #[must_use]
    pub fn outer_html(&self, frame: Option<FrameId>) -> String {
        self.document(frame)
            .map(|(state, doc)| state.arena.outer_html(doc.root))
            .unwrap_or_default()
    }

    /// Current URL of `frame` (the main frame when `None`)
    #[must_use]
    pub fn document_url(&self, frame: Option<FrameId>) -> Option<&str> {
        self.document(frame).map(|(_, doc)| doc.url.as_str())
    }

    /// First frame that loaded a document
    #[must_use]
    pub fn main_frame(&self) -> Option<FrameId> {
        self.state.as_ref().and_then(|s| s.main_frame)
    }

    /// Frames holding a document, in id order
    #[must_use]
    pub fn frames(&self) -> Vec<FrameId> {
        let mut frames: Vec<FrameId> = self
            .state
            .as_ref()
            .map(|s| s.documents.keys().copied().collect())
            .unwrap_or_default();
        frames.sort();
        frames
    }

    /// BLAKE3 digest of the serialized main frame
    #[must_use]
    pub fn digest(&self) -> Hash {
        Hash::compute(self.outer_html(None).as_bytes())
    }

    /// JSON-encoded DOM property of a tracked node
    #[must_use]
    pub fn property(&self, frame_id: FrameId, node_id: NodeId, name: &str) -> Option<&str> {
        let state = self.state.as_ref()?;
        let node = state.tracker.get(&(frame_id, node_id))?;
        state
            .arena
            .get(*node)
            .and_then(|n| n.properties.get(name))
            .map(String::as_str)
    }

    /// Every fetch issued so far, across loads
    #[must_use]
    pub fn fetches(&self) -> &[FetchRecord] {
        &self.fetches
    }

    /// Records skipped since the last reset
    #[must_use]
    pub fn skipped(&self) -> &[SkippedRecord] {
        self.state
            .as_ref()
            .map(|s| s.skipped.as_slice())
            .unwrap_or_default()
    }

    /// Restored storage, once the first load has happened
    #[must_use]
    pub fn storage(&self) -> Option<&StorageSnapshot> {
        self.storage.as_ref()
    }
}
