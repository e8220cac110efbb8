//! Per-tab view of the change log used by navigation UIs.
//!
//! [`to_dom_recording`] groups records into paint events and resolves the
//! DOM path of every changed node. Paths are tracked through the structural
//! history of the log (nodes move when their ancestors are reparented), so
//! the index is rebuilt incrementally as records are scanned rather than
//! computed from a static map.

use crate::record::{DomAction, DomChangeRecord, NodeType};
use crate::timeline::MouseEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use timelapse_core::{CommandId, FrameId, GlobalId, NodeId, TabId, Timestamp};

/// Iframe element hosting a child frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHost {
    /// Frame containing the iframe element
    pub parent_frame: FrameId,
    /// The iframe element
    pub iframe_node: NodeId,
}

/// Maps child frames to the iframe element that hosts them
pub trait FrameHostResolver {
    /// Host of `frame`, or `None` for a top-level frame
    fn host_of(&self, frame: FrameId) -> Option<FrameHost>;
}

/// Resolver for sessions where every frame is top-level
#[derive(Debug, Clone, Copy, Default)]
pub struct TopLevelFrames;

impl FrameHostResolver for TopLevelFrames {
    fn host_of(&self, _frame: FrameId) -> Option<FrameHost> {
        None
    }
}

impl FrameHostResolver for BTreeMap<FrameId, FrameHost> {
    fn host_of(&self, frame: FrameId) -> Option<FrameHost> {
        self.get(&frame).copied()
    }
}

/// One step of a [`DomPath`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    /// Lowercase tag, or `#text`, `#comment`, `#doctype`, `#document`
    pub name: String,
    /// Position among the parent's children
    pub index: usize,
}

/// Location of a node from the top-level document down
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomPath {
    /// Steps from the outermost document
    pub steps: Vec<PathStep>,
}

impl std::fmt::Display for DomPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for step in &self.steps {
            write!(f, "/{}[{}]", step.name, step.index)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct IndexedNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
struct FrameTree {
    document: Option<NodeId>,
    nodes: HashMap<NodeId, IndexedNode>,
}

impl FrameTree {
    fn detach(&mut self, node_id: NodeId) {
        let Some(parent) = self.nodes.get_mut(&node_id).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|child| *child != node_id);
        }
    }
}

/// Incrementally maintained node-id to path index
#[derive(Debug, Clone, Default)]
pub struct NodePathIndex {
    frames: HashMap<FrameId, FrameTree>,
}

impl NodePathIndex {
    /// Empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the structural effect of one record
    ///
    /// Returns `false` if the record referenced a node or parent the index
    /// does not know.
    pub fn observe(&mut self, record: &DomChangeRecord) -> bool {
        match record.action {
            DomAction::NewDocument => {
                let tree = self.frames.entry(record.frame_id).or_default();
                tree.nodes.clear();
                tree.document = Some(record.node_id);
                tree.nodes.insert(
                    record.node_id,
                    IndexedNode {
                        name: "#document".to_string(),
                        parent: None,
                        children: Vec::new(),
                    },
                );
                true
            }
            DomAction::Added => {
                let Some(tree) = self.frames.get_mut(&record.frame_id) else {
                    return false;
                };
                let Some(parent_id) = record.data.parent_id else {
                    return false;
                };
                if !tree.nodes.contains_key(&parent_id) {
                    return false;
                }
                tree.detach(record.node_id);
                let name = node_name(record);
                let node = tree.nodes.entry(record.node_id).or_insert_with(|| IndexedNode {
                    name: name.clone(),
                    parent: None,
                    children: Vec::new(),
                });
                if record.data.tag.is_some() || record.node_type.is_some() {
                    node.name = name;
                }
                node.parent = Some(parent_id);
                if let Some(parent) = tree.nodes.get_mut(&parent_id) {
                    let position = record
                        .data
                        .previous_sibling_id
                        .and_then(|prev| parent.children.iter().position(|c| *c == prev))
                        .map_or(parent.children.len(), |i| i + 1);
                    parent.children.insert(position, record.node_id);
                }
                true
            }
            DomAction::Removed => {
                let Some(tree) = self.frames.get_mut(&record.frame_id) else {
                    return false;
                };
                if !tree.nodes.contains_key(&record.node_id) {
                    return false;
                }
                tree.detach(record.node_id);
                true
            }
            DomAction::Location => self.frames.contains_key(&record.frame_id),
            DomAction::Text | DomAction::Attribute | DomAction::Property => self
                .frames
                .get(&record.frame_id)
                .is_some_and(|tree| tree.nodes.contains_key(&record.node_id)),
        }
    }

    /// Current path of a node, or `None` if it is detached or unknown
    #[must_use]
    pub fn path_of(&self, frame_id: FrameId, node_id: NodeId, resolver: &dyn FrameHostResolver) -> Option<DomPath> {
        self.resolve(frame_id, node_id, resolver, 0)
    }

    fn resolve(
        &self,
        frame_id: FrameId,
        node_id: NodeId,
        resolver: &dyn FrameHostResolver,
        depth: usize,
    ) -> Option<DomPath> {
        // Frame nesting deeper than this is a resolver cycle.
        if depth > 32 {
            return None;
        }
        let tree = self.frames.get(&frame_id)?;
        let mut steps = Vec::new();
        let mut current = node_id;
        for _ in 0..=tree.nodes.len() {
            let node = tree.nodes.get(&current)?;
            match node.parent {
                Some(parent_id) => {
                    let parent = tree.nodes.get(&parent_id)?;
                    let index = parent.children.iter().position(|c| *c == current)?;
                    steps.push(PathStep {
                        name: node.name.clone(),
                        index,
                    });
                    current = parent_id;
                }
                None if tree.document == Some(current) => {
                    steps.reverse();
                    let mut path = match resolver.host_of(frame_id) {
                        Some(host) => {
                            let mut outer = self
                                .resolve(host.parent_frame, host.iframe_node, resolver, depth + 1)
                                .unwrap_or_default();
                            outer.steps.push(PathStep {
                                name: "#document".to_string(),
                                index: 0,
                            });
                            outer
                        }
                        None => DomPath::default(),
                    };
                    path.steps.extend(steps);
                    return Some(path);
                }
                None => return None,
            }
        }
        None
    }
}

fn node_name(record: &DomChangeRecord) -> String {
    match record.node_type {
        Some(NodeType::Text) => "#text".to_string(),
        Some(NodeType::Comment) => "#comment".to_string(),
        Some(NodeType::Doctype) => "#doctype".to_string(),
        Some(NodeType::Document) => "#document".to_string(),
        Some(NodeType::Element) | None => record
            .data
            .tag
            .as_deref()
            .map_or_else(|| "#unknown".to_string(), str::to_ascii_lowercase),
    }
}

/// Records observed together at one instant of one tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaintEvent {
    /// Tab
    pub tab_id: TabId,
    /// Shared timestamp of the records
    pub timestamp: Timestamp,
    /// Command running when the first record was logged
    pub command_id: CommandId,
    /// First record
    pub first_global_id: GlobalId,
    /// Last record
    pub last_global_id: GlobalId,
    /// The records, in global id order
    pub changes: Vec<DomChangeRecord>,
}

impl PaintEvent {
    /// Whether this paint loads a new document into `frame_id`
    #[must_use]
    pub fn loads_document_in(&self, frame_id: FrameId) -> bool {
        self.changes
            .iter()
            .any(|c| c.is_new_document() && c.frame_id == frame_id)
    }
}

/// A document load observed in the recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLoad {
    /// Frame that loaded it
    pub frame_id: FrameId,
    /// The `NewDocument` record
    pub global_id: GlobalId,
    /// When it loaded
    pub timestamp: Timestamp,
    /// Document URL
    pub url: String,
    /// Paint event holding the record
    pub paint_index: usize,
}

/// Paint-grouped, path-resolved view of one tab's change records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomRecording {
    /// Paint events in order
    pub paint_events: Vec<PaintEvent>,
    /// First frame to receive a document
    pub main_frame_id: Option<FrameId>,
    /// Every document load, in order
    pub documents: Vec<DocumentLoad>,
    /// Path of the changed node at the time of each record
    pub node_paths: BTreeMap<GlobalId, DomPath>,
    /// Captured mouse positions
    pub mouse_events: Vec<MouseEvent>,
}

impl DomRecording {
    /// Attach mouse positions
    #[must_use]
    pub fn with_mouse_events(mut self, mouse_events: Vec<MouseEvent>) -> Self {
        self.mouse_events = mouse_events;
        self
    }

    /// Every record, in global id order
    pub fn changes(&self) -> impl Iterator<Item = &DomChangeRecord> {
        self.paint_events.iter().flat_map(|paint| paint.changes.iter())
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.paint_events.iter().map(|p| p.changes.len()).sum()
    }

    /// Whether there are no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paint_events.is_empty()
    }

    /// Last record's global id
    #[must_use]
    pub fn last_global_id(&self) -> GlobalId {
        self.paint_events
            .last()
            .map_or(GlobalId::UNASSIGNED, |p| p.last_global_id)
    }

    /// Path recorded for a change
    #[must_use]
    pub fn path_at(&self, global_id: GlobalId) -> Option<&DomPath> {
        self.node_paths.get(&global_id)
    }

    /// Loads of the main frame
    pub fn main_frame_documents(&self) -> impl Iterator<Item = &DocumentLoad> {
        self.documents
            .iter()
            .filter(move |doc| Some(doc.frame_id) == self.main_frame_id)
    }
}

/// Project raw records into a [`DomRecording`]
///
/// `changes` must be in global id order. Every record feeds the path index;
/// only records of `frame_filter` (all frames when `None`) appear in the
/// output.
#[must_use]
pub fn to_dom_recording(
    changes: &[DomChangeRecord],
    frame_filter: Option<&[FrameId]>,
    resolver: &dyn FrameHostResolver,
) -> DomRecording {
    let mut recording = DomRecording::default();
    let mut index = NodePathIndex::new();

    for change in changes {
        let path_before = (change.action == DomAction::Removed)
            .then(|| index.path_of(change.frame_id, change.node_id, resolver))
            .flatten();
        index.observe(change);

        if frame_filter.is_some_and(|frames| !frames.contains(&change.frame_id)) {
            continue;
        }

        let path = path_before.or_else(|| index.path_of(change.frame_id, change.node_id, resolver));
        if let Some(path) = path {
            recording.node_paths.insert(change.global_id, path);
        }

        let starts_new_paint = recording
            .paint_events
            .last()
            .is_none_or(|paint| paint.tab_id != change.tab_id || paint.timestamp != change.timestamp);
        if starts_new_paint {
            recording.paint_events.push(PaintEvent {
                tab_id: change.tab_id,
                timestamp: change.timestamp,
                command_id: change.command_id,
                first_global_id: change.global_id,
                last_global_id: change.global_id,
                changes: Vec::new(),
            });
        }
        let paint_index = recording.paint_events.len() - 1;
        if let Some(paint) = recording.paint_events.last_mut() {
            paint.last_global_id = change.global_id;
            paint.changes.push(change.clone());
        }

        if change.is_new_document() {
            recording.main_frame_id.get_or_insert(change.frame_id);
            recording.documents.push(DocumentLoad {
                frame_id: change.frame_id,
                global_id: change.global_id,
                timestamp: change.timestamp,
                url: change.url().unwrap_or_default().to_string(),
                paint_index,
            });
        }
    }
    recording
}
