//! DOM change records as captured by the in-page recorder.

use serde::{Deserialize, Serialize};
use timelapse_core::{CommandId, FrameId, GlobalId, NodeId, TabId, Timestamp};
use timelapse_storage::Row;

/// Kind of DOM mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomAction {
    /// A frame loaded a fresh document; `text` carries its URL
    NewDocument,
    /// Same-document navigation; `text` carries the new URL
    Location,
    /// Node inserted under `parent_id` after `previous_sibling_id`
    Added,
    /// Node detached from its parent
    Removed,
    /// Character data changed
    Text,
    /// Attributes set or removed
    Attribute,
    /// DOM properties (e.g. `value`, `checked`) changed
    Property,
}

impl DomAction {
    /// Whether the action changes the shape of the tree
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(self, Self::NewDocument | Self::Added | Self::Removed)
    }

    /// Whether the action edits a node that must already be tracked
    #[must_use]
    pub const fn edits_existing_node(self) -> bool {
        matches!(self, Self::Removed | Self::Text | Self::Attribute | Self::Property)
    }

    /// Short lowercase name, for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewDocument => "newDocument",
            Self::Location => "location",
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Text => "text",
            Self::Attribute => "attribute",
            Self::Property => "property",
        }
    }
}

impl std::fmt::Display for DomAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DOM node type of the node a record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Document root
    Document,
    /// `<!DOCTYPE>`
    Doctype,
    /// Element
    Element,
    /// Text node
    Text,
    /// Comment
    Comment,
}

/// Node payload carried by a change record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    /// Tag name (elements) or doctype name
    pub tag: Option<String>,
    /// Attribute changes in order; `None` removes the attribute
    pub attributes: Vec<(String, Option<String>)>,
    /// Property changes in order, values JSON-encoded
    pub properties: Vec<(String, String)>,
    /// Text content, or the URL for document records
    pub text: Option<String>,
    /// Parent node
    pub parent_id: Option<NodeId>,
    /// Sibling the node was inserted after
    pub previous_sibling_id: Option<NodeId>,
}

/// One atomic DOM mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomChangeRecord {
    /// Position in the session-wide log (unassigned until appended)
    pub global_id: GlobalId,
    /// Tab the mutation happened in
    pub tab_id: TabId,
    /// Frame the mutation happened in
    pub frame_id: FrameId,
    /// Command running at the time
    pub command_id: CommandId,
    /// When the recorder observed it
    pub timestamp: Timestamp,
    /// Mutation kind
    pub action: DomAction,
    /// Node the mutation applies to
    pub node_id: NodeId,
    /// Type of that node, when the recorder reports it
    pub node_type: Option<NodeType>,
    /// Mutation payload
    pub data: NodeData,
}

impl Row for DomChangeRecord {
    fn row_id(&self) -> u64 {
        self.global_id.get()
    }
}

impl DomChangeRecord {
    /// Create an unassigned record with an empty payload
    #[must_use]
    pub fn new(
        tab_id: TabId,
        frame_id: FrameId,
        command_id: CommandId,
        timestamp: Timestamp,
        action: DomAction,
        node_id: NodeId,
    ) -> Self {
        Self {
            global_id: GlobalId::UNASSIGNED,
            tab_id,
            frame_id,
            command_id,
            timestamp,
            action,
            node_id,
            node_type: None,
            data: NodeData::default(),
        }
    }

    /// A frame loading `url` with `node_id` as its document node
    #[must_use]
    pub fn new_document(
        tab_id: TabId,
        frame_id: FrameId,
        command_id: CommandId,
        timestamp: Timestamp,
        node_id: NodeId,
        url: &str,
    ) -> Self {
        Self::new(tab_id, frame_id, command_id, timestamp, DomAction::NewDocument, node_id)
            .with_node_type(NodeType::Document)
            .with_text(url)
    }

    /// Set the global id
    #[must_use]
    pub fn with_global_id(mut self, global_id: GlobalId) -> Self {
        self.global_id = global_id;
        self
    }

    /// Set the node type
    #[must_use]
    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    /// Set the tag (or doctype) name
    #[must_use]
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.data.tag = Some(tag.to_string());
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.data.attributes.push((name.to_string(), Some(value.to_string())));
        self
    }

    /// Remove an attribute
    #[must_use]
    pub fn without_attribute(mut self, name: &str) -> Self {
        self.data.attributes.push((name.to_string(), None));
        self
    }

    /// Set a property to a JSON-encoded value
    #[must_use]
    pub fn with_property(mut self, name: &str, json_value: &str) -> Self {
        self.data.properties.push((name.to_string(), json_value.to_string()));
        self
    }

    /// Set the text payload
    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        self.data.text = Some(text.to_string());
        self
    }

    /// Set the insertion point
    #[must_use]
    pub fn with_parent(mut self, parent_id: NodeId, previous_sibling_id: Option<NodeId>) -> Self {
        self.data.parent_id = Some(parent_id);
        self.data.previous_sibling_id = previous_sibling_id;
        self
    }

    /// Whether this record starts a new document in its frame
    #[must_use]
    pub fn is_new_document(&self) -> bool {
        self.action == DomAction::NewDocument
    }

    /// URL carried by a document or location record
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self.action {
            DomAction::NewDocument | DomAction::Location => self.data.text.as_deref(),
            _ => None,
        }
    }
}
