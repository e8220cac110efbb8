//! Offline reconstruction target.
//!
//! Nodes live in an arena and refer to each other by index, so the tree has
//! no reference cycles and a full reset is a bulk clear. Detached nodes stay
//! in the arena; they can be inserted again later.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Index of a node in a [`DomArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomNodeId(usize);

impl DomNodeId {
    /// Arena index
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// What a node is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomNodeKind {
    /// Document root
    Document,
    /// `<!DOCTYPE name>`
    Doctype { name: String },
    /// Element with attributes in insertion order
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
    },
    /// Text node
    Text(String),
    /// Comment
    Comment(String),
}

/// A node and its links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomNode {
    /// Node kind and payload
    pub kind: DomNodeKind,
    /// Parent, when attached
    pub parent: Option<DomNodeId>,
    /// Children in order
    pub children: Vec<DomNodeId>,
    /// DOM properties, values JSON-encoded (not serialized into HTML)
    pub properties: IndexMap<String, String>,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

/// Arena-backed DOM tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomArena {
    nodes: Vec<DomNode>,
}

impl DomArena {
    /// Empty arena
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Number of nodes ever created since the last clear
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a detached node
    pub fn create(&mut self, kind: DomNodeKind) -> DomNodeId {
        self.nodes.push(DomNode {
            kind,
            parent: None,
            children: Vec::new(),
            properties: IndexMap::new(),
        });
        DomNodeId(self.nodes.len() - 1)
    }

    /// Node lookup
    #[must_use]
    pub fn get(&self, id: DomNodeId) -> Option<&DomNode> {
        self.nodes.get(id.0)
    }

    fn get_mut(&mut self, id: DomNodeId) -> Option<&mut DomNode> {
        self.nodes.get_mut(id.0)
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    #[must_use]
    pub fn is_inclusive_ancestor(&self, ancestor: DomNodeId, node: DomNodeId) -> bool {
        let mut current = Some(node);
        for _ in 0..=self.nodes.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.get(id).and_then(|n| n.parent),
                None => return false,
            }
        }
        false
    }

    /// Insert `child` under `parent` right after `previous`
    ///
    /// Appends when `previous` is `None` or not a child of `parent`. The
    /// child is detached from wherever it was first. Returns `false` (and
    /// changes nothing) if either node is unknown or the insertion would
    /// create a cycle.
    pub fn insert_after(&mut self, parent: DomNodeId, previous: Option<DomNodeId>, child: DomNodeId) -> bool {
        if self.get(parent).is_none() || self.get(child).is_none() {
            return false;
        }
        if self.is_inclusive_ancestor(child, parent) {
            return false;
        }
        self.detach(child);
        let Some(parent_node) = self.get_mut(parent) else {
            return false;
        };
        let position = previous
            .and_then(|prev| parent_node.children.iter().position(|c| *c == prev))
            .map_or(parent_node.children.len(), |i| i + 1);
        parent_node.children.insert(position, child);
        if let Some(child_node) = self.get_mut(child) {
            child_node.parent = Some(parent);
        }
        true
    }

    /// Detach a node (and so its subtree) from its parent
    pub fn detach(&mut self, id: DomNodeId) {
        let Some(parent) = self.get_mut(id).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.retain(|c| *c != id);
        }
    }

    /// Set an attribute; returns `false` if the node is not an element
    pub fn set_attribute(&mut self, id: DomNodeId, name: &str, value: &str) -> bool {
        match self.get_mut(id).map(|n| &mut n.kind) {
            Some(DomNodeKind::Element { attributes, .. }) => {
                attributes.insert(name.to_string(), value.to_string());
                true
            }
            _ => false,
        }
    }

    /// Remove an attribute; returns `false` if the node is not an element
    pub fn remove_attribute(&mut self, id: DomNodeId, name: &str) -> bool {
        match self.get_mut(id).map(|n| &mut n.kind) {
            Some(DomNodeKind::Element { attributes, .. }) => {
                attributes.shift_remove(name);
                true
            }
            _ => false,
        }
    }

    /// Attribute value
    #[must_use]
    pub fn attribute(&self, id: DomNodeId, name: &str) -> Option<&str> {
        match self.get(id).map(|n| &n.kind) {
            Some(DomNodeKind::Element { attributes, .. }) => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Lowercase tag name of an element
    #[must_use]
    pub fn tag(&self, id: DomNodeId) -> Option<String> {
        match self.get(id).map(|n| &n.kind) {
            Some(DomNodeKind::Element { tag, .. }) => Some(tag.to_ascii_lowercase()),
            _ => None,
        }
    }

    /// Replace character data; returns `false` if the node is not text or a comment
    pub fn set_text(&mut self, id: DomNodeId, text: &str) -> bool {
        match self.get_mut(id).map(|n| &mut n.kind) {
            Some(DomNodeKind::Text(data) | DomNodeKind::Comment(data)) => {
                text.clone_into(data);
                true
            }
            _ => false,
        }
    }

    /// Set a DOM property; returns `false` if the node is unknown
    pub fn set_property(&mut self, id: DomNodeId, name: &str, json_value: &str) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.properties.insert(name.to_string(), json_value.to_string());
                true
            }
            None => false,
        }
    }

    /// Serialized node including itself
    #[must_use]
    pub fn outer_html(&self, id: DomNodeId) -> String {
        let mut out = String::new();
        self.write(vec![WriteStep::Open { id, raw_text: false }], &mut out);
        out
    }

    /// Serialized children of a node
    #[must_use]
    pub fn inner_html(&self, id: DomNodeId) -> String {
        let mut out = String::new();
        let mut stack = Vec::new();
        self.push_children(id, &mut stack);
        self.write(stack, &mut out);
        out
    }

    /// Queue the children of `id` so the first child is popped first
    fn push_children(&self, id: DomNodeId, stack: &mut Vec<WriteStep>) {
        let Some(node) = self.get(id) else {
            return;
        };
        let raw_text = match &node.kind {
            DomNodeKind::Element { tag, .. } => {
                RAW_TEXT_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
            }
            _ => false,
        };
        stack.extend(
            node.children
                .iter()
                .rev()
                .map(|&child| WriteStep::Open { id: child, raw_text }),
        );
    }

    // Iterative so that nesting depth is bounded by memory, not the call stack.
    fn write(&self, mut stack: Vec<WriteStep>, out: &mut String) {
        while let Some(step) = stack.pop() {
            let (id, raw_text) = match step {
                WriteStep::Close(tag) => {
                    out.push_str("</");
                    out.push_str(&tag);
                    out.push('>');
                    continue;
                }
                WriteStep::Open { id, raw_text } => (id, raw_text),
            };
            let Some(node) = self.get(id) else {
                continue;
            };
            match &node.kind {
                DomNodeKind::Document => self.push_children(id, &mut stack),
                DomNodeKind::Doctype { name } => {
                    out.push_str("<!DOCTYPE ");
                    out.push_str(name);
                    out.push('>');
                }
                DomNodeKind::Element { tag, attributes } => {
                    let tag = tag.to_ascii_lowercase();
                    out.push('<');
                    out.push_str(&tag);
                    for (name, value) in attributes {
                        out.push(' ');
                        out.push_str(name);
                        out.push_str("=\"");
                        escape_into(value, true, out);
                        out.push('"');
                    }
                    out.push('>');
                    if VOID_ELEMENTS.contains(&tag.as_str()) {
                        continue;
                    }
                    stack.push(WriteStep::Close(tag));
                    self.push_children(id, &mut stack);
                }
                DomNodeKind::Text(text) if raw_text => out.push_str(text),
                DomNodeKind::Text(text) => escape_into(text, false, out),
                DomNodeKind::Comment(text) => {
                    out.push_str("<!--");
                    out.push_str(text);
                    out.push_str("-->");
                }
            }
        }
    }
}

enum WriteStep {
    Open { id: DomNodeId, raw_text: bool },
    Close(String),
}

fn escape_into(value: &str, attribute_mode: bool, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if attribute_mode => out.push_str("&quot;"),
            '<' if !attribute_mode => out.push_str("&lt;"),
            '>' if !attribute_mode => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}
