//! Live-page oracle for replay tests.
//!
//! [`LivePage`] mutates its own DOM directly and emits the change records a
//! recorder would have captured for each mutation. Reconstructed output is
//! compared against what the live page serialized after every step.

use crate::config::ReplayConfig;
use crate::context::MirrorContext;
use crate::diff::DomDivergence;
use crate::dom::{DomArena, DomNodeId, DomNodeKind};
use crate::reconstructor::{LoadMode, StateReconstructor};
use crate::ticks::Tick;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use timelapse_core::{CommandId, FrameId, GlobalId, NodeId, SessionId, TabId, Timestamp};
use timelapse_log::{ChangeLogStore, CommandRecord, DomAction, DomChangeRecord, NodeType, SessionTimeline};
use timelapse_storage::{ResourceStore, SessionDb, StoreConfig};

pub(crate) struct LivePage {
    tab_id: TabId,
    frame_id: FrameId,
    command_id: CommandId,
    now: Timestamp,
    arena: DomArena,
    nodes: HashMap<NodeId, DomNodeId>,
    next_node: u32,
    document: Option<DomNodeId>,
    pending: Vec<DomChangeRecord>,
}

impl LivePage {
    pub(crate) fn new(tab: u32, frame: u32) -> Self {
        Self {
            tab_id: TabId::new(tab),
            frame_id: FrameId::new(frame),
            command_id: CommandId::new(1),
            now: Timestamp::MIN,
            arena: DomArena::new(),
            nodes: HashMap::new(),
            next_node: 0,
            document: None,
            pending: Vec::new(),
        }
    }

    pub(crate) fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub(crate) fn at(&mut self, millis: u64) -> &mut Self {
        self.now = Timestamp::from_millis(millis);
        self
    }

    pub(crate) fn command(&mut self, id: u32) -> &mut Self {
        self.command_id = CommandId::new(id);
        self
    }

    fn record(&self, action: DomAction, node: NodeId) -> DomChangeRecord {
        DomChangeRecord::new(self.tab_id, self.frame_id, self.command_id, self.now, action, node)
    }

    fn allocate(&mut self, kind: DomNodeKind) -> (NodeId, DomNodeId) {
        self.next_node += 1;
        let id = NodeId::new(self.next_node);
        let dom = self.arena.create(kind);
        self.nodes.insert(id, dom);
        (id, dom)
    }

    fn dom(&self, node: NodeId) -> DomNodeId {
        self.nodes[&node]
    }

    fn attach(&mut self, parent: NodeId, previous: Option<NodeId>, dom: DomNodeId) {
        let previous = previous.map(|p| self.dom(p));
        assert!(self.arena.insert_after(self.dom(parent), previous, dom));
    }

    pub(crate) fn navigate(&mut self, url: &str) -> NodeId {
        let (id, dom) = self.allocate(DomNodeKind::Document);
        self.nodes.retain(|_, d| *d == dom);
        self.document = Some(dom);
        self.pending.push(DomChangeRecord::new_document(
            self.tab_id,
            self.frame_id,
            self.command_id,
            self.now,
            id,
            url,
        ));
        id
    }

    pub(crate) fn doctype(&mut self, parent: NodeId) -> NodeId {
        let (id, dom) = self.allocate(DomNodeKind::Doctype {
            name: "html".to_string(),
        });
        self.attach(parent, None, dom);
        let record = self
            .record(DomAction::Added, id)
            .with_node_type(NodeType::Doctype)
            .with_tag("html")
            .with_parent(parent, None);
        self.pending.push(record);
        id
    }

    pub(crate) fn element(&mut self, parent: NodeId, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        self.insert_element(parent, None, tag, attributes)
    }

    pub(crate) fn element_after(
        &mut self,
        parent: NodeId,
        previous: NodeId,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> NodeId {
        self.insert_element(parent, Some(previous), tag, attributes)
    }

    fn insert_element(
        &mut self,
        parent: NodeId,
        previous: Option<NodeId>,
        tag: &str,
        attributes: &[(&str, &str)],
    ) -> NodeId {
        let (id, dom) = self.allocate(DomNodeKind::Element {
            tag: tag.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self.attach(parent, previous, dom);
        let mut record = self
            .record(DomAction::Added, id)
            .with_node_type(NodeType::Element)
            .with_tag(tag)
            .with_parent(parent, previous);
        for (name, value) in attributes {
            record = record.with_attribute(name, value);
        }
        self.pending.push(record);
        id
    }

    pub(crate) fn text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let (id, dom) = self.allocate(DomNodeKind::Text(text.to_string()));
        self.attach(parent, None, dom);
        let record = self
            .record(DomAction::Added, id)
            .with_node_type(NodeType::Text)
            .with_text(text)
            .with_parent(parent, None);
        self.pending.push(record);
        id
    }

    pub(crate) fn remove(&mut self, node: NodeId) {
        self.arena.detach(self.dom(node));
        self.pending.push(self.record(DomAction::Removed, node));
    }

    /// Remove then re-add, the way a recorder sees a move
    pub(crate) fn move_to(&mut self, node: NodeId, parent: NodeId, previous: Option<NodeId>) {
        self.remove(node);
        let dom = self.dom(node);
        self.attach(parent, previous, dom);
        let mut record = self.record(DomAction::Added, node).with_parent(parent, previous);
        if let Some(DomNodeKind::Element { tag, attributes }) = self.arena.get(dom).map(|n| &n.kind) {
            record = record.with_node_type(NodeType::Element).with_tag(tag);
            for (name, value) in attributes {
                record = record.with_attribute(name, value);
            }
        }
        self.pending.push(record);
    }

    pub(crate) fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        assert!(self.arena.set_attribute(self.dom(node), name, value));
        let record = self.record(DomAction::Attribute, node).with_attribute(name, value);
        self.pending.push(record);
    }

    pub(crate) fn remove_attribute(&mut self, node: NodeId, name: &str) {
        assert!(self.arena.remove_attribute(self.dom(node), name));
        let record = self.record(DomAction::Attribute, node).without_attribute(name);
        self.pending.push(record);
    }

    pub(crate) fn set_text(&mut self, node: NodeId, text: &str) {
        assert!(self.arena.set_text(self.dom(node), text));
        self.pending.push(self.record(DomAction::Text, node).with_text(text));
    }

    pub(crate) fn set_property(&mut self, node: NodeId, name: &str, json_value: &str) {
        assert!(self.arena.set_property(self.dom(node), name, json_value));
        let record = self.record(DomAction::Property, node).with_property(name, json_value);
        self.pending.push(record);
    }

    pub(crate) fn drain(&mut self) -> Vec<DomChangeRecord> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn html(&self) -> String {
        self.document
            .map(|doc| self.arena.outer_html(doc))
            .unwrap_or_default()
    }
}

/// Change log plus the live HTML after every recorded step
pub(crate) struct LiveSession {
    db: SessionDb,
    log: ChangeLogStore,
    timeline: SessionTimeline,
    expected: HashMap<TabId, Vec<(GlobalId, String)>>,
}

impl LiveSession {
    pub(crate) fn new() -> Self {
        let db = SessionDb::in_memory().unwrap();
        let log = ChangeLogStore::open(&db, &StoreConfig::default()).unwrap();
        Self {
            db,
            log,
            timeline: SessionTimeline::default(),
            expected: HashMap::new(),
        }
    }

    pub(crate) fn step(&mut self, page: &mut LivePage) {
        self.log.append_all(page.drain()).unwrap();
        self.expected
            .entry(page.tab_id())
            .or_default()
            .push((self.log.last_global_id(), page.html()));
    }

    pub(crate) fn command(&mut self, page: &LivePage, id: u32, name: &str, start: u64) {
        self.timeline.commands.push(CommandRecord {
            id: CommandId::new(id),
            tab_id: page.tab_id(),
            name: name.to_string(),
            start: Timestamp::from_millis(start),
            end: None,
        });
    }

    pub(crate) fn context(&self) -> MirrorContext {
        let resources = Arc::new(ResourceStore::new(&self.db, &StoreConfig::default()));
        MirrorContext::open(
            SessionId::new(),
            &self.log,
            resources,
            self.timeline.clone(),
            ReplayConfig::default(),
        )
        .unwrap()
    }

    /// Live HTML of `tab` once every record up to `end` was applied
    pub(crate) fn expected_at(&self, tab: TabId, end: GlobalId) -> String {
        self.expected
            .get(&tab)
            .and_then(|steps| steps.iter().rev().find(|(last, _)| *last <= end))
            .map(|(_, html)| html.clone())
            .unwrap_or_default()
    }

    pub(crate) fn assert_matches(&self, tab: TabId, replay: &mut StateReconstructor, tick: &Tick) {
        replay.load(Some(tick)).unwrap();
        let expected = self.expected_at(tab, tick.change_range_end);
        if let Some(divergence) = DomDivergence::compare(&expected, &replay.outer_html(None)) {
            panic!("{tab} at {} ({}): {divergence}", tick.change_range_end, tick.label);
        }
    }
}

/// List, input and anchor edits over one page
fn list_input_anchor_session() -> (LiveSession, TabId) {
    let mut session = LiveSession::new();
    let mut page = LivePage::new(1, 1);

    session.command(&page, 1, "goto", 5);
    page.at(10);
    let doc = page.navigate("https://shop.test/list");
    page.doctype(doc);
    let html = page.element(doc, "html", &[("lang", "en")]);
    let body = page.element(html, "body", &[]);
    session.step(&mut page);

    page.at(20);
    let list = page.element(body, "ul", &[("id", "items")]);
    let first = page.element(list, "li", &[]);
    let first_text = page.text(first, "apples");
    let second = page.element_after(list, first, "li", &[]);
    page.text(second, "pears & plums");
    let third = page.element_after(list, second, "li", &[("class", "last")]);
    page.text(third, "figs");
    session.step(&mut page);

    session.command(&page, 2, "type", 25);
    page.command(2).at(30);
    let input = page.element(body, "input", &[("type", "text"), ("name", "q")]);
    page.set_property(input, "value", "\"fig\"");
    session.step(&mut page);

    page.at(40);
    let anchor = page.element(body, "a", &[("href", "/cart"), ("title", "Say \"hi\"")]);
    page.text(anchor, "cart <3");
    session.step(&mut page);

    session.command(&page, 3, "click", 45);
    page.command(3).at(50);
    page.remove(second);
    let moved_to = page.element(body, "div", &[("class", "basket")]);
    page.move_to(third, moved_to, None);
    session.step(&mut page);

    page.at(60);
    page.set_attribute(list, "class", "short");
    page.remove_attribute(anchor, "href");
    page.set_text(first_text, "green apples");
    // The removed item comes back at the end of the list.
    page.move_to(second, list, None);
    session.step(&mut page);

    page.at(70);
    page.element(body, "script", &[]);
    let style = page.element(body, "style", &[]);
    page.text(style, "li > a { color: red }");
    session.step(&mut page);

    (session, TabId::new(1))
}

#[test]
fn test_reconstruction_matches_live_page_forward() {
    let (session, tab) = list_input_anchor_session();
    let context = session.context();
    let index = context.tick_index();
    let ticks = &index.tab(tab).unwrap().ticks;
    assert!(ticks.len() >= 10);

    let mut replay = context.reconstructor(tab).unwrap();
    for tick in ticks {
        session.assert_matches(tab, &mut replay, tick);
    }
    assert!(replay.skipped().is_empty());
    assert_eq!(replay.document_url(None), Some("https://shop.test/list"));
}

#[test]
fn test_reconstruction_matches_live_page_in_any_order() {
    let (session, tab) = list_input_anchor_session();
    let context = session.context();
    let index = context.tick_index();
    let ticks = &index.tab(tab).unwrap().ticks;

    let mut replay = context.reconstructor(tab).unwrap();
    for tick in ticks.iter().rev() {
        session.assert_matches(tab, &mut replay, tick);
    }
    let n = ticks.len();
    for i in (0..n).map(|i| (i * 7 + 3) % n) {
        session.assert_matches(tab, &mut replay, &ticks[i]);
    }
}

#[test]
fn test_final_state_serialization() {
    let (session, tab) = list_input_anchor_session();
    let mut replay = session.context().reconstructor(tab).unwrap();
    replay.load(None).unwrap();
    assert_eq!(
        replay.outer_html(None),
        "<!DOCTYPE html><html lang=\"en\"><body>\
         <ul id=\"items\" class=\"short\"><li>green apples</li><li>pears &amp; plums</li></ul>\
         <input type=\"text\" name=\"q\">\
         <a title=\"Say &quot;hi&quot;\">cart &lt;3</a>\
         <div class=\"basket\"><li class=\"last\">figs</li></div>\
         <script></script><style>li > a { color: red }</style>\
         </body></html>"
    );
    assert_eq!(
        replay.outer_html(None),
        session.expected_at(tab, GlobalId::new(u64::MAX))
    );
}

#[test]
fn test_loading_a_tick_twice_is_idempotent() {
    let (session, tab) = list_input_anchor_session();
    let context = session.context();
    let index = context.tick_index();
    let ticks = &index.tab(tab).unwrap().ticks;
    let middle = &ticks[ticks.len() / 2];

    let mut replay = context.reconstructor(tab).unwrap();
    replay.load(Some(middle)).unwrap();
    let (html, digest) = (replay.outer_html(None), replay.digest());
    assert_eq!(replay.load(Some(middle)).unwrap().mode, LoadMode::Unchanged);
    assert_eq!(replay.outer_html(None), html);
    assert_eq!(replay.digest(), digest);

    // Same tick reached by a rewind from the end.
    replay.load(None).unwrap();
    assert_eq!(replay.load(Some(middle)).unwrap().mode, LoadMode::Reset);
    assert_eq!(replay.digest(), digest);

    let mut fresh = context.reconstructor(tab).unwrap();
    fresh.load(Some(middle)).unwrap();
    assert_eq!(fresh.digest(), digest);
}

#[test]
fn test_tabs_are_reconstructed_in_isolation() {
    let mut session = LiveSession::new();
    let mut first = LivePage::new(1, 1);
    let mut second = LivePage::new(2, 2);

    first.at(10);
    let doc = first.navigate("https://a.test/");
    let body_a = first.element(doc, "body", &[("data-tab", "1")]);
    session.step(&mut first);

    // A tab opened mid-session, reusing the same node ids.
    second.at(15);
    let doc_b = second.navigate("https://b.test/popup");
    let body_b = second.element(doc_b, "body", &[("data-tab", "2")]);
    session.step(&mut second);

    first.at(20);
    first.element(body_a, "p", &[("data-tab", "1")]);
    session.step(&mut first);

    second.at(25);
    second.element(body_b, "p", &[("data-tab", "2")]);
    second.set_attribute(body_b, "class", "popup");
    session.step(&mut second);

    let context = session.context();
    let index = context.tick_index();
    for (tab, foreign) in [(TabId::new(1), "data-tab=\"2\""), (TabId::new(2), "data-tab=\"1\"")] {
        let mut replay = context.reconstructor(tab).unwrap();
        for tick in &index.tab(tab).unwrap().ticks {
            session.assert_matches(tab, &mut replay, tick);
            assert!(!replay.outer_html(None).contains(foreign));
        }
        assert!(replay.skipped().is_empty());
    }
}

proptest! {
    #[test]
    fn prop_reparented_node_keeps_attributes(
        attributes in proptest::collection::vec(("[a-z]{1,6}", "[a-z0-9 ]{0,8}"), 0..4),
        siblings in 0usize..4,
        position in 0usize..5,
        text in "[a-z]{0,10}",
    ) {
        let mut session = LiveSession::new();
        let mut page = LivePage::new(1, 1);
        page.at(10);
        let doc = page.navigate("https://a.test/");
        let body = page.element(doc, "body", &[]);
        let from = page.element(body, "div", &[("id", "a")]);
        let to = page.element(body, "div", &[("id", "b")]);
        let spans: Vec<NodeId> = (0..siblings).map(|_| page.element(to, "span", &[])).collect();
        let names: Vec<(String, String)> = attributes
            .iter()
            .map(|(name, value)| (format!("data-{name}"), value.clone()))
            .collect();
        let borrowed: Vec<(&str, &str)> = names.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
        let node = page.element(from, "section", &borrowed);
        page.text(node, &text);
        session.step(&mut page);

        page.at(20);
        let previous = position.checked_sub(1).and_then(|i| spans.get(i.min(siblings.saturating_sub(1))).copied());
        page.move_to(node, to, previous);
        session.step(&mut page);

        let context = session.context();
        let index = context.tick_index();
        let ticks = &index.tab(TabId::new(1)).unwrap().ticks;
        prop_assert_eq!(ticks.len(), 2);

        let mut replay = context.reconstructor(TabId::new(1)).unwrap();
        for tick in ticks.iter().chain(ticks.iter().rev()) {
            replay.load(Some(tick)).unwrap();
            prop_assert_eq!(
                replay.outer_html(None),
                session.expected_at(TabId::new(1), tick.change_range_end)
            );
        }
        replay.load(None).unwrap();
        let html = replay.outer_html(None);
        prop_assert!(html.contains("<div id=\"a\"></div>"));
        prop_assert_eq!(html.matches("<section").count(), 1);
        for (name, _) in &names {
            prop_assert!(html.contains(name.as_str()));
        }
    }
}
