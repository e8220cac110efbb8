//! Navigable ticks over a recorded session.
//!
//! A tick is a point the UI can scrub to: the start of a user command, a
//! paint (a group of DOM changes observed together), or a mouse
//! interaction. Paints that load a new document into a tab's main frame are
//! navigation ticks. Commands and navigations are "major" ticks.
//!
//! The index is derived and read-only. It can be rebuilt at any time from
//! the session's records.

use crate::error::ReplayResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use timelapse_core::{CommandId, FrameId, GlobalId, SessionId, TabId, Timestamp};
use timelapse_log::{
    ChangeLogStore, DomChangeRecord, DomRecording, FrameHost, MouseEvent, SessionTimeline,
    to_dom_recording,
};
use timelapse_storage::{ResourceFilter, ResourceStore, ResourceSummary};

/// Tick kind, in tie-break order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TickEventType {
    /// Start of a user command
    Command,
    /// A group of DOM changes
    Paint,
    /// A mouse event
    Interaction,
}

impl TickEventType {
    /// Rank used to order ticks sharing a timestamp
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Command => 0,
            Self::Paint => 1,
            Self::Interaction => 2,
        }
    }
}

/// A navigable point in a tab's timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Command running at the tick
    pub command_id: CommandId,
    /// When it happened
    pub timestamp: Timestamp,
    /// Tick kind
    pub event_type: TickEventType,
    /// Command boundary or navigation
    pub is_major: bool,
    /// Paint that loads a new main-frame document
    pub is_new_document_tick: bool,
    /// Last change record visible at this tick
    pub change_range_end: GlobalId,
    /// Command name, navigation URL or mouse event kind
    pub label: String,
    /// Paint event of the tab's recording, for paint ticks
    pub paint_index: Option<usize>,
}

/// Everything a session recorded, as input to the index
#[derive(Debug, Clone, Default)]
pub struct RecordedSession {
    /// Session
    pub id: SessionId,
    /// Every change record, in global id order
    pub changes: Vec<DomChangeRecord>,
    /// Captured resources
    pub resources: Vec<ResourceSummary>,
    /// Commands and mouse events
    pub timeline: SessionTimeline,
    /// Iframe hosts of child frames
    pub frame_hosts: BTreeMap<FrameId, FrameHost>,
}

impl RecordedSession {
    /// Read a session from its stores
    ///
    /// # Errors
    ///
    /// Returns error if either store cannot be read
    pub fn load(
        id: SessionId,
        log: &ChangeLogStore,
        resources: &ResourceStore,
        timeline: SessionTimeline,
    ) -> ReplayResult<Self> {
        Ok(Self {
            id,
            changes: log.all()?,
            resources: resources.filter(ResourceFilter::default())?,
            timeline,
            frame_hosts: BTreeMap::new(),
        })
    }

    /// Set the iframe hosts of child frames
    #[must_use]
    pub fn with_frame_hosts(mut self, frame_hosts: BTreeMap<FrameId, FrameHost>) -> Self {
        self.frame_hosts = frame_hosts;
        self
    }

    /// Tabs with records or commands, in order of first appearance
    #[must_use]
    pub fn tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = Vec::new();
        let seen = self
            .changes
            .iter()
            .map(|c| c.tab_id)
            .chain(self.timeline.commands.iter().map(|c| c.tab_id));
        for tab in seen {
            if !tabs.contains(&tab) {
                tabs.push(tab);
            }
        }
        tabs
    }

    /// Change records of one tab
    #[must_use]
    pub fn changes_for(&self, tab_id: TabId) -> Vec<DomChangeRecord> {
        self.changes
            .iter()
            .filter(|c| c.tab_id == tab_id)
            .cloned()
            .collect()
    }
}

/// Ticks and recording of one tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabTicks {
    /// Tab
    pub tab_id: TabId,
    /// Ticks in timeline order
    pub ticks: Vec<Tick>,
    /// Paint-grouped changes of the tab
    pub dom_recording: DomRecording,
    /// Resources the tab loaded
    pub resources: Vec<ResourceSummary>,
}

impl TabTicks {
    /// Major ticks only
    pub fn majors(&self) -> impl Iterator<Item = &Tick> {
        self.ticks.iter().filter(|t| t.is_major)
    }

    /// Captured mouse positions
    #[must_use]
    pub fn mouse_events(&self) -> &[MouseEvent] {
        &self.dom_recording.mouse_events
    }
}

/// Per-tab tick sequences of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickIndex {
    /// Session
    pub session_id: SessionId,
    /// One entry per tab
    pub tabs: Vec<TabTicks>,
}

impl TickIndex {
    /// Derive the ticks of every tab
    #[must_use]
    pub fn build(session: &RecordedSession) -> Self {
        let tabs = session
            .tabs()
            .into_iter()
            .map(|tab_id| build_tab(session, tab_id))
            .collect();
        Self {
            session_id: session.id,
            tabs,
        }
    }

    /// Ticks of one tab
    #[must_use]
    pub fn tab(&self, tab_id: TabId) -> Option<&TabTicks> {
        self.tabs.iter().find(|t| t.tab_id == tab_id)
    }
}

fn build_tab(session: &RecordedSession, tab_id: TabId) -> TabTicks {
    let changes = session.changes_for(tab_id);
    let dom_recording = to_dom_recording(&changes, None, &session.frame_hosts)
        .with_mouse_events(session.timeline.mouse_events_for(tab_id));
    let visible = VisibleChanges::new(&changes);

    let mut ticks = Vec::new();
    for command in session.timeline.commands_for(tab_id) {
        ticks.push(Tick {
            command_id: command.id,
            timestamp: command.start,
            event_type: TickEventType::Command,
            is_major: true,
            is_new_document_tick: false,
            change_range_end: visible.at(command.start),
            label: command.name.clone(),
            paint_index: None,
        });
    }

    for (index, paint) in dom_recording.paint_events.iter().enumerate() {
        let navigation = dom_recording
            .main_frame_id
            .is_some_and(|main| paint.loads_document_in(main));
        let label = if navigation {
            paint
                .changes
                .iter()
                .find(|c| c.is_new_document() && Some(c.frame_id) == dom_recording.main_frame_id)
                .and_then(DomChangeRecord::url)
                .unwrap_or_default()
                .to_string()
        } else {
            format!("{} changes", paint.changes.len())
        };
        ticks.push(Tick {
            command_id: paint.command_id,
            timestamp: paint.timestamp,
            event_type: TickEventType::Paint,
            is_major: navigation,
            is_new_document_tick: navigation,
            change_range_end: paint.last_global_id,
            label,
            paint_index: Some(index),
        });
    }

    for mouse in &dom_recording.mouse_events {
        ticks.push(Tick {
            command_id: mouse.command_id,
            timestamp: mouse.timestamp,
            event_type: TickEventType::Interaction,
            is_major: false,
            is_new_document_tick: false,
            change_range_end: visible.at(mouse.timestamp),
            label: mouse.kind.as_str().to_string(),
            paint_index: None,
        });
    }

    // Stable: ticks of one kind keep their source order within a timestamp.
    ticks.sort_by_key(|t| (t.timestamp, t.event_type.rank()));

    let resources = session
        .resources
        .iter()
        .filter(|r| r.tab_id == tab_id)
        .cloned()
        .collect();

    TabTicks {
        tab_id,
        ticks,
        dom_recording,
        resources,
    }
}

/// Largest global id observed at or before an instant
struct VisibleChanges {
    by_time: Vec<(Timestamp, GlobalId)>,
}

impl VisibleChanges {
    fn new(changes: &[DomChangeRecord]) -> Self {
        let mut by_time: Vec<(Timestamp, GlobalId)> =
            changes.iter().map(|c| (c.timestamp, c.global_id)).collect();
        by_time.sort();
        let mut running = GlobalId::UNASSIGNED;
        for entry in &mut by_time {
            running = running.max(entry.1);
            entry.1 = running;
        }
        Self { by_time }
    }

    fn at(&self, timestamp: Timestamp) -> GlobalId {
        let count = self.by_time.partition_point(|(t, _)| *t <= timestamp);
        count
            .checked_sub(1)
            .map_or(GlobalId::UNASSIGNED, |i| self.by_time[i].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use timelapse_log::{CommandRecord, DomAction, MouseEventKind, NodeType};
    use timelapse_core::NodeId;

    struct SessionBuilder {
        session: RecordedSession,
        next: u64,
    }

    impl SessionBuilder {
        fn new() -> Self {
            Self {
                session: RecordedSession::default(),
                next: 1,
            }
        }

        fn change(&mut self, tab: u32, frame: u32, command: u32, at: u64, record: DomChangeRecord) -> &mut Self {
            let mut record = record.with_global_id(GlobalId::new(self.next));
            record.tab_id = TabId::new(tab);
            record.frame_id = FrameId::new(frame);
            record.command_id = CommandId::new(command);
            record.timestamp = Timestamp::from_millis(at);
            self.next += 1;
            self.session.changes.push(record);
            self
        }

        fn document(&mut self, tab: u32, frame: u32, command: u32, at: u64, url: &str) -> &mut Self {
            let record = DomChangeRecord::new_document(
                TabId::new(tab),
                FrameId::new(frame),
                CommandId::new(command),
                Timestamp::MIN,
                NodeId::new(1),
                url,
            );
            self.change(tab, frame, command, at, record)
        }

        fn element(&mut self, tab: u32, frame: u32, command: u32, at: u64, node: u32, parent: u32) -> &mut Self {
            let record = DomChangeRecord::new(
                TabId::new(tab),
                FrameId::new(frame),
                CommandId::new(command),
                Timestamp::MIN,
                DomAction::Added,
                NodeId::new(node),
            )
            .with_node_type(NodeType::Element)
            .with_tag("div")
            .with_parent(NodeId::new(parent), None);
            self.change(tab, frame, command, at, record)
        }

        fn command(&mut self, tab: u32, id: u32, name: &str, start: u64) -> &mut Self {
            self.session.timeline.commands.push(CommandRecord {
                id: CommandId::new(id),
                tab_id: TabId::new(tab),
                name: name.to_string(),
                start: Timestamp::from_millis(start),
                end: Some(Timestamp::from_millis(start + 5)),
            });
            self
        }

        fn mouse(&mut self, tab: u32, command: u32, at: u64) -> &mut Self {
            self.session.timeline.mouse_events.push(MouseEvent {
                tab_id: TabId::new(tab),
                command_id: CommandId::new(command),
                timestamp: Timestamp::from_millis(at),
                kind: MouseEventKind::Click,
                page_x: 1,
                page_y: 2,
            });
            self
        }
    }

    /// goto, waitForLoad, click, waitForElement against one page
    fn four_command_session() -> RecordedSession {
        let mut b = SessionBuilder::new();
        b.command(1, 1, "goto", 100)
            .document(1, 1, 1, 110, "https://a.test/")
            .element(1, 1, 1, 110, 2, 1)
            .command(1, 2, "waitForLoad", 120)
            .element(1, 1, 2, 130, 3, 2)
            .command(1, 3, "click", 140)
            .mouse(1, 3, 145)
            .element(1, 1, 3, 150, 4, 2)
            .command(1, 4, "waitForElement", 160)
            .element(1, 1, 4, 170, 5, 2);
        b.session.clone()
    }

    #[test]
    fn test_one_navigation_and_four_commands_gives_five_majors() {
        let index = TickIndex::build(&four_command_session());
        assert_eq!(index.tabs.len(), 1);
        let tab = &index.tabs[0];

        assert_eq!(tab.majors().count(), 5);
        assert_eq!(
            tab.ticks
                .iter()
                .filter(|t| t.event_type == TickEventType::Command)
                .count(),
            4
        );
        assert_eq!(tab.ticks.iter().filter(|t| t.is_new_document_tick).count(), 1);
        assert_eq!(tab.dom_recording.paint_events.len(), 4);
        assert_eq!(tab.mouse_events().len(), 1);

        let navigation = tab.ticks.iter().find(|t| t.is_new_document_tick).unwrap();
        assert_eq!(navigation.label, "https://a.test/");
        assert_eq!(navigation.change_range_end, GlobalId::new(2));
    }

    #[test]
    fn test_change_range_end_by_timestamp() {
        let index = TickIndex::build(&four_command_session());
        let tab = &index.tabs[0];
        let ends: Vec<(String, u64)> = tab
            .ticks
            .iter()
            .map(|t| (t.label.clone(), t.change_range_end.get()))
            .collect();
        assert_eq!(ends[0], ("goto".to_string(), 0));
        assert!(ends.contains(&("waitForLoad".to_string(), 2)));
        assert!(ends.contains(&("click".to_string(), 3)));
        assert!(ends.contains(&("waitForElement".to_string(), 4)));
        assert_eq!(ends.last().unwrap().1, 5);
    }

    #[test]
    fn test_equal_timestamps_tie_break() {
        let mut b = SessionBuilder::new();
        b.mouse(1, 1, 100)
            .document(1, 1, 1, 100, "https://a.test/")
            .command(1, 1, "goto", 100);
        let index = TickIndex::build(&b.session);
        let kinds: Vec<TickEventType> = index.tabs[0].ticks.iter().map(|t| t.event_type).collect();
        assert_eq!(
            kinds,
            vec![TickEventType::Command, TickEventType::Paint, TickEventType::Interaction]
        );
        // Interaction at the same instant is not major even though it sorts last.
        assert!(!index.tabs[0].ticks[2].is_major);
    }

    #[test]
    fn test_child_frame_documents_are_plain_paints() {
        let mut b = SessionBuilder::new();
        b.document(1, 1, 1, 100, "https://a.test/")
            .document(1, 2, 1, 200, "https://ads.test/frame")
            .document(1, 1, 2, 300, "https://a.test/next");
        let index = TickIndex::build(&b.session);
        let tab = &index.tabs[0];
        let navigations: Vec<&str> = tab
            .ticks
            .iter()
            .filter(|t| t.is_new_document_tick)
            .map(|t| t.label.as_str())
            .collect();
        assert_eq!(navigations, vec!["https://a.test/", "https://a.test/next"]);
        assert_eq!(tab.ticks.len(), 3);
    }

    #[test]
    fn test_tabs_are_separate() {
        let mut b = SessionBuilder::new();
        b.document(1, 1, 1, 100, "https://a.test/")
            .document(2, 5, 2, 150, "https://b.test/")
            .element(1, 1, 1, 160, 2, 1)
            .command(2, 2, "goto", 140);
        let index = TickIndex::build(&b.session);
        assert_eq!(index.tabs.len(), 2);

        let second = index.tab(TabId::new(2)).unwrap();
        assert_eq!(second.ticks.len(), 2);
        assert_eq!(second.ticks[1].change_range_end, GlobalId::new(2));
        assert!(second.dom_recording.changes().all(|c| c.tab_id == TabId::new(2)));
        assert!(index.tab(TabId::new(3)).is_none());
    }

    #[test]
    fn test_record_only_session_has_no_command_ticks() {
        let mut b = SessionBuilder::new();
        b.document(1, 1, 1, 100, "https://a.test/");
        let index = TickIndex::build(&b.session);
        assert_eq!(index.tabs[0].majors().count(), 1);
        assert!(TickIndex::build(&RecordedSession::default()).tabs.is_empty());
    }

    proptest! {
        #[test]
        fn prop_ticks_are_totally_ordered(
            paints in proptest::collection::vec(0u64..50, 1..20),
            commands in proptest::collection::vec(0u64..50, 0..6),
            mice in proptest::collection::vec(0u64..50, 0..6),
        ) {
            let mut b = SessionBuilder::new();
            let mut paints = paints;
            paints.sort_unstable();
            b.document(1, 1, 1, paints[0], "https://a.test/");
            for (i, at) in paints.iter().enumerate().skip(1) {
                b.element(1, 1, 1, *at, i as u32 + 1, 1);
            }
            for (i, at) in commands.iter().enumerate() {
                b.command(1, i as u32 + 1, "cmd", *at);
            }
            for at in &mice {
                b.mouse(1, 1, *at);
            }
            let index = TickIndex::build(&b.session);
            let ticks = &index.tabs[0].ticks;
            for pair in ticks.windows(2) {
                prop_assert!(
                    (pair[0].timestamp, pair[0].event_type.rank())
                        <= (pair[1].timestamp, pair[1].event_type.rank())
                );
            }
            prop_assert_eq!(
                index.tabs[0].majors().count(),
                commands.len() + 1
            );
        }
    }
}
