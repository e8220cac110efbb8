//! Command and mouse timeline delivered by the live recorder.

use crate::error::{LogError, LogResult};
use serde::{Deserialize, Serialize};
use timelapse_core::{CommandId, TabId, Timestamp};

/// One user command (navigation, click, wait...) issued against a tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Command id
    pub id: CommandId,
    /// Tab the command ran against
    pub tab_id: TabId,
    /// Command name, e.g. `goto`
    pub name: String,
    /// When it started
    pub start: Timestamp,
    /// When it finished, if it did
    pub end: Option<Timestamp>,
}

/// Kind of captured mouse event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseEventKind {
    /// Pointer moved
    Move,
    /// Button pressed
    Down,
    /// Button released
    Up,
    /// Click
    Click,
    /// Wheel or scroll
    Scroll,
}

impl MouseEventKind {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Down => "down",
            Self::Up => "up",
            Self::Click => "click",
            Self::Scroll => "scroll",
        }
    }
}

/// One captured mouse position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseEvent {
    /// Tab the event happened in
    pub tab_id: TabId,
    /// Command running at the time
    pub command_id: CommandId,
    /// Capture time
    pub timestamp: Timestamp,
    /// Event kind
    pub kind: MouseEventKind,
    /// Page x coordinate
    pub page_x: i32,
    /// Page y coordinate
    pub page_y: i32,
}

/// Commands and mouse events of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimeline {
    /// Commands in issue order
    pub commands: Vec<CommandRecord>,
    /// Mouse events in capture order
    pub mouse_events: Vec<MouseEvent>,
}

impl SessionTimeline {
    /// Parse a timeline from JSON
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Timeline`] if the JSON does not describe a timeline
    pub fn from_json(json: &str) -> LogResult<Self> {
        serde_json::from_str(json).map_err(|e| LogError::Timeline {
            reason: e.to_string(),
        })
    }

    /// Commands of one tab, ordered by start time
    #[must_use]
    pub fn commands_for(&self, tab_id: TabId) -> Vec<&CommandRecord> {
        let mut commands: Vec<&CommandRecord> =
            self.commands.iter().filter(|c| c.tab_id == tab_id).collect();
        commands.sort_by_key(|c| (c.start, c.id));
        commands
    }

    /// Mouse events of one tab, ordered by timestamp
    #[must_use]
    pub fn mouse_events_for(&self, tab_id: TabId) -> Vec<MouseEvent> {
        let mut events: Vec<MouseEvent> = self
            .mouse_events
            .iter()
            .filter(|m| m.tab_id == tab_id)
            .cloned()
            .collect();
        events.sort_by_key(|m| m.timestamp);
        events
    }
}
