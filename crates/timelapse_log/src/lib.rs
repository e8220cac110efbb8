//! Timelapse Change Log
//!
//! The ordered, durable log of DOM mutations captured during a session, plus
//! the derived per-tab [`DomRecording`] (paint events, node paths, mouse
//! positions) that the tick index is built from.
//!
//! Records are numbered by a session-wide global id. The id strictly
//! increases and is the only ordering any reader relies on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod record;
pub mod recording;
pub mod store;
pub mod timeline;

pub use error::{LogError, LogResult};
pub use record::{DomAction, DomChangeRecord, NodeData, NodeType};
pub use recording::{
    DocumentLoad, DomPath, DomRecording, FrameHost, FrameHostResolver, NodePathIndex, PaintEvent,
    PathStep, TopLevelFrames, to_dom_recording,
};
pub use store::ChangeLogStore;
pub use timeline::{CommandRecord, MouseEvent, MouseEventKind, SessionTimeline};
