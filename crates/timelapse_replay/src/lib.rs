//! Timelapse Replay
//!
//! Navigable ticks over a recorded session and offline reconstruction of a
//! tab's DOM at any of them. Fetches issued during reconstruction are served
//! from the session's resource store, never from the network.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod diff;
pub mod dom;
pub mod error;
pub mod mirror;
pub mod reconstructor;
pub mod resolve;
pub mod snapshot;
pub mod ticks;

#[cfg(test)]
mod live;

pub use config::ReplayConfig;
pub use context::MirrorContext;
pub use diff::DomDivergence;
pub use dom::{DomArena, DomNode, DomNodeId, DomNodeKind};
pub use error::{ReplayError, ReplayResult};
pub use mirror::{MirrorResponse, MirroredResource, ResourceMirror};
pub use reconstructor::{FetchRecord, LoadMode, LoadOutcome, SkippedRecord, StateReconstructor};
pub use resolve::{normalize_url, resolve_url};
pub use snapshot::{IndexedDbDatabase, IndexedDbStore, StorageSnapshot};
pub use ticks::{RecordedSession, TabTicks, Tick, TickEventType, TickIndex};
