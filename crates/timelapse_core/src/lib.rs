//! Timelapse Core Types
//!
//! Identifiers, timestamps, digests and the shared error type used by the
//! change log, the resource store and the replay engine.
//! This crate contains pure types and logic with no I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::Hash;
pub use id::{CommandId, FrameId, GlobalId, NodeId, ResourceId, SessionId, TabId};
pub use time::{Duration, Timestamp};
