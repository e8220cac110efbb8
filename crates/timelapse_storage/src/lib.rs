//! Timelapse Storage
//!
//! Session tables with an explicit two-tier layout: an ordered in-memory
//! pending queue in front of a durable redb table. Appends only touch the
//! queue; a flush moves the queue into one write transaction. Reads consult
//! the queue first and then the table, so a process always reads its own
//! writes.
//!
//! The captured network exchanges of a session live here as well, in the
//! [`ResourceStore`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod durable;
pub mod error;
pub mod flusher;
pub mod resource;
pub mod table;

pub use codec::ContentEncoding;
pub use config::StoreConfig;
pub use durable::{DurableTable, RedbTable, SessionDb};
pub use error::{StoreError, StoreResult};
pub use flusher::{Flushable, IdleFlusher};
pub use resource::{
    CacheSource, Headers, ProcessingDetails, RequestMeta, ResourceBody, ResourceFailure,
    ResourceFilter, ResourceMeta, ResourceRecord, ResourceStore, ResourceSummary, ResourceType,
    ResponseMeta, StoredResource,
};
pub use table::{Row, TableStats, TieredTable};
