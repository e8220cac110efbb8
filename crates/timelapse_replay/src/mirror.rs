//! Offline network for replay.
//!
//! Every fetch a reconstruction issues is answered from the resource store.
//! A URL fetched several times during a session is served in the version
//! that had loaded by the replay instant. Nothing ever reaches a live
//! network; unknown resources get an explicit failed response.

use crate::error::ReplayResult;
use crate::resolve::normalize_url;
use std::collections::HashMap;
use std::sync::Arc;
use timelapse_core::{ResourceId, Timestamp};
use timelapse_storage::{ContentEncoding, Headers, ResourceRecord, ResourceStore};
use tracing::{debug, warn};

/// A stored exchange served back to a replayed page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredResource {
    /// Resource that answered the fetch
    pub resource_id: ResourceId,
    /// Stored status code (0 when the exchange never got one)
    pub status_code: u16,
    /// Stored status text
    pub status_message: Option<String>,
    /// Stored response headers
    pub headers: Headers,
    /// Body exactly as it crossed the wire
    pub body: Vec<u8>,
    /// Encoding of `body`, as announced by the headers
    pub content_encoding: ContentEncoding,
    /// Redirect target, for redirect responses
    pub redirected_to_url: Option<String>,
}

/// Answer to a mirrored fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorResponse {
    /// Served from the store
    Mirrored(MirroredResource),
    /// Never captured: the offline equivalent of a network error
    NotMirrored {
        /// Requested method
        method: String,
        /// Requested URL
        url: String,
    },
}

impl MirrorResponse {
    /// Status code; 0 for a resource that was not mirrored
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Mirrored(resource) => resource.status_code,
            Self::NotMirrored { .. } => 0,
        }
    }

    /// Body bytes; empty for a resource that was not mirrored
    #[must_use]
    pub fn body(&self) -> &[u8] {
        match self {
            Self::Mirrored(resource) => &resource.body,
            Self::NotMirrored { .. } => &[],
        }
    }

    /// Response headers, if mirrored
    #[must_use]
    pub fn headers(&self) -> Option<&Headers> {
        match self {
            Self::Mirrored(resource) => Some(&resource.headers),
            Self::NotMirrored { .. } => None,
        }
    }

    /// Whether the store answered the fetch
    #[must_use]
    pub fn is_mirrored(&self) -> bool {
        matches!(self, Self::Mirrored(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Version {
    at: Timestamp,
    id: ResourceId,
}

/// Serves replay fetches from a [`ResourceStore`]
pub struct ResourceMirror {
    store: Arc<ResourceStore>,
    versions: HashMap<(String, String), Vec<Version>>,
}

impl ResourceMirror {
    /// Index every stored resource by method and URL
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be scanned
    pub fn from_store(store: Arc<ResourceStore>) -> ReplayResult<Self> {
        let mut versions: HashMap<(String, String), Vec<Version>> = HashMap::new();
        for record in store.find(|_| true)? {
            versions
                .entry(key(&record.request_method, &record.request_url))
                .or_default()
                .push(Version {
                    at: record.effective_timestamp(),
                    id: record.id,
                });
        }
        for list in versions.values_mut() {
            list.sort_by_key(|v| (v.at, v.id));
        }
        Ok(Self { store, versions })
    }

    /// Number of distinct method and URL pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether nothing can be served
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Serve the version of `method url` current at `at`
    ///
    /// # Errors
    ///
    /// Returns error only if reading the stored row or body fails; a missing
    /// resource is [`MirrorResponse::NotMirrored`], not an error
    pub fn serve(&self, method: &str, url: &str, at: Timestamp) -> ReplayResult<MirrorResponse> {
        let Some(id) = self.select(method, url, at) else {
            warn!(method, url, at = %at, "resource not mirrored");
            return Ok(not_mirrored(method, url));
        };
        let Some(record) = self.store.get(id)? else {
            warn!(method, url, resource = %id, "mirrored resource vanished from the store");
            return Ok(not_mirrored(method, url));
        };
        let response = self.mirrored(&record)?;
        debug!(
            method,
            url,
            resource = %id,
            status = response.status_code(),
            bytes = response.body().len(),
            "served mirrored resource"
        );
        Ok(response)
    }

    fn select(&self, method: &str, url: &str, at: Timestamp) -> Option<ResourceId> {
        let list = self.versions.get(&key(method, url))?;
        let loaded = list.partition_point(|v| v.at <= at);
        loaded.checked_sub(1).map(|i| list[i].id)
    }

    fn mirrored(&self, record: &ResourceRecord) -> ReplayResult<MirrorResponse> {
        let body = self.store.wire_body(record)?.unwrap_or_default();
        Ok(MirrorResponse::Mirrored(MirroredResource {
            resource_id: record.id,
            status_code: record.status_code.unwrap_or(0),
            status_message: record.status_message.clone(),
            headers: record.response_headers(),
            body,
            content_encoding: record.header_encoding(),
            redirected_to_url: record.redirected_to_url.clone(),
        }))
    }
}

fn not_mirrored(method: &str, url: &str) -> MirrorResponse {
    MirrorResponse::NotMirrored {
        method: method.to_string(),
        url: url.to_string(),
    }
}

/// Fragments never reach the network, so they do not distinguish resources
fn key(method: &str, url: &str) -> (String, String) {
    (method.to_ascii_uppercase(), normalize_url(url))
}
