//! Captured network exchanges.
//!
//! A resource may be announced before its response is known (or before the
//! browser reports a failure), so the recorder sometimes delivers the two
//! halves as separate, out-of-order events. [`ResourceStore::merge_with_existing`]
//! reconciles them; every captured attempt ends in exactly one persisted row.

use crate::codec::ContentEncoding;
use crate::config::StoreConfig;
use crate::durable::SessionDb;
use crate::error::{StoreError, StoreResult};
use crate::flusher::Flushable;
use crate::table::{Row, TieredTable};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use timelapse_core::{CommandId, FrameId, ResourceId, TabId, Timestamp};
use tracing::debug;

/// HTTP headers in the order the browser reported them
pub type Headers = IndexMap<String, String>;

/// Kind of resource, as reported by the browser
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// Top-level or frame document
    Document,
    /// CSS
    Stylesheet,
    /// Image
    Image,
    /// Audio or video
    Media,
    /// Web font
    Font,
    /// JavaScript
    Script,
    /// `fetch()` request
    Fetch,
    /// XMLHttpRequest
    Xhr,
    /// WebSocket handshake
    Websocket,
    /// Anything else
    Other(String),
}

/// Where the browser served a cached response from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheSource {
    /// Service worker
    ServiceWorker,
    /// Disk cache
    Disk,
    /// Prefetch cache
    Prefetch,
    /// Memory cache
    Memory,
}

/// Request half of a resource, as seen by the live recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    /// HTTP method
    pub method: String,
    /// Request URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Request trailers
    pub trailers: Option<Headers>,
    /// When the request was issued
    pub timestamp: Timestamp,
}

/// Response half of a resource, as seen by the live recorder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Final URL
    pub url: Option<String>,
    /// HTTP status code
    pub status_code: Option<u16>,
    /// HTTP status text
    pub status_message: Option<String>,
    /// Response headers
    pub headers: Option<Headers>,
    /// Response trailers
    pub trailers: Option<Headers>,
    /// When the response arrived
    pub timestamp: Option<Timestamp>,
    /// When the browser finished loading it
    pub browser_loaded_time: Option<Timestamp>,
    /// Browser cache that served it
    pub browser_served_from_cache: Option<CacheSource>,
    /// Browser-reported load failure
    pub browser_load_failure: Option<String>,
    /// Decoded body size
    pub body_bytes: Option<u64>,
}

/// One captured exchange, as delivered by the live recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Resource id, unique per session
    pub id: ResourceId,
    /// Owning tab
    pub tab_id: TabId,
    /// Owning frame, when known
    pub frame_id: Option<FrameId>,
    /// Resource kind, when known
    pub resource_type: Option<ResourceType>,
    /// URL of the document that issued the request
    pub document_url: Option<String>,
    /// Command that was running when it was received
    pub received_at_command_id: Option<CommandId>,
    /// Request half
    pub request: RequestMeta,
    /// Response half, if it has arrived
    pub response: Option<ResponseMeta>,
}

impl ResourceMeta {
    /// A resource whose response has not arrived yet
    #[must_use]
    pub fn request(id: ResourceId, tab_id: TabId, method: &str, url: &str, timestamp: Timestamp) -> Self {
        Self {
            id,
            tab_id,
            frame_id: None,
            resource_type: None,
            document_url: None,
            received_at_command_id: None,
            request: RequestMeta {
                method: method.to_string(),
                url: url.to_string(),
                headers: Headers::new(),
                trailers: None,
                timestamp,
            },
            response: None,
        }
    }

    /// Attach a response
    #[must_use]
    pub fn with_response(mut self, response: ResponseMeta) -> Self {
        self.response = Some(response);
        self
    }

    /// Set the resource type
    #[must_use]
    pub fn with_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    /// Set the owning frame
    #[must_use]
    pub fn with_frame(mut self, frame_id: FrameId) -> Self {
        self.frame_id = Some(frame_id);
        self
    }
}

/// Recorder-side processing details that are not part of the HTTP exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingDetails {
    /// Browser devtools request id
    pub browser_request_id: Option<String>,
    /// Socket the exchange used
    pub socket_id: Option<u64>,
    /// Negotiated protocol
    pub protocol: Option<String>,
    /// Redirect target
    pub redirected_to_url: Option<String>,
    /// Resolved remote address
    pub dns_resolved_ip: Option<String>,
    /// HTTP/2 server push
    pub is_http2_push: bool,
    /// Served from an artificial cache
    pub was_cached: bool,
    /// Response was intercepted
    pub was_intercepted: bool,
    /// Request headers before any rewriting
    pub original_headers: Option<Headers>,
    /// Response headers before any rewriting
    pub response_original_headers: Option<Headers>,
    /// Browser blocked the request
    pub browser_blocked_reason: Option<String>,
    /// Browser canceled the request
    pub browser_canceled: bool,
}

/// Error attached to a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    /// Error class
    pub name: String,
    /// Error message
    pub message: String,
}

impl ResourceFailure {
    /// Create a failure
    #[must_use]
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    /// Capture any error
    #[must_use]
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self::new("Error", &err.to_string())
    }

    /// Serialized form stored with the resource
    #[must_use]
    pub fn to_stored(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

/// Persisted resource row
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub browser_request_id: Option<String>,
    pub tab_id: TabId,
    pub frame_id: Option<FrameId>,
    pub socket_id: Option<u64>,
    pub protocol: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub received_at_command_id: Option<CommandId>,
    pub seen_at_command_id: Option<CommandId>,
    pub request_method: String,
    pub request_url: String,
    /// JSON-encoded request headers
    pub request_headers: String,
    pub request_trailers: Option<String>,
    pub request_timestamp: Timestamp,
    pub request_post_data: Option<Vec<u8>>,
    pub redirected_to_url: Option<String>,
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    pub response_url: Option<String>,
    /// JSON-encoded response headers
    pub response_headers: Option<String>,
    pub response_trailers: Option<String>,
    pub response_timestamp: Option<Timestamp>,
    /// Encoding of `response_data` at rest
    pub response_encoding: Option<ContentEncoding>,
    pub response_data: Option<Vec<u8>>,
    pub response_data_bytes: Option<u64>,
    pub dns_resolved_ip: Option<String>,
    pub is_http2_push: bool,
    pub used_artificial_cache: bool,
    pub response_intercepted: bool,
    pub request_original_headers: Option<String>,
    pub response_original_headers: Option<String>,
    /// Serialized error, kept permanently once set
    pub http_error: Option<String>,
    pub browser_loaded_timestamp: Option<Timestamp>,
    pub browser_served_from_cache: Option<CacheSource>,
    pub browser_load_failure: Option<String>,
    pub browser_blocked_reason: Option<String>,
    pub browser_canceled: bool,
    pub document_url: Option<String>,
}

impl Row for ResourceRecord {
    fn row_id(&self) -> u64 {
        self.id.get()
    }
}

impl ResourceRecord {
    /// Instant used to order versions of the same URL
    #[must_use]
    pub fn effective_timestamp(&self) -> Timestamp {
        self.browser_loaded_timestamp
            .or(self.response_timestamp)
            .unwrap_or(self.request_timestamp)
    }

    /// Parsed response headers
    #[must_use]
    pub fn response_headers(&self) -> Headers {
        parse_headers(self.response_headers.as_deref())
    }

    /// Parsed request headers
    #[must_use]
    pub fn request_headers(&self) -> Headers {
        parse_headers(Some(&self.request_headers))
    }

    /// Whether a response was captured: a body or a redirect, with headers
    #[must_use]
    pub fn has_response(&self) -> bool {
        (self.response_data.is_some() || self.redirected_to_url.is_some()) && self.has_response_headers()
    }

    /// Whether non-empty response headers were captured
    #[must_use]
    pub fn has_response_headers(&self) -> bool {
        self.response_headers
            .as_deref()
            .is_some_and(|h| !h.is_empty() && h != "{}")
    }

    /// `Content-Encoding` announced by the response headers
    #[must_use]
    pub fn header_encoding(&self) -> ContentEncoding {
        header_value(&self.response_headers(), "content-encoding")
            .map(ContentEncoding::from_header)
            .unwrap_or(ContentEncoding::Identity)
    }

    /// Summary view
    #[must_use]
    pub fn summary(&self) -> ResourceSummary {
        let headers = self.response_headers();
        ResourceSummary {
            id: self.id,
            tab_id: self.tab_id,
            frame_id: self.frame_id,
            url: self.request_url.clone(),
            method: self.request_method.clone(),
            resource_type: self.resource_type.clone(),
            status_code: self.status_code,
            redirected_to_url: self.redirected_to_url.clone(),
            timestamp: self.browser_loaded_timestamp.or(self.response_timestamp),
            has_response: self.has_response_headers(),
            content_type: header_value(&headers, "content-type").map(str::to_string),
        }
    }

    fn to_meta(&self) -> ResourceMeta {
        ResourceMeta {
            id: self.id,
            tab_id: self.tab_id,
            frame_id: self.frame_id,
            resource_type: self.resource_type.clone(),
            document_url: self.document_url.clone(),
            received_at_command_id: self.received_at_command_id,
            request: RequestMeta {
                method: self.request_method.clone(),
                url: self.request_url.clone(),
                headers: self.request_headers(),
                trailers: self.request_trailers.as_deref().map(|t| parse_headers(Some(t))),
                timestamp: self.request_timestamp,
            },
            response: Some(ResponseMeta {
                url: self.response_url.clone(),
                status_code: self.status_code,
                status_message: self.status_message.clone(),
                headers: self.response_headers.as_deref().map(|h| parse_headers(Some(h))),
                trailers: self.response_trailers.as_deref().map(|t| parse_headers(Some(t))),
                timestamp: self.response_timestamp,
                browser_loaded_time: self.browser_loaded_timestamp,
                browser_served_from_cache: self.browser_served_from_cache,
                browser_load_failure: self.browser_load_failure.clone(),
                body_bytes: self.response_data_bytes,
            }),
        }
    }
}

/// Lightweight listing of a resource
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: ResourceId,
    pub tab_id: TabId,
    pub frame_id: Option<FrameId>,
    /// Request URL (redirect chains keep their original URLs)
    pub url: String,
    pub method: String,
    pub resource_type: Option<ResourceType>,
    pub status_code: Option<u16>,
    pub redirected_to_url: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub has_response: bool,
    pub content_type: Option<String>,
}

/// Predicate set for [`ResourceStore::filter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    /// Only resources with captured response headers
    pub has_response: bool,
    /// Only GET requests, plus documents of any method
    pub is_get_or_document: bool,
}

/// A resource read back through [`ResourceStore::get_meta`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    /// Request and response metadata
    pub meta: ResourceMeta,
    /// Request body, when requested
    pub post_data: Option<Vec<u8>>,
    /// Decompressed response body, when requested
    pub body: Option<Vec<u8>>,
}

/// Body bytes plus the encoding they are in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBody {
    /// Body bytes
    pub bytes: Vec<u8>,
    /// Encoding of `bytes`
    pub encoding: ContentEncoding,
}

/// Durable store of captured network exchanges
pub struct ResourceStore {
    table: TieredTable<ResourceRecord>,
    compression_level: i32,
}

impl ResourceStore {
    /// Create a store over a session database
    #[must_use]
    pub fn new(db: &SessionDb, config: &StoreConfig) -> Self {
        Self {
            table: TieredTable::new(db.resources(), config.flush_threshold),
            compression_level: config.body_compression_level,
        }
    }

    /// Create a store over any two-tier table
    #[must_use]
    pub fn with_table(table: TieredTable<ResourceRecord>, config: &StoreConfig) -> Self {
        Self {
            table,
            compression_level: config.body_compression_level,
        }
    }

    /// Persist one exchange
    ///
    /// # Errors
    ///
    /// Returns error if compression fails or the table rejects the write
    pub fn insert(
        &self,
        meta: &ResourceMeta,
        post_data: Option<&[u8]>,
        body: Option<&[u8]>,
        details: &ProcessingDetails,
        error: Option<&ResourceFailure>,
    ) -> StoreResult<()> {
        let response = meta.response.as_ref();
        let header_encoding = response
            .and_then(|r| r.headers.as_ref())
            .and_then(|h| header_value(h, "content-encoding"))
            .map(ContentEncoding::from_header);

        let (response_data, response_encoding) = match (response, body) {
            (Some(_), Some(body)) => {
                let (bytes, encoding) = self.compress_body(body, header_encoding)?;
                (Some(bytes), Some(encoding))
            }
            _ => (None, None),
        };

        let record = ResourceRecord {
            id: meta.id,
            browser_request_id: details.browser_request_id.clone(),
            tab_id: meta.tab_id,
            frame_id: meta.frame_id,
            socket_id: details.socket_id,
            protocol: details.protocol.clone(),
            resource_type: meta.resource_type.clone(),
            received_at_command_id: meta.received_at_command_id,
            seen_at_command_id: None,
            request_method: meta.request.method.clone(),
            request_url: meta.request.url.clone(),
            request_headers: headers_json(&meta.request.headers),
            request_trailers: Some(
                meta.request
                    .trailers
                    .as_ref()
                    .map_or_else(|| "{}".to_string(), headers_json),
            ),
            request_timestamp: meta.request.timestamp,
            request_post_data: post_data.map(<[u8]>::to_vec),
            redirected_to_url: details.redirected_to_url.clone(),
            status_code: response.and_then(|r| r.status_code),
            status_message: response.and_then(|r| r.status_message.clone()),
            response_url: response.and_then(|r| r.url.clone()),
            response_headers: response
                .map(|r| r.headers.as_ref().map_or_else(|| "{}".to_string(), headers_json)),
            response_trailers: response
                .map(|r| r.trailers.as_ref().map_or_else(|| "{}".to_string(), headers_json)),
            response_timestamp: response.and_then(|r| r.timestamp),
            response_encoding,
            response_data,
            response_data_bytes: response.and_then(|r| r.body_bytes),
            dns_resolved_ip: details.dns_resolved_ip.clone(),
            is_http2_push: details.is_http2_push,
            used_artificial_cache: details.was_cached,
            response_intercepted: details.was_intercepted,
            request_original_headers: Some(
                details
                    .original_headers
                    .as_ref()
                    .map_or_else(|| "{}".to_string(), headers_json),
            ),
            response_original_headers: Some(
                details
                    .response_original_headers
                    .as_ref()
                    .map_or_else(|| "{}".to_string(), headers_json),
            ),
            http_error: error.map(ResourceFailure::to_stored),
            browser_loaded_timestamp: response.and_then(|r| r.browser_loaded_time),
            browser_served_from_cache: response.and_then(|r| r.browser_served_from_cache),
            browser_load_failure: response.and_then(|r| r.browser_load_failure.clone()),
            browser_blocked_reason: details.browser_blocked_reason.clone(),
            browser_canceled: details.browser_canceled,
            document_url: meta.document_url.clone(),
        };
        debug!(resource = %meta.id, url = %meta.request.url, "queued resource");
        self.table.upsert(record)
    }

    /// Reconcile a resource whose request and response/failure arrived separately
    ///
    /// `live_view` is the caller's in-memory view of the resource and is
    /// updated alongside the stored row. When no row exists yet, the new
    /// details are inserted as a fresh row.
    ///
    /// # Errors
    ///
    /// Returns error if the read or the write fails
    pub fn merge_with_existing(
        &self,
        id: ResourceId,
        live_view: &mut ResourceMeta,
        new_details: &ResourceMeta,
        failure_details: &ProcessingDetails,
        error: Option<&ResourceFailure>,
    ) -> StoreResult<()> {
        let Some(mut existing) = self.table.get(id.get())? else {
            return self.insert(new_details, None, None, failure_details, error);
        };
        let new_response = new_details.response.clone().unwrap_or_default();

        existing.resource_type = existing
            .resource_type
            .or_else(|| new_details.resource_type.clone());
        if live_view.resource_type.is_none() {
            live_view.resource_type = new_details.resource_type.clone();
        }
        existing.browser_request_id = existing
            .browser_request_id
            .or_else(|| failure_details.browser_request_id.clone());
        existing.browser_blocked_reason = failure_details.browser_blocked_reason.clone();
        existing.browser_canceled = failure_details.browser_canceled;
        existing.redirected_to_url = existing
            .redirected_to_url
            .or_else(|| failure_details.redirected_to_url.clone());
        existing.status_code = existing.status_code.or(new_response.status_code);
        existing.status_message = existing
            .status_message
            .or_else(|| new_response.status_message.clone());
        existing.browser_load_failure = new_response.browser_load_failure.clone();
        existing.browser_loaded_timestamp =
            existing.browser_loaded_timestamp.or(new_response.timestamp);
        existing.frame_id = existing.frame_id.or(new_details.frame_id);

        let live_response = live_view.response.get_or_insert_with(|| new_response.clone());

        if let Some(headers) = &new_response.headers {
            let serialized = headers_json(headers);
            if is_longer(&serialized, existing.response_headers.as_deref()) {
                existing.response_headers = Some(serialized);
                live_response.headers = Some(headers.clone());
            }
        }
        if let Some(headers) = &failure_details.response_original_headers {
            let serialized = headers_json(headers);
            if is_longer(&serialized, existing.response_original_headers.as_deref()) {
                existing.response_original_headers = Some(serialized);
            }
        }
        if let Some(error) = error {
            existing.http_error = Some(error.to_stored());
        }
        live_response.browser_load_failure = new_response.browser_load_failure.clone();

        debug!(resource = %id, status = ?existing.status_code, "merged resource details");
        self.table.upsert(existing)
    }

    /// Record when the browser finished loading a resource
    ///
    /// # Errors
    ///
    /// Returns error if the resource does not exist or the write fails
    pub fn update_received_time(&self, id: ResourceId, timestamp: Timestamp) -> StoreResult<()> {
        if self
            .table
            .update_pending(id.get(), |r| r.browser_loaded_timestamp = Some(timestamp))?
        {
            return Ok(());
        }
        let mut record = self
            .table
            .get(id.get())?
            .ok_or_else(|| StoreError::not_found("Resource", id))?;
        record.browser_loaded_timestamp = Some(timestamp);
        self.table.upsert(record)
    }

    /// Raw row
    ///
    /// # Errors
    ///
    /// Returns error if the read fails
    pub fn get(&self, id: ResourceId) -> StoreResult<Option<ResourceRecord>> {
        self.table.get(id.get())
    }

    /// Metadata view, optionally with post data and the decompressed body
    ///
    /// # Errors
    ///
    /// Returns error if the read or the body decompression fails
    pub fn get_meta(&self, id: ResourceId, include_body: bool) -> StoreResult<Option<StoredResource>> {
        let Some(record) = self.table.get(id.get())? else {
            return Ok(None);
        };
        let (post_data, body) = if include_body {
            (record.request_post_data.clone(), decoded_body(&record)?)
        } else {
            (None, None)
        };
        Ok(Some(StoredResource {
            meta: record.to_meta(),
            post_data,
            body,
        }))
    }

    /// Response body, either as stored or decompressed
    ///
    /// # Errors
    ///
    /// Returns error if the read or the decompression fails
    pub fn get_resource_body(&self, id: ResourceId, decompress: bool) -> StoreResult<Option<ResourceBody>> {
        let Some(record) = self.table.get(id.get())? else {
            return Ok(None);
        };
        let (Some(bytes), Some(encoding)) = (record.response_data, record.response_encoding) else {
            return Ok(None);
        };
        if decompress {
            Ok(Some(ResourceBody {
                bytes: encoding.decode(&bytes)?,
                encoding: ContentEncoding::Identity,
            }))
        } else {
            Ok(Some(ResourceBody { bytes, encoding }))
        }
    }

    /// Request body
    ///
    /// # Errors
    ///
    /// Returns error if the read fails
    pub fn get_post_data(&self, id: ResourceId) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .table
            .get(id.get())?
            .and_then(|record| record.request_post_data))
    }

    /// Body in the form it crossed the wire, matching the stored headers
    ///
    /// Bodies stored with the encoding the headers announce are returned
    /// untouched; bodies the store compressed itself are decompressed.
    ///
    /// # Errors
    ///
    /// Returns error if decompression fails
    pub fn wire_body(&self, record: &ResourceRecord) -> StoreResult<Option<Vec<u8>>> {
        let (Some(bytes), Some(encoding)) = (&record.response_data, &record.response_encoding) else {
            return Ok(None);
        };
        if *encoding == record.header_encoding() {
            Ok(Some(bytes.clone()))
        } else {
            encoding.decode(bytes).map(Some)
        }
    }

    /// Summaries of every resource matching the predicate set
    ///
    /// # Errors
    ///
    /// Returns error if the scan fails
    pub fn filter(&self, filter: ResourceFilter) -> StoreResult<Vec<ResourceSummary>> {
        let rows = self.table.scan(|record| {
            if filter.has_response && !record.has_response() {
                return false;
            }
            if filter.is_get_or_document
                && record.request_method != "GET"
                && record.resource_type != Some(ResourceType::Document)
            {
                return false;
            }
            true
        })?;
        Ok(rows.iter().map(ResourceRecord::summary).collect())
    }

    /// Resources of a tab that finished loading within `[start, end]`
    ///
    /// # Errors
    ///
    /// Returns error if the scan fails
    pub fn by_time_range(&self, tab_id: TabId, start: Timestamp, end: Timestamp) -> StoreResult<Vec<ResourceSummary>> {
        let rows = self.table.scan(|record| {
            if record.tab_id != tab_id {
                return false;
            }
            let loaded = record.browser_loaded_timestamp.or(record.response_timestamp);
            loaded.is_some_and(|t| t >= start && t <= end)
        })?;
        Ok(rows.iter().map(ResourceRecord::summary).collect())
    }

    /// Raw rows matching a predicate, in id order
    ///
    /// # Errors
    ///
    /// Returns error if the scan fails
    pub fn find<P>(&self, predicate: P) -> StoreResult<Vec<ResourceRecord>>
    where
        P: Fn(&ResourceRecord) -> bool,
    {
        self.table.scan(predicate)
    }

    /// Persist queued rows
    ///
    /// # Errors
    ///
    /// Returns error if the durable write fails
    pub fn flush(&self) -> StoreResult<usize> {
        self.table.flush()
    }

    /// Clear the poisoned state after a failed flush
    pub fn reinitialize(&self) {
        self.table.reinitialize();
    }

    /// Queued rows not yet flushed
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.table.pending_len()
    }

    fn compress_body(
        &self,
        body: &[u8],
        header_encoding: Option<ContentEncoding>,
    ) -> StoreResult<(Vec<u8>, ContentEncoding)> {
        match header_encoding {
            Some(encoding) if encoding != ContentEncoding::Identity => Ok((body.to_vec(), encoding)),
            _ => {
                let encoding = ContentEncoding::Zstd;
                Ok((encoding.encode(body, self.compression_level)?, encoding))
            }
        }
    }
}

impl Flushable for ResourceStore {
    fn name(&self) -> &str {
        self.table.name()
    }

    fn flush(&self) -> StoreResult<usize> {
        self.table.flush()
    }

    fn idle_for(&self) -> Option<Duration> {
        self.table.idle_for()
    }
}

fn decoded_body(record: &ResourceRecord) -> StoreResult<Option<Vec<u8>>> {
    match (&record.response_data, &record.response_encoding) {
        (Some(bytes), Some(encoding)) => encoding.decode(bytes).map(Some),
        _ => Ok(None),
    }
}

fn headers_json(headers: &Headers) -> String {
    serde_json::to_string(headers).unwrap_or_else(|_| "{}".to_string())
}

fn parse_headers(json: Option<&str>) -> Headers {
    json.and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

/// Case-insensitive header lookup
fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Longer serialized headers are taken as the more complete set
fn is_longer(candidate: &str, existing: Option<&str>) -> bool {
    existing.is_none_or(|existing| candidate.len() > existing.len())
}
