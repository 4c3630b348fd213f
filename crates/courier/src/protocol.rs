//! Wire types for the message channel.
//!
//! Requests are tagged by `"action"` and use camelCase fields. Every request
//! produces exactly one [`Reply`]; failures are replies too (`{"error": ...}`)
//! so nothing propagates across a context boundary as an exception.

use crate::{Encoding, Error, HostEvent, JobMetadata, SurfaceId, Token};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-request overrides carried by `startPrintJob`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PrintOverrides {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheOperation {
    Get,
    Set,
    Clear,
    GetStats,
}

/// One inbound message.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    OpenUploadSession {
        #[serde(default)]
        purpose: Option<String>,
        /// Parsed separately so an unknown value is reported as invalid input.
        #[serde(default)]
        encoding: Option<String>,
        #[serde(default)]
        metadata: Option<Map<String, Value>>,
        #[serde(default)]
        expected_size: Option<u64>,
        #[serde(default)]
        chunk_size: Option<i64>,
    },
    AppendUploadChunk {
        token: String,
        /// Any JSON value; only strings are accepted as chunks.
        #[serde(default)]
        chunk: Value,
    },
    FinalizeUploadSession {
        token: String,
    },
    AbortUploadSession {
        token: String,
    },
    StartPrintJob {
        token: String,
        #[serde(default)]
        payload: PrintOverrides,
        #[serde(default)]
        source_tab_id: Option<SurfaceId>,
    },
    RequestPrintJob {
        token: String,
    },
    FetchPrintChunk {
        token: String,
        #[serde(default)]
        offset: Option<i64>,
        #[serde(default)]
        length: Option<i64>,
    },
    CompletePrintJob {
        token: String,
        #[serde(default)]
        close_tab: Option<bool>,
    },
    /// Forwarded verbatim to the rendering resource.
    Render {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    Cache {
        operation: CacheOperation,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        data_type: Option<String>,
    },
    ReadLocalFile {
        file_path: String,
        #[serde(default)]
        binary: Option<bool>,
    },
    FinalizeDownload {
        token: String,
    },
    SaveScrollPosition {
        url: String,
        position: f64,
    },
    GetScrollPosition {
        url: String,
    },
}

impl Request {
    /// Parses a request, mapping any shape error to [`Error::InvalidInput`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `value` is not a known request shape.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        serde_json::from_value(value).map_err(|e| Error::invalid_input(e.to_string()))
    }

    /// Like [`Self::from_value`], for a raw JSON body.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `body` is not JSON or not a known request.
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(body).map_err(|e| Error::invalid_input(e.to_string()))
    }

    /// The wire name of this request's action.
    pub const fn action(&self) -> &'static str {
        match self {
            Self::OpenUploadSession { .. } => "openUploadSession",
            Self::AppendUploadChunk { .. } => "appendUploadChunk",
            Self::FinalizeUploadSession { .. } => "finalizeUploadSession",
            Self::AbortUploadSession { .. } => "abortUploadSession",
            Self::StartPrintJob { .. } => "startPrintJob",
            Self::RequestPrintJob { .. } => "requestPrintJob",
            Self::FetchPrintChunk { .. } => "fetchPrintChunk",
            Self::CompletePrintJob { .. } => "completePrintJob",
            Self::Render { .. } => "render",
            Self::Cache { .. } => "cache",
            Self::ReadLocalFile { .. } => "readLocalFile",
            Self::FinalizeDownload { .. } => "finalizeDownload",
            Self::SaveScrollPosition { .. } => "saveScrollPosition",
            Self::GetScrollPosition { .. } => "getScrollPosition",
        }
    }
}

/// Parses an `encoding` field. Absent means [`Encoding::Text`].
///
/// # Errors
///
/// [`Error::InvalidInput`] for anything but `text` or `base64`.
pub fn parse_encoding(raw: Option<&str>) -> Result<Encoding, Error> {
    raw.map_or(Ok(Encoding::Text), str::parse)
}

/// One outbound message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Reply {
    Opened {
        token: Token,
        chunk_size: usize,
    },
    Finalized {
        token: Token,
        purpose: String,
        bytes: u64,
        encoding: Encoding,
    },
    Started {
        success: bool,
        token: Token,
    },
    Job {
        success: bool,
        payload: JobMetadata,
    },
    Chunk {
        success: bool,
        chunk: String,
        next_offset: usize,
    },
    Download {
        success: bool,
        download_id: u64,
    },
    File {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
    CacheResult {
        result: Value,
    },
    Scroll {
        position: Option<f64>,
    },
    Success {
        success: bool,
    },
    Error {
        error: String,
    },
    /// An opaque collaborator response, passed through untouched.
    Raw(Value),
}

impl Reply {
    pub const fn ok() -> Self {
        Self::Success { success: true }
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
    }
}

impl From<Error> for Reply {
    fn from(err: Error) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }
}

impl<T: Into<Reply>> From<Result<T, Error>> for Reply {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(reply) => reply.into(),
            Err(e) => e.into(),
        }
    }
}

/// An externally observed lifecycle signal, as posted by a host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventNotice {
    SurfaceRemoved { tab_id: SurfaceId },
    ResourceDisconnected,
}

impl From<EventNotice> for HostEvent {
    fn from(notice: EventNotice) -> Self {
        match notice {
            EventNotice::SurfaceRemoved { tab_id } => Self::SurfaceRemoved(tab_id),
            EventNotice::ResourceDisconnected => Self::ResourceDisconnected,
        }
    }
}
