use crate::{Error, Result, Token};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How chunk strings of a session are interpreted.
///
/// The encoding is fixed when the session is opened and only affects byte
/// accounting here. Consumers of the finalized payload decide what to do with
/// it (e.g. a download decodes `base64` before writing).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Text,
    Base64,
}

impl Encoding {
    /// Advisory byte count contributed by one chunk.
    ///
    /// `Text` counts the UTF-8 length exactly. `Base64` approximates the
    /// decoded size as `floor(len * 3 / 4)`, ignoring padding.
    pub const fn accounted_bytes(self, chunk: &str) -> u64 {
        let len = chunk.len() as u64;
        match self {
            Self::Text => len,
            Self::Base64 => len * 3 / 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Base64 => "base64",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "text" => Ok(Self::Text),
            "base64" => Ok(Self::Base64),
            other => Err(Error::invalid_input(format!(
                "unsupported encoding `{other}` (expected `text` or `base64`)"
            ))),
        }
    }
}

/// The two valid states of a transfer.
///
/// Modelled as an enum so that "chunks populated and data present" cannot be
/// represented.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Transfer {
    Accumulating { chunks: Vec<String> },
    Finalized { data: String, completed_at: u64 },
}

/// An upload session: an ordered accumulation of chunk strings that is
/// finalized exactly once into an immutable payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub token: Token,
    pub purpose: String,
    pub encoding: Encoding,
    /// Opaque opener-supplied data, forwarded verbatim to consumers.
    pub metadata: Map<String, Value>,
    /// Declared total size. Advisory, never enforced.
    pub expected_size: Option<u64>,
    /// Chunk size the sender was told to use. Not enforced.
    pub chunk_size: usize,
    /// Running advisory total, see [`Encoding::accounted_bytes`].
    pub received_bytes: u64,
    pub created_at: u64,
    pub last_chunk_time: Option<u64>,
    transfer: Transfer,
}

impl Session {
    pub(crate) fn new(
        token: Token,
        purpose: String,
        encoding: Encoding,
        metadata: Map<String, Value>,
        expected_size: Option<u64>,
        chunk_size: usize,
        created_at: u64,
    ) -> Self {
        Self {
            token,
            purpose,
            encoding,
            metadata,
            expected_size,
            chunk_size,
            received_bytes: 0,
            created_at,
            last_chunk_time: None,
            transfer: Transfer::Accumulating { chunks: Vec::new() },
        }
    }

    pub const fn is_completed(&self) -> bool {
        matches!(self.transfer, Transfer::Finalized { .. })
    }

    /// The reassembled payload, present only once finalized.
    pub fn data(&self) -> Option<&str> {
        match &self.transfer {
            Transfer::Finalized { data, .. } => Some(data),
            Transfer::Accumulating { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<String> {
        match self.transfer {
            Transfer::Finalized { data, .. } => Some(data),
            Transfer::Accumulating { .. } => None,
        }
    }

    pub const fn completed_at(&self) -> Option<u64> {
        match self.transfer {
            Transfer::Finalized { completed_at, .. } => Some(completed_at),
            Transfer::Accumulating { .. } => None,
        }
    }

    /// Number of chunks buffered so far. Zero once finalized.
    pub fn chunk_count(&self) -> usize {
        match &self.transfer {
            Transfer::Accumulating { chunks } => chunks.len(),
            Transfer::Finalized { .. } => 0,
        }
    }

    /// Timestamp of the most recent sign of life from the sender.
    pub fn last_activity(&self) -> u64 {
        self.last_chunk_time.unwrap_or(self.created_at)
    }

    /// Looks up a string entry in the opener's metadata.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub(crate) fn append(&mut self, chunk: String, now: u64) -> Result<()> {
        match &mut self.transfer {
            Transfer::Accumulating { chunks } => {
                self.received_bytes += self.encoding.accounted_bytes(&chunk);
                self.last_chunk_time = Some(now);
                chunks.push(chunk);
                Ok(())
            }
            Transfer::Finalized { .. } => Err(Error::SessionNotFound),
        }
    }

    /// Concatenates the buffered chunks in arrival order and freezes the
    /// payload.
    pub(crate) fn finalize(&mut self, now: u64) -> Result<()> {
        match &mut self.transfer {
            Transfer::Accumulating { chunks } => {
                let data = core::mem::take(chunks).concat();
                self.transfer = Transfer::Finalized {
                    data,
                    completed_at: now,
                };
                Ok(())
            }
            Transfer::Finalized { .. } => Err(Error::SessionNotFound),
        }
    }
}
