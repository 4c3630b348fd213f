use super::{Encoding, Session};
use crate::{Error, Result, TimeSource, Token, TokenSource};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Default chunk size suggested to senders, in bytes of chunk string.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Parameters supplied by the sender when opening a session.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Requested chunk size. Absent or non-positive values fall back to the
    /// registry default.
    pub chunk_size: Option<i64>,
    pub encoding: Encoding,
    pub metadata: Map<String, Value>,
    pub expected_size: Option<u64>,
}

/// Returned by [`SessionRegistry::open`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Opened {
    pub token: Token,
    pub chunk_size: usize,
}

/// Snapshot of a session taken at finalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finalized {
    pub token: Token,
    pub purpose: String,
    pub bytes: u64,
    pub encoding: Encoding,
}

/// Token-keyed store of upload sessions.
///
/// Every check-then-act sequence for a token runs under a single lock
/// acquisition and never across an `.await`, so the registry is safe to share
/// across a multi-threaded runtime.
///
/// Tokens of promoted sessions stay reserved until released, so a fresh
/// session never shares a token with live downstream work.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Token, Session>>,
    /// Always locked after `sessions`.
    promoted: Mutex<HashSet<Token>>,
    tokens: Arc<dyn TokenSource>,
    clock: Arc<dyn TimeSource>,
    default_chunk_size: usize,
}

impl SessionRegistry {
    pub fn new(
        default_chunk_size: usize,
        tokens: Arc<dyn TokenSource>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            promoted: Mutex::new(HashSet::new()),
            tokens,
            clock,
            default_chunk_size: default_chunk_size.max(1),
        }
    }

    pub const fn default_chunk_size(&self) -> usize {
        self.default_chunk_size
    }

    pub(crate) fn clock(&self) -> &dyn TimeSource {
        self.clock.as_ref()
    }

    /// Opens an accumulating session under a fresh token.
    ///
    /// `purpose` defaults to `"general"`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(purpose = purpose.as_deref().unwrap_or("general"))))]
    pub fn open(&self, purpose: Option<String>, options: OpenOptions) -> Opened {
        let chunk_size = match options.chunk_size {
            Some(requested) if requested > 0 => requested as usize,
            _ => self.default_chunk_size,
        };
        let now = self.clock.current_millis();

        let mut sessions = self.sessions.lock();
        let token = loop {
            let candidate = self.tokens.next_token();
            if !sessions.contains_key(&candidate) && !self.promoted.lock().contains(&candidate) {
                break candidate;
            }
        };
        let session = Session::new(
            token.clone(),
            purpose.unwrap_or_else(|| "general".to_owned()),
            options.encoding,
            options.metadata,
            options.expected_size,
            chunk_size,
            now,
        );
        sessions.insert(token.clone(), session);

        #[cfg(feature = "tracing")]
        tracing::debug!(%token, chunk_size, "Opened upload session");

        Opened { token, chunk_size }
    }

    /// Appends one chunk in arrival order.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] if the token is unknown or already
    /// finalized.
    pub fn append_chunk(&self, token: &str, chunk: String) -> Result<()> {
        let now = self.clock.current_millis();
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(token).ok_or(Error::SessionNotFound)?;
        session.append(chunk, now)
    }

    /// Finalizes a session in place. The session stays registered until a
    /// consumer takes it.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] if the token is unknown or already
    /// finalized.
    pub fn finalize(&self, token: &str) -> Result<Finalized> {
        let now = self.clock.current_millis();
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(token).ok_or(Error::SessionNotFound)?;
        session.finalize(now)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%token, bytes = session.received_bytes, "Finalized upload session");

        Ok(Finalized {
            token: session.token.clone(),
            purpose: session.purpose.clone(),
            bytes: session.received_bytes,
            encoding: session.encoding,
        })
    }

    /// Finalizes the session if it is still accumulating, then removes it and
    /// hands over ownership.
    ///
    /// A session that was already finalized is moved out untouched, so its
    /// payload is never concatenated twice.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] if the token is unknown.
    pub fn take_finalized(&self, token: &str) -> Result<Session> {
        let now = self.clock.current_millis();
        take_finalized(&mut self.sessions.lock(), token, now)
    }

    /// Like [`Self::take_finalized`], but keeps the token reserved until
    /// [`Self::release`] is called for it.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] if the token is unknown.
    pub fn promote(&self, token: &str) -> Result<Session> {
        let now = self.clock.current_millis();
        let mut sessions = self.sessions.lock();
        let session = take_finalized(&mut sessions, token, now)?;
        self.promoted.lock().insert(session.token.clone());
        Ok(session)
    }

    /// Frees the token of promoted work that has ended. Returns whether it
    /// was reserved.
    pub fn release(&self, token: &str) -> bool {
        self.promoted.lock().remove(token)
    }

    pub fn is_reserved(&self, token: &str) -> bool {
        self.promoted.lock().contains(token)
    }

    /// Runs `f` against a session without removing it.
    pub fn inspect<R>(&self, token: &str, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.sessions.lock().get(token).map(f)
    }

    /// Deletes a session if present. Never fails.
    ///
    /// Returns whether a session was removed.
    pub fn abort(&self, token: &str) -> bool {
        let removed = self.sessions.lock().remove(token).is_some();

        #[cfg(feature = "tracing")]
        {
            if removed {
                tracing::debug!(%token, "Aborted upload session");
            }
        }

        removed
    }

    /// Removes sessions with no activity for at least `ttl_millis`.
    pub fn reap_idle(&self, now: u64, ttl_millis: u64) -> Vec<Token> {
        let mut reaped = Vec::new();
        self.sessions.lock().retain(|token, session| {
            let keep = now.saturating_sub(session.last_activity()) < ttl_millis;
            if !keep {
                reaped.push(token.clone());
            }
            keep
        });
        reaped
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.sessions.lock().contains_key(token)
    }
}

fn take_finalized(sessions: &mut HashMap<Token, Session>, token: &str, now: u64) -> Result<Session> {
    let session = sessions.get_mut(token).ok_or(Error::SessionNotFound)?;
    if !session.is_completed() {
        session.finalize(now)?;
    }
    sessions.remove(token).ok_or(Error::SessionNotFound)
}
