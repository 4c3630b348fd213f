//! Deterministic stand-ins shared by the unit tests.

use crate::{HostError, SurfaceHost, SurfaceId, TimeSource, Token, TokenSource};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub(crate) struct MockTime {
    millis: AtomicU64,
}

impl MockTime {
    pub(crate) fn at(millis: u64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicU64::new(millis),
        })
    }

    pub(crate) fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTime {
    fn current_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Hands out `tok-0`, `tok-1`, ...
#[derive(Default)]
pub(crate) struct SequentialTokens {
    next: AtomicU64,
}

impl TokenSource for SequentialTokens {
    fn next_token(&self) -> Token {
        Token::new(format!("tok-{}", self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

/// Replays a fixed list of tokens, then falls back to `tok-0`, `tok-1`, ...
#[derive(Default)]
pub(crate) struct ScriptedTokens {
    script: Mutex<VecDeque<&'static str>>,
    fallback: SequentialTokens,
}

impl ScriptedTokens {
    pub(crate) fn new(script: &[&'static str]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            fallback: SequentialTokens::default(),
        }
    }
}

impl TokenSource for ScriptedTokens {
    fn next_token(&self) -> Token {
        match self.script.lock().pop_front() {
            Some(raw) => Token::new(raw),
            None => self.fallback.next_token(),
        }
    }
}

/// Records every surface opened and closed; can be told to fail either
/// operation.
#[derive(Default)]
pub(crate) struct MockSurfaces {
    next_id: AtomicU64,
    pub(crate) opened: Mutex<Vec<(SurfaceId, Token)>>,
    pub(crate) closed: Mutex<Vec<SurfaceId>>,
    pub(crate) fail_open: AtomicBool,
    pub(crate) fail_close: AtomicBool,
}

impl SurfaceHost for MockSurfaces {
    async fn open(&self, token: &Token) -> Result<SurfaceId, HostError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(HostError::Failed("tab creation refused".to_owned()));
        }
        let id = SurfaceId(100 + self.next_id.fetch_add(1, Ordering::SeqCst));
        self.opened.lock().push((id, token.clone()));
        Ok(id)
    }

    async fn close(&self, surface: SurfaceId) -> Result<(), HostError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(HostError::Failed(format!("No tab with id: {surface}")));
        }
        self.closed.lock().push(surface);
        Ok(())
    }
}
