use core::borrow::Borrow;
use core::fmt;
use parking_lot::Mutex;
use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng, TryRngCore};
use serde::{Deserialize, Serialize};

/// Opaque identifier naming one upload session or print job for its entire
/// lifetime.
///
/// Tokens are compared by value. A print job reuses the token of the session
/// it was promoted from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// A source of fresh tokens.
///
/// Registries re-draw while a token collides with an open session or with a
/// print job that is still live, so a source only needs to be
/// collision-resistant, not collision-free.
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> Token;
}

/// A [`TokenSource`] producing 128-bit tokens rendered as 32 lowercase hex
/// digits.
///
/// Bytes come from the operating system's CSPRNG. If the OS source fails, a
/// `SmallRng` seeded once at construction is used instead; it is fast but not
/// cryptographically secure.
pub struct OsTokenSource {
    fallback: Mutex<SmallRng>,
}

impl OsTokenSource {
    pub fn new() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        Self {
            fallback: Mutex::new(SmallRng::seed_from_u64(seed ^ std::process::id() as u64)),
        }
    }
}

impl Default for OsTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OsTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsTokenSource").finish_non_exhaustive()
    }
}

impl TokenSource for OsTokenSource {
    fn next_token(&self) -> Token {
        let mut bytes = [0_u8; 16];
        if let Err(_e) = OsRng.try_fill_bytes(&mut bytes) {
            #[cfg(feature = "tracing")]
            tracing::warn!("OS random source unavailable, using fallback PRNG: {_e}");
            self.fallback.lock().fill_bytes(&mut bytes);
        }
        Token(format!("{:032x}", u128::from_be_bytes(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn os_tokens_are_hex_and_distinct() {
        let source = OsTokenSource::new();
        let mut seen = HashSet::new();
        for _ in 0..1024 {
            let token = source.next_token();
            assert_eq!(token.as_str().len(), 32);
            assert!(token.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
            assert!(seen.insert(token));
        }
    }

    #[test]
    fn token_serializes_as_plain_string() {
        let token = Token::from("abc123");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"abc123\"");
        let back: Token = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(back, token);
    }
}
