//! The Backend Contract
//!
//! Every storage implementation in JKV speaks the same small contract, so the
//! command dispatcher can drive a directory tree or a remote server without
//! knowing which one it holds.
//!
//! ## Namespaces
//!
//! ```text
//! ┌─────────────────────────────┐   ┌─────────────────────────────┐
//! │      Scalar namespace       │   │       Hash namespace        │
//! │                             │   │                             │
//! │   key ──> bytes             │   │   hash ──> { field: bytes } │
//! └─────────────────────────────┘   └─────────────────────────────┘
//!              ▲                                  ▲
//!              └────────── disjoint names ────────┘
//! ```
//!
//! A name is either a scalar or a hash, never both. A hash exists only while
//! it has at least one field.
//!
//! ## Lifecycle
//!
//! A store starts [`StoreState::Closed`]. `open` moves it to `Open` (and may be
//! called again at any time), `close` moves it back. Every data operation on a
//! closed store fails with [`StoreError::NotOpen`].

use bytes::Bytes;
use std::io;
use std::time::Duration;
use thiserror::Error;
use wildmatch::WildMatch;

/// Errors returned by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has not been opened (or was closed)
    #[error("DB is not open")]
    NotOpen,

    /// The key, hash or field does not exist
    #[error("no such key: {0}")]
    NotFound(String),

    /// The name is already used by the other value shape
    #[error("key \"{0}\" holds the wrong kind of value")]
    TypeConflict(String),

    /// The name cannot be stored by this backend
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Underlying storage failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The remote server sent something we did not expect
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A remote round trip exceeded its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Open/closed flag held by each store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreState {
    #[default]
    Closed,
    Open,
}

impl StoreState {
    /// Fails with [`StoreError::NotOpen`] unless the store is open.
    #[inline]
    pub fn ensure_open(self) -> StoreResult<()> {
        match self {
            StoreState::Open => Ok(()),
            StoreState::Closed => Err(StoreError::NotOpen),
        }
    }
}

/// The capability set every storage backend implements.
///
/// Reads take `&self`; lifecycle transitions take `&mut self`. Backends never
/// panic on bad input: each failure comes back as a [`StoreError`].
pub trait Backend: Send {
    /// Prepares the underlying storage and marks the store open.
    ///
    /// Safe to call while already open; missing structure is recreated.
    fn open(&mut self) -> StoreResult<()>;

    /// Marks the store closed. Persisted data is left alone.
    fn close(&mut self);

    /// Removes every scalar and hash.
    ///
    /// Best effort: failures are logged, never returned. Callers must not rely
    /// on this reporting a partial flush. The open/closed state is unchanged.
    fn flush_db(&self);

    /// Where the data lives (directory or server address), for prompts and logs.
    fn location(&self) -> String;

    /// Liveness check, answers `PONG`.
    fn ping(&self) -> StoreResult<String>;

    /// Returns the value of a scalar key.
    fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Creates or overwrites a scalar key.
    ///
    /// Fails with [`StoreError::TypeConflict`] if `key` is an existing hash.
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Removes scalar keys in order, stopping at the first failure.
    ///
    /// Returns how many keys were removed.
    fn del(&self, keys: &[&str]) -> StoreResult<usize>;

    /// Counts how many of `keys` exist as scalars.
    fn exists(&self, keys: &[&str]) -> StoreResult<usize>;

    /// Lists scalar and hash names matching a glob `pattern`.
    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Returns the value of `field` inside `hash`.
    fn hget(&self, hash: &str, field: &str) -> StoreResult<Bytes>;

    /// Sets `field` inside `hash`, creating the hash if needed.
    ///
    /// Fails with [`StoreError::TypeConflict`] if `hash` is an existing scalar.
    fn hset(&self, hash: &str, field: &str, value: &[u8]) -> StoreResult<()>;

    /// Removes `field` from `hash` and returns how many fields remain.
    ///
    /// A hash left with no fields is removed.
    fn hdel(&self, hash: &str, field: &str) -> StoreResult<usize>;

    /// Lists the field names of `hash`.
    fn hkeys(&self, hash: &str) -> StoreResult<Vec<String>>;

    /// Returns true if `field` exists inside `hash`.
    fn hexists(&self, hash: &str, field: &str) -> StoreResult<bool>;
}

/// Glob match used by `KEYS`: `*` matches any run, `?` one character.
pub fn key_matches(pattern: &str, key: &str) -> bool {
    pattern == "*" || WildMatch::new(pattern).matches(key)
}
