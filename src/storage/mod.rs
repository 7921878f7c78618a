//! Storage Backends
//!
//! This module holds the backend contract and its two implementations.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────┐
//!                │   trait Backend      │
//!                │  open/close/flush    │
//!                │  get/set/del/...     │
//!                │  hget/hset/hdel/...  │
//!                └──────────┬───────────┘
//!                           │
//!            ┌──────────────┴──────────────┐
//!            ▼                             ▼
//!   ┌─────────────────┐          ┌──────────────────┐
//!   │    FsStore      │          │   RemoteStore    │
//!   │ <root>/scalars  │          │  RESP over TCP   │
//!   │ <root>/hashes   │          │  (Redis server)  │
//!   └─────────────────┘          └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use jkv::storage::{Backend, FsStore, StoreError};
//!
//! let dir = std::env::temp_dir().join(format!("jkv-doc-{}", std::process::id()));
//! let mut store = FsStore::new(&dir);
//! store.open()?;
//!
//! store.hset("user", "name", b"Joe")?;
//! assert!(matches!(store.hset("user", "name", b"x"), Ok(())));
//! store.set("greeting", b"hi")?;
//! assert!(matches!(store.hset("greeting", "f", b"v"), Err(StoreError::TypeConflict(_))));
//!
//! store.flush_db();
//! # Ok::<(), StoreError>(())
//! ```

pub mod backend;
pub mod fs;
pub mod remote;

pub use backend::{key_matches, Backend, StoreError, StoreResult, StoreState};
pub use fs::{FsStore, RootLock};
pub use remote::{RemoteStore, DEFAULT_TIMEOUT};
