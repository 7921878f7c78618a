//! # JKV - A Tiny Key-Value Store with Two Backends
//!
//! JKV stores two shapes of value, scalars and named hashes, behind one small
//! backend contract. A line-oriented dispatcher accepts redis-cli style
//! commands and prints redis-cli style replies, whichever backend is active.
//!
//! ## Features
//!
//! - **Two Value Shapes**: scalar keys and hashes of fields, never sharing a name
//! - **Filesystem Backend**: one file per scalar, one directory per hash
//! - **Remote Backend**: the same contract over RESP to a Redis-compatible server
//! - **Familiar Replies**: `"value"`, `(integer) 1`, `(nil)`, `1) "key"`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                JKV                                      │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────┐     │
//! │  │  jkv-cli    │───>│  Command    │───>│     Box<dyn Backend>     │     │
//! │  │ prompt/once │    │  Handler    │    └────────────┬─────────────┘     │
//! │  └─────────────┘    └─────────────┘                 │                   │
//! │                                        ┌────────────┴────────────┐      │
//! │                                        ▼                         ▼      │
//! │                               ┌─────────────────┐     ┌──────────────┐  │
//! │                               │    FsStore      │     │ RemoteStore  │  │
//! │                               │ scalars/ hashes/│     │ RESP ─> TCP  │  │
//! │                               └─────────────────┘     └──────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use jkv::commands::CommandHandler;
//! use jkv::storage::{Backend, FsStore};
//!
//! let dir = std::env::temp_dir().join(format!("jkv-quickstart-{}", std::process::id()));
//! let mut store = FsStore::new(&dir);
//! store.open().unwrap();
//!
//! let mut handler = CommandHandler::new(Box::new(store));
//! assert_eq!(handler.execute("SET alpha 1").unwrap().to_string(), "OK");
//! assert_eq!(handler.execute("GET alpha").unwrap().to_string(), "\"1\"");
//! assert_eq!(handler.execute("HSET beta f1 x f2 y").unwrap().to_string(), "(integer) 2");
//! handler.execute("FLUSHDB");
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the backend contract, `FsStore` and `RemoteStore`
//! - [`commands`]: the command dispatcher and reply rendering
//! - [`protocol`]: RESP codec used by the remote backend
//! - [`config`]: `jkv-cli` flags and backend selection

pub mod commands;
pub mod config;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandError, CommandHandler, Reply};
pub use config::{BackendKind, Config};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{Backend, FsStore, RemoteStore, StoreError, StoreResult};

/// The default filesystem root
pub const DEFAULT_DB_DIR: &str = "jkv_db";

/// The default remote server address
pub const DEFAULT_ADDR: &str = "localhost:6379";

/// Version of JKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
