//! Command Dispatcher Module
//!
//! This module turns text commands into backend calls and renders the
//! results as redis-cli style replies.
//!
//! ## Architecture
//!
//! ```text
//! Input line ("HSET beta f1 x")
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (handler)
//! │                 │
//! │  - Tokenize     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ dyn Backend     │  (storage module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Reply           │  (reply) "(integer) 1"
//! └─────────────────┘
//! ```

pub mod handler;
pub mod reply;

pub use handler::{CommandHandler, MAX_STREAM_VALUE};
pub use reply::{CommandError, Reply};
