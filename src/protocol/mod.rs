//! RESP Protocol Codec
//!
//! The remote backend speaks the Redis Serialization Protocol (RESP) to its
//! server. This module holds the two halves it needs:
//!
//! - `types`: the `RespValue` enum and request encoding
//! - `parser`: an incremental parser for replies
//!
//! ## Example
//!
//! ```
//! use jkv::protocol::{parse_message, RespValue};
//!
//! let request = RespValue::command(&[b"GET", b"name"]);
//! assert_eq!(request.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
//!
//! let (reply, consumed) = parse_message(b"$3\r\nJoe\r\n").unwrap().unwrap();
//! assert_eq!(reply.as_str(), Some("Joe"));
//! assert_eq!(consumed, 9);
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
