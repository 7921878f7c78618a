//! RESP (Redis Serialization Protocol) Values
//!
//! The remote backend talks to its server in RESP. Requests are always arrays
//! of bulk strings; replies can be any of the types below.
//!
//! ## Wire Format
//!
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-WRONGTYPE Operation against a key\r\n`
//! - `:` Integer: `:1\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n` (null: `$-1\r\n`)
//! - `*` Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n` (null: `*-1\r\n`)

use bytes::{BufMut, Bytes, BytesMut};

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status reply such as `OK` or `PONG`
    SimpleString(String),

    /// Error reply; the first word is the error kind (`ERR`, `WRONGTYPE`, ...)
    Error(String),

    /// 64-bit signed integer
    Integer(i64),

    /// Binary-safe string
    BulkString(Bytes),

    /// Null bulk string or null array
    Null,

    /// Ordered list of values
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Builds a request: an array of bulk strings, verb first.
    ///
    /// # Example
    /// ```
    /// use jkv::protocol::RespValue;
    /// let req = RespValue::command(&[b"HGET", b"user", b"name"]);
    /// assert_eq!(req.serialize(), b"*3\r\n$4\r\nHGET\r\n$4\r\nuser\r\n$4\r\nname\r\n");
    /// ```
    pub fn command(parts: &[&[u8]]) -> Self {
        RespValue::Array(
            parts
                .iter()
                .map(|p| RespValue::BulkString(Bytes::copy_from_slice(p)))
                .collect(),
        )
    }

    /// Serializes the value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.to_vec()
    }

    /// Serializes the value onto the end of `buf`.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Returns the text of a status or UTF-8 bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

fn write_line(buf: &mut BytesMut, tag: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(tag);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}
