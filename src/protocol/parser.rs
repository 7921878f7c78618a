//! Incremental RESP Reply Parser
//!
//! The parser works on whatever bytes have arrived so far and reports one of:
//! - `Ok(Some((value, consumed)))` - a full value; drop `consumed` bytes from the buffer
//! - `Ok(None)` - the value is incomplete, read more and try again
//! - `Err(ParseError)` - the server sent something that is not RESP
//!
//! Nothing is consumed until a whole value is available, so a reply split
//! across several socket reads parses the same as one that arrived at once.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer or length field
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than the -1 null marker
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Protocol violation (missing CRLF, nesting too deep)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The value exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// A RESP parser that tolerates partial input.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one value from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        // Every type starts with a header line
        let Some((line, header_len)) = read_line(&buf[1..]) else {
            return Ok(None);
        };
        let header_len = header_len + 1;

        match tag {
            prefix::SIMPLE_STRING => {
                Ok(Some((RespValue::SimpleString(utf8(line)?), header_len)))
            }
            prefix::ERROR => Ok(Some((RespValue::Error(utf8(line)?), header_len))),
            prefix::INTEGER => Ok(Some((RespValue::Integer(integer(line)?), header_len))),
            prefix::BULK_STRING => self.parse_bulk(buf, line, header_len),
            prefix::ARRAY => self.parse_array(buf, line, header_len),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// `$<len>\r\n<data>\r\n`
    fn parse_bulk(
        &mut self,
        buf: &[u8],
        header: &[u8],
        header_len: usize,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(len) = length(header)? else {
            return Ok(Some((RespValue::Null, header_len)));
        };
        if len > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let total = header_len + len + CRLF.len();
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[header_len + len..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// `*<count>\r\n<elements...>`
    fn parse_array(
        &mut self,
        buf: &[u8],
        header: &[u8],
        header_len: usize,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(count) = length(header)? else {
            return Ok(Some((RespValue::Null, header_len)));
        };

        let mut elements = Vec::with_capacity(count.min(1024));
        let mut consumed = header_len;

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Splits off the bytes before the first CRLF; the count includes the CRLF.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    buf.windows(2)
        .position(|w| w == CRLF)
        .map(|pos| (&buf[..pos], pos + CRLF.len()))
}

fn utf8(bytes: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn integer(bytes: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(bytes).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(format!("{s:?}: {e}")))
}

/// Length field: `None` for the `-1` null marker.
fn length(bytes: &[u8]) -> ParseResult<Option<usize>> {
    match integer(bytes)? {
        -1 => Ok(None),
        n if n < 0 => Err(ParseError::InvalidLength(n)),
        n => Ok(Some(n as usize)),
    }
}

/// Parses a single value with a fresh parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
