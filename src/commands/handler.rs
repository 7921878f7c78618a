//! Command Dispatcher
//!
//! Turns one line of text into one backend call and one `Reply`.
//!
//! ## Supported Commands
//!
//! ### Scalar Commands
//! - `GET key` - Get a key's value
//! - `SET key value` - Set a key (`SET key` reads the value from the bound stream)
//! - `DEL key` - Delete a key
//! - `EXISTS key` - Check if a key exists
//! - `KEYS pattern` - List scalar and hash names matching a glob
//!
//! ### Hash Commands
//! - `HGET hash field` - Get a field's value
//! - `HSET hash field value [field value ...]` - Set fields
//! - `HDEL hash field` - Delete a field, reply with the fields left
//! - `HKEYS hash` - List a hash's fields
//! - `HEXISTS hash field` - Check if a field exists
//!
//! ### Server Commands
//! - `PING [message]` - Test the backend
//! - `FLUSHDB` - Remove everything
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ tokenize()  │───>│ dispatch()  │───>│  cmd_*()    │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                       Box<dyn Backend>      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A bad command never ends the session: arity problems, unknown verbs and
//! backend failures all come back as a reply.

use crate::commands::reply::{CommandError, Reply};
use crate::storage::{Backend, StoreError};
use bytes::Bytes;
use std::io::{self, Read};
use tracing::{debug, warn};

/// Largest value a stream-mode SET accepts in one read (1 MiB).
pub const MAX_STREAM_VALUE: usize = 1024 * 1024;

/// Where stream-mode SET takes its value from.
enum ValueSource {
    /// One read takes whatever the input holds
    Whole(Box<dyn Read + Send>),
    /// One line per SET; the rest of the input is left unread
    Line(Box<dyn Read + Send>),
}

/// Routes text commands to one backend for the life of the handler.
pub struct CommandHandler {
    /// The active backend
    backend: Box<dyn Backend>,
    /// Where stream-mode SET reads its value from, if bound
    value_source: Option<ValueSource>,
}

impl CommandHandler {
    /// Creates a handler over an already opened backend.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            value_source: None,
        }
    }

    /// Switches `SET` to stream mode: `SET key` takes its value from `source`.
    pub fn with_value_source(mut self, source: impl Read + Send + 'static) -> Self {
        self.value_source = Some(ValueSource::Whole(Box::new(source)));
        self
    }

    /// Stream mode for input that also carries commands: each `SET key` takes
    /// exactly one line from `source`, and later lines stay for the caller.
    pub fn with_value_lines(mut self, source: impl Read + Send + 'static) -> Self {
        self.value_source = Some(ValueSource::Line(Box::new(source)));
        self
    }

    /// The active backend.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Executes one line and returns its reply.
    ///
    /// Returns `None` when there is nothing to print: a blank line, or a
    /// stream-mode SET whose input had already ended.
    pub fn execute(&mut self, line: &str) -> Option<Reply> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let verb = tokens.first()?;
        debug!(verb = %verb, args = tokens.len() - 1, "Dispatching command");
        self.dispatch(&verb.to_uppercase(), &tokens)
    }

    /// Dispatches a command to its handler. `tokens` still includes the verb.
    fn dispatch(&mut self, verb: &str, tokens: &[&str]) -> Option<Reply> {
        let reply = match verb {
            // Scalar commands
            "GET" => self.cmd_get(tokens),
            "SET" => return self.cmd_set(tokens),
            "DEL" => self.cmd_del(tokens),
            "EXISTS" => self.cmd_exists(tokens),
            "KEYS" => self.cmd_keys(tokens),

            // Hash commands
            "HGET" => self.cmd_hget(tokens),
            "HSET" => self.cmd_hset(tokens),
            "HDEL" => self.cmd_hdel(tokens),
            "HKEYS" => self.cmd_hkeys(tokens),
            "HEXISTS" => self.cmd_hexists(tokens),

            // Server commands
            "PING" => self.cmd_ping(tokens),
            "FLUSHDB" => self.cmd_flushdb(tokens),

            _ => CommandError::unknown(tokens[0], &tokens[1..]).into(),
        };
        Some(reply)
    }

    // ========================================================================
    // Scalar Commands
    // ========================================================================

    /// GET key
    fn cmd_get(&self, tokens: &[&str]) -> Reply {
        if tokens.len() != 2 {
            return Reply::Nil;
        }
        match self.backend.get(tokens[1]) {
            Ok(value) => Reply::Str(value),
            Err(_) => Reply::Nil,
        }
    }

    /// SET key value, or SET key in stream mode
    fn cmd_set(&mut self, tokens: &[&str]) -> Option<Reply> {
        let streaming = self.value_source.is_some();
        let expected = if streaming { 2 } else { 3 };
        if tokens.len() != expected {
            return Some(CommandError::WrongArity("set").into());
        }

        let value = if streaming {
            match self.read_value() {
                Ok(Some(value)) => value,
                Ok(None) => {
                    debug!(key = %tokens[1], "Value stream ended, SET skipped");
                    return None;
                }
                Err(e) => {
                    warn!(key = %tokens[1], error = %e, "Failed to read value");
                    return Some(CommandError::ReadValue(e).into());
                }
            }
        } else {
            tokens[2].as_bytes().to_vec()
        };

        Some(match self.backend.set(tokens[1], &value) {
            Ok(()) => Reply::ok(),
            Err(_) => Reply::Nil,
        })
    }

    /// The next value from the value source, minus a trailing line ending.
    ///
    /// `Ok(None)` means the source is at end-of-input.
    fn read_value(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = match self.value_source.as_mut() {
            None => return Ok(None),
            Some(ValueSource::Whole(source)) => read_once(source)?,
            Some(ValueSource::Line(source)) => read_line(source)?,
        };
        if buf.is_empty() {
            return Ok(None);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }

    /// DEL key
    fn cmd_del(&self, tokens: &[&str]) -> Reply {
        if tokens.len() != 2 {
            return Reply::Nil;
        }
        match self.backend.del(&tokens[1..]) {
            Ok(_) => Reply::Str(Bytes::new()),
            Err(_) => Reply::Nil,
        }
    }

    /// EXISTS key
    fn cmd_exists(&self, tokens: &[&str]) -> Reply {
        if tokens.len() != 2 {
            return CommandError::WrongArity("exists").into();
        }
        Reply::Integer(self.backend.exists(&tokens[1..]).unwrap_or(0) as i64)
    }

    /// KEYS pattern
    fn cmd_keys(&self, tokens: &[&str]) -> Reply {
        if tokens.len() != 2 {
            return CommandError::WrongArity("keys").into();
        }
        match self.backend.keys(tokens[1]) {
            Ok(keys) => Reply::List(keys),
            Err(_) => Reply::Nil,
        }
    }

    // ========================================================================
    // Hash Commands
    // ========================================================================

    /// HGET hash field
    fn cmd_hget(&self, tokens: &[&str]) -> Reply {
        if tokens.len() != 3 {
            return Reply::Nil;
        }
        match self.backend.hget(tokens[1], tokens[2]) {
            Ok(value) => Reply::Str(value),
            Err(_) => Reply::Nil,
        }
    }

    /// HSET hash field value [field value ...]
    fn cmd_hset(&self, tokens: &[&str]) -> Reply {
        if tokens.len() < 3 {
            return Reply::Nil;
        }

        let hash = tokens[1];
        // The backend guards this too; checking here keeps a conflicting
        // HSET from reaching any field write.
        if matches!(self.backend.exists(&[hash]), Ok(n) if n > 0) {
            return CommandError::WrongType.into();
        }

        let pairs = &tokens[2..];
        if pairs.len() < 2 || pairs.len() % 2 != 0 {
            return CommandError::WrongArity("hset").into();
        }

        let mut written = 0;
        for pair in pairs.chunks_exact(2) {
            match self.backend.hset(hash, pair[0], pair[1].as_bytes()) {
                Ok(()) => written += 1,
                Err(StoreError::TypeConflict(_)) => return CommandError::WrongType.into(),
                Err(e) => {
                    debug!(hash = %hash, written, error = %e, "HSET stopped early");
                    return CommandError::Store(e).into();
                }
            }
        }
        Reply::Integer(written)
    }

    /// HDEL hash field
    fn cmd_hdel(&self, tokens: &[&str]) -> Reply {
        if tokens.len() != 3 {
            return Reply::Nil;
        }
        match self.backend.hdel(tokens[1], tokens[2]) {
            Ok(remaining) => Reply::Integer(remaining as i64),
            Err(_) => Reply::Nil,
        }
    }

    /// HKEYS hash
    fn cmd_hkeys(&self, tokens: &[&str]) -> Reply {
        if tokens.len() != 2 {
            return CommandError::WrongArity("hkeys").into();
        }
        match self.backend.hkeys(tokens[1]) {
            Ok(fields) => Reply::List(fields),
            Err(_) => Reply::Nil,
        }
    }

    /// HEXISTS hash field
    fn cmd_hexists(&self, tokens: &[&str]) -> Reply {
        if tokens.len() != 3 {
            return CommandError::WrongArity("hexists").into();
        }
        let exists = self.backend.hexists(tokens[1], tokens[2]).unwrap_or(false);
        Reply::Integer(exists as i64)
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, tokens: &[&str]) -> Reply {
        match tokens.len() {
            1 => match self.backend.ping() {
                Ok(status) => Reply::Status(status),
                Err(_) => Reply::Nil,
            },
            2 => Reply::Str(tokens[1].to_string().into()),
            _ => CommandError::WrongArity("ping").into(),
        }
    }

    /// FLUSHDB
    fn cmd_flushdb(&mut self, tokens: &[&str]) -> Reply {
        if tokens.len() != 1 {
            return CommandError::Syntax.into();
        }
        self.backend.flush_db();
        // Keep the session usable: recreate the structure flush_db removed.
        if let Err(e) = self.backend.open() {
            warn!(location = %self.backend.location(), error = %e, "Reopen after FLUSHDB failed");
        }
        Reply::ok()
    }
}

/// A single read of up to `MAX_STREAM_VALUE` bytes.
fn read_once(source: &mut dyn Read) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_STREAM_VALUE];
    let n = loop {
        match source.read(&mut buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => break other?,
        }
    };
    buf.truncate(n);
    Ok(buf)
}

/// Bytes up to and including the next newline, at most `MAX_STREAM_VALUE`.
///
/// Reads one byte at a time: any buffering here would swallow the lines after
/// the value, which belong to the caller.
fn read_line(source: &mut dyn Read) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while buf.len() < MAX_STREAM_VALUE {
        match source.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                buf.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStore;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn create_handler() -> (TempDir, CommandHandler) {
        let dir = TempDir::new().unwrap();
        let mut store = FsStore::new(dir.path().join("db"));
        store.open().unwrap();
        (dir, CommandHandler::new(Box::new(store)))
    }

    fn run(handler: &mut CommandHandler, line: &str) -> String {
        handler
            .execute(line)
            .map(|r| r.to_string())
            .unwrap_or_default()
    }

    /// A reader that always fails.
    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn test_blank_line_is_silent() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(handler.execute(""), None);
        assert_eq!(handler.execute("   \t "), None);
    }

    #[test]
    fn test_set_get() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(run(&mut handler, "SET key value"), "OK");
        assert_eq!(run(&mut handler, "GET key"), "\"value\"");
        assert_eq!(handler.execute("get key"), Some(Reply::Str(Bytes::from("value"))));
    }

    #[test]
    fn test_get_nonexistent() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(run(&mut handler, "GET nonexistent"), "(nil)");
        assert_eq!(run(&mut handler, "GET"), "(nil)");
    }

    #[test]
    fn test_set_arity() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(
            run(&mut handler, "SET key"),
            "(error) ERR wrong number of arguments for 'set' command"
        );
        assert_eq!(
            run(&mut handler, "SET key a b"),
            "(error) ERR wrong number of arguments for 'set' command"
        );
    }

    #[test]
    fn test_set_over_hash_is_nil() {
        let (_dir, mut handler) = create_handler();
        run(&mut handler, "HSET h f v");
        assert_eq!(run(&mut handler, "SET h 1"), "(nil)");
    }

    #[test]
    fn test_del() {
        let (_dir, mut handler) = create_handler();
        run(&mut handler, "SET key1 value1");
        assert_eq!(run(&mut handler, "DEL key1"), "\"\"");
        assert_eq!(run(&mut handler, "DEL key1"), "(nil)");
        assert_eq!(run(&mut handler, "EXISTS key1"), "(integer) 0");
    }

    #[test]
    fn test_exists() {
        let (_dir, mut handler) = create_handler();
        run(&mut handler, "SET key1 value1");
        assert_eq!(run(&mut handler, "EXISTS key1"), "(integer) 1");
        assert_eq!(run(&mut handler, "EXISTS nonexistent"), "(integer) 0");
        assert_eq!(
            run(&mut handler, "EXISTS a b"),
            "(error) ERR wrong number of arguments for 'exists' command"
        );
    }

    #[test]
    fn test_keys() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(run(&mut handler, "KEYS *"), "(empty array)");
        run(&mut handler, "SET b 1");
        run(&mut handler, "HSET a f v");
        assert_eq!(run(&mut handler, "KEYS *"), "1) \"a\"\n2) \"b\"");
        assert_eq!(
            run(&mut handler, "KEYS"),
            "(error) ERR wrong number of arguments for 'keys' command"
        );
    }

    #[test]
    fn test_hset_pairs() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(run(&mut handler, "HSET beta f1 x f2 y"), "(integer) 2");
        assert_eq!(run(&mut handler, "HGET beta f2"), "\"y\"");
        assert_eq!(run(&mut handler, "HKEYS beta"), "1) \"f1\"\n2) \"f2\"");
    }

    #[test]
    fn test_hset_arity() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(run(&mut handler, "HSET h"), "(nil)");
        assert_eq!(
            run(&mut handler, "HSET h f"),
            "(error) ERR wrong number of arguments for 'hset' command"
        );
        assert_eq!(
            run(&mut handler, "HSET h f v g"),
            "(error) ERR wrong number of arguments for 'hset' command"
        );
        assert_eq!(run(&mut handler, "HKEYS h"), "(nil)");
    }

    #[test]
    fn test_hset_wrongtype_writes_nothing() {
        let (dir, mut handler) = create_handler();
        run(&mut handler, "SET alpha 1");
        assert_eq!(
            run(&mut handler, "HSET alpha z 1"),
            "(error) WRONGTYPE Operation against a key holding the wrong kind of value"
        );
        assert!(!dir.path().join("db/hashes/alpha").exists());
    }

    #[test]
    fn test_hset_stops_at_first_failure() {
        let (_dir, mut handler) = create_handler();
        let reply = run(&mut handler, "HSET h ok 1 bad/field 2 later 3");
        assert!(reply.starts_with("(error) ERR invalid key"), "{}", reply);
        assert_eq!(run(&mut handler, "HKEYS h"), "1) \"ok\"");
    }

    #[test]
    fn test_hdel() {
        let (_dir, mut handler) = create_handler();
        run(&mut handler, "HSET h a 1 b 2");
        assert_eq!(run(&mut handler, "HDEL h a"), "(integer) 1");
        assert_eq!(run(&mut handler, "HDEL h b"), "(integer) 0");
        assert_eq!(run(&mut handler, "HDEL h b"), "(nil)");
        assert_eq!(run(&mut handler, "HDEL h"), "(nil)");
        assert_eq!(run(&mut handler, "HKEYS h"), "(nil)");
    }

    #[test]
    fn test_hexists() {
        let (_dir, mut handler) = create_handler();
        run(&mut handler, "HSET h a 1");
        assert_eq!(run(&mut handler, "HEXISTS h a"), "(integer) 1");
        assert_eq!(run(&mut handler, "HEXISTS h z"), "(integer) 0");
        assert_eq!(
            run(&mut handler, "HEXISTS h"),
            "(error) ERR wrong number of arguments for 'hexists' command"
        );
    }

    #[test]
    fn test_ping() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(run(&mut handler, "PING"), "PONG");
        assert_eq!(run(&mut handler, "ping hello"), "\"hello\"");
    }

    #[test]
    fn test_flushdb() {
        let (_dir, mut handler) = create_handler();
        run(&mut handler, "SET key1 value1");
        run(&mut handler, "HSET h f v");
        assert_eq!(run(&mut handler, "FLUSHDB"), "OK");
        assert_eq!(run(&mut handler, "KEYS *"), "(empty array)");

        // Still usable afterwards
        assert_eq!(run(&mut handler, "SET key2 v"), "OK");
        assert_eq!(run(&mut handler, "FLUSHDB now"), "(error) ERR syntax error");
    }

    #[test]
    fn test_unknown_command() {
        let (_dir, mut handler) = create_handler();
        assert_eq!(
            run(&mut handler, "frobnicate a b"),
            "(error) ERR unknown command 'frobnicate', with args beginning with: 'a' 'b'"
        );
    }

    #[test]
    fn test_closed_backend_replies_nil() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path().join("db"));
        let mut handler = CommandHandler::new(Box::new(store));
        assert_eq!(run(&mut handler, "GET a"), "(nil)");
        assert_eq!(run(&mut handler, "SET a 1"), "(nil)");
        assert_eq!(run(&mut handler, "EXISTS a"), "(integer) 0");
    }

    #[test]
    fn test_stream_set() {
        let (_dir, handler) = create_handler();
        let mut handler = handler.with_value_source(Cursor::new(b"line one\n".to_vec()));
        assert_eq!(run(&mut handler, "SET k"), "OK");
        assert_eq!(run(&mut handler, "GET k"), "\"line one\"");
        assert_eq!(
            run(&mut handler, "SET k v"),
            "(error) ERR wrong number of arguments for 'set' command"
        );
    }

    #[test]
    fn test_stream_set_at_eof_is_silent() {
        let (_dir, handler) = create_handler();
        let mut handler = handler.with_value_source(Cursor::new(Vec::new()));
        assert_eq!(handler.execute("SET k"), None);
        assert_eq!(run(&mut handler, "EXISTS k"), "(integer) 0");
    }

    #[test]
    fn test_line_values_leave_later_commands_unread() {
        let (_dir, handler) = create_handler();
        let input = Cursor::new(b"hello\nGET k\nworld\r\n".to_vec());
        let mut handler = handler.with_value_lines(input);

        assert_eq!(run(&mut handler, "SET k"), "OK");
        assert_eq!(run(&mut handler, "GET k"), "\"hello\"");

        // The next SET takes the next line, not the rest of the input
        assert_eq!(run(&mut handler, "SET cmd"), "OK");
        assert_eq!(run(&mut handler, "GET cmd"), "\"GET k\"");
        assert_eq!(run(&mut handler, "SET w"), "OK");
        assert_eq!(run(&mut handler, "GET w"), "\"world\"");

        assert_eq!(handler.execute("SET k"), None);
        assert_eq!(run(&mut handler, "GET k"), "\"hello\"");
    }

    #[test]
    fn test_line_value_without_newline_at_eof() {
        let (_dir, handler) = create_handler();
        let mut handler = handler.with_value_lines(Cursor::new(b"last".to_vec()));
        assert_eq!(run(&mut handler, "SET k"), "OK");
        assert_eq!(run(&mut handler, "GET k"), "\"last\"");
    }

    #[test]
    fn test_stream_set_read_error() {
        let (_dir, handler) = create_handler();
        let mut handler = handler.with_value_source(Broken);
        let reply = run(&mut handler, "SET k");
        assert!(reply.starts_with("(error) ERR reading value"), "{}", reply);
        // The session carries on
        assert_eq!(run(&mut handler, "PING"), "PONG");
    }
}
