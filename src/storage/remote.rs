//! Remote Backend
//!
//! Implements the backend contract against a Redis-compatible server. Each
//! contract call becomes one or more RESP round trips over a single TCP
//! connection.
//!
//! ## Keeping the contract's semantics
//!
//! A Redis server is looser than the contract in a few places, so some calls
//! check the key's `TYPE` first:
//!
//! - `exists` counts only `string` keys, like the filesystem backend counts only scalars
//! - `set` refuses a name that is currently a hash
//! - `hset` refuses a name that is currently a string
//! - `del` only removes `string` keys
//!
//! `hdel` follows up with `HLEN` so it can report the remaining field count.
//!
//! ## Deadlines
//!
//! The store owns a current-thread Tokio runtime. Every round trip runs under
//! `tokio::time::timeout`; when the deadline passes the connection is dropped
//! (its reply stream can no longer be trusted) and the next call reconnects.

use crate::protocol::{RespParser, RespValue};
use crate::storage::backend::{Backend, StoreError, StoreResult, StoreState};
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, trace, warn};

/// Default round-trip deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// One TCP connection plus its reply buffer.
struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    parser: RespParser,
}

impl Connection {
    async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
        })
    }

    /// Sends one request and waits for exactly one reply.
    async fn round_trip(&mut self, request: &RespValue) -> StoreResult<RespValue> {
        self.stream.write_all(&request.serialize()).await?;
        self.stream.flush().await?;

        loop {
            let parsed = self
                .parser
                .parse(&self.buffer)
                .map_err(|e| StoreError::Protocol(e.to_string()))?;
            if let Some((reply, consumed)) = parsed {
                self.buffer.advance(consumed);
                return Ok(reply);
            }

            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }
            let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
            trace!(bytes = n, "Read reply data");
        }
    }
}

/// A store backed by a Redis-compatible server.
pub struct RemoteStore {
    addr: String,
    timeout: Duration,
    runtime: Runtime,
    conn: Mutex<Option<Connection>>,
    state: StoreState,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .finish()
    }
}

impl RemoteStore {
    /// Creates a closed store for the server at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, timeout: Duration) -> io::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Self {
            addr: addr.into(),
            timeout,
            runtime,
            conn: Mutex::new(None),
            state: StoreState::Closed,
        })
    }

    /// The current lifecycle state.
    pub fn state(&self) -> StoreState {
        self.state
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = self
            .runtime
            .block_on(async { tokio::time::timeout(self.timeout, Connection::connect(&self.addr)).await })
            .map_err(|_| StoreError::Timeout(self.timeout))??;
        debug!(addr = %self.addr, "Connected");
        Ok(conn)
    }

    /// Runs one command. Server error replies become `StoreError`s; the second
    /// part (the key, for every command we send) names a `WRONGTYPE` conflict.
    fn call(&self, parts: &[&[u8]]) -> StoreResult<RespValue> {
        self.state.ensure_open()?;

        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::NotOpen);
        };

        let request = RespValue::command(parts);
        let result = self
            .runtime
            .block_on(async { tokio::time::timeout(self.timeout, conn.round_trip(&request)).await });

        let reply = match result {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                *guard = None;
                return Err(e);
            }
            Err(_) => {
                warn!(addr = %self.addr, timeout = ?self.timeout, "Round trip timed out, dropping connection");
                *guard = None;
                return Err(StoreError::Timeout(self.timeout));
            }
        };

        match reply {
            RespValue::Error(msg) if msg.starts_with("WRONGTYPE") => {
                let key = parts
                    .get(1)
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .unwrap_or_default();
                Err(StoreError::TypeConflict(key))
            }
            RespValue::Error(msg) => Err(StoreError::Protocol(msg)),
            reply => Ok(reply),
        }
    }

    fn integer(&self, parts: &[&[u8]]) -> StoreResult<i64> {
        let reply = self.call(parts)?;
        reply
            .as_integer()
            .ok_or_else(|| unexpected(parts[0], &reply))
    }

    fn strings(&self, parts: &[&[u8]]) -> StoreResult<Vec<String>> {
        match self.call(parts)? {
            RespValue::Array(items) => {
                let mut names: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        RespValue::BulkString(b) => Ok(String::from_utf8_lossy(b).into_owned()),
                        other => Err(unexpected(parts[0], other)),
                    })
                    .collect::<StoreResult<_>>()?;
                names.sort();
                names.dedup();
                Ok(names)
            }
            RespValue::Null => Ok(Vec::new()),
            other => Err(unexpected(parts[0], &other)),
        }
    }

    fn key_type(&self, key: &str) -> StoreResult<String> {
        let reply = self.call(&[b"TYPE", key.as_bytes()])?;
        reply
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected(b"TYPE", &reply))
    }
}

fn unexpected(verb: &[u8], reply: &RespValue) -> StoreError {
    StoreError::Protocol(format!(
        "unexpected reply to {}: {:?}",
        String::from_utf8_lossy(verb),
        reply
    ))
}

impl Backend for RemoteStore {
    fn open(&mut self) -> StoreResult<()> {
        self.state = StoreState::Closed;
        if self.conn.get_mut().is_none() {
            let conn = self.connect()?;
            *self.conn.get_mut() = Some(conn);
        }
        self.state = StoreState::Open;
        if let Err(e) = self.ping() {
            self.state = StoreState::Closed;
            *self.conn.get_mut() = None;
            return Err(e);
        }
        debug!(addr = %self.addr, "Store opened");
        Ok(())
    }

    fn close(&mut self) {
        self.state = StoreState::Closed;
        *self.conn.get_mut() = None;
        debug!(addr = %self.addr, "Store closed");
    }

    fn flush_db(&self) {
        if let Err(e) = self.call(&[b"FLUSHDB"]) {
            warn!(addr = %self.addr, error = %e, "FLUSHDB failed");
        }
    }

    fn location(&self) -> String {
        self.addr.clone()
    }

    fn ping(&self) -> StoreResult<String> {
        let reply = self.call(&[b"PING"])?;
        reply
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected(b"PING", &reply))
    }

    fn get(&self, key: &str) -> StoreResult<Bytes> {
        match self.call(&[b"GET", key.as_bytes()])? {
            RespValue::BulkString(data) => Ok(data),
            RespValue::Null => Err(StoreError::NotFound(key.to_string())),
            other => Err(unexpected(b"GET", &other)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        if self.key_type(key)? == "hash" {
            return Err(StoreError::TypeConflict(key.to_string()));
        }
        self.call(&[b"SET", key.as_bytes(), value])?;
        Ok(())
    }

    fn del(&self, keys: &[&str]) -> StoreResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.key_type(key)? != "string" {
                return Err(StoreError::NotFound(key.to_string()));
            }
            if self.integer(&[b"DEL", key.as_bytes()])? == 0 {
                return Err(StoreError::NotFound(key.to_string()));
            }
            removed += 1;
        }
        Ok(removed)
    }

    fn exists(&self, keys: &[&str]) -> StoreResult<usize> {
        let mut count = 0;
        for key in keys {
            if self.key_type(key)? == "string" {
                count += 1;
            }
        }
        Ok(count)
    }

    fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.strings(&[b"KEYS", pattern.as_bytes()])
    }

    fn hget(&self, hash: &str, field: &str) -> StoreResult<Bytes> {
        match self.call(&[b"HGET", hash.as_bytes(), field.as_bytes()])? {
            RespValue::BulkString(data) => Ok(data),
            RespValue::Null => Err(StoreError::NotFound(format!("{}/{}", hash, field))),
            other => Err(unexpected(b"HGET", &other)),
        }
    }

    fn hset(&self, hash: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        if self.key_type(hash)? == "string" {
            return Err(StoreError::TypeConflict(hash.to_string()));
        }
        self.integer(&[b"HSET", hash.as_bytes(), field.as_bytes(), value])?;
        Ok(())
    }

    fn hdel(&self, hash: &str, field: &str) -> StoreResult<usize> {
        if self.integer(&[b"HDEL", hash.as_bytes(), field.as_bytes()])? == 0 {
            return Err(StoreError::NotFound(format!("{}/{}", hash, field)));
        }
        let remaining = self.integer(&[b"HLEN", hash.as_bytes()])?;
        Ok(remaining.max(0) as usize)
    }

    fn hkeys(&self, hash: &str) -> StoreResult<Vec<String>> {
        let fields = self.strings(&[b"HKEYS", hash.as_bytes()])?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(hash.to_string()));
        }
        Ok(fields)
    }

    fn hexists(&self, hash: &str, field: &str) -> StoreResult<bool> {
        Ok(self.integer(&[b"HEXISTS", hash.as_bytes(), field.as_bytes()])? == 1)
    }
}
