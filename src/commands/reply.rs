//! Reply Rendering
//!
//! Every command produces one `Reply`, rendered the same way whichever backend
//! served it:
//!
//! | Reply            | Rendered as                    |
//! |------------------|--------------------------------|
//! | `Status("OK")`   | `OK`                           |
//! | `Str(b"x")`      | `"x"`                          |
//! | `Integer(2)`     | `(integer) 2`                  |
//! | `List([a, b])`   | `1) "a"` / `2) "b"`            |
//! | `List([])`       | `(empty array)`                |
//! | `Nil`            | `(nil)`                        |
//! | `Error(msg)`     | `(error) msg`                  |

use crate::storage::StoreError;
use bytes::Bytes;
use std::fmt;
use std::io;
use thiserror::Error;

/// The outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Bare status text such as `OK` or `PONG`
    Status(String),
    /// A value read from the store
    Str(Bytes),
    Integer(i64),
    List(Vec<String>),
    /// Absence, or any failed read
    Nil,
    Error(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Str(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::List(items) if items.is_empty() => write!(f, "(empty array)"),
            Reply::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) \"{}\"", i + 1, item)?;
                }
                Ok(())
            }
            Reply::Nil => write!(f, "(nil)"),
            Reply::Error(msg) => write!(f, "(error) {}", msg),
        }
    }
}

/// Failures the dispatcher reports as `(error) ...` replies.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR unknown command '{verb}', with args beginning with:{args}")]
    Unknown { verb: String, args: String },

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// The value for a stream-mode SET could not be read
    #[error("ERR reading value: {0}")]
    ReadValue(#[source] io::Error),

    #[error("ERR {0}")]
    Store(#[from] StoreError),
}

impl CommandError {
    /// Builds an unknown-command error quoting the offending token and its arguments.
    pub fn unknown(verb: &str, args: &[&str]) -> Self {
        // Each argument carries its own leading space, so none trails an empty list
        let args: String = args.iter().map(|a| format!(" '{}'", a)).collect();
        CommandError::Unknown {
            verb: verb.to_string(),
            args,
        }
    }
}

impl From<CommandError> for Reply {
    fn from(e: CommandError) -> Self {
        Reply::Error(e.to_string())
    }
}
