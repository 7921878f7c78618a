//! Client Configuration
//!
//! Flags and environment variables for `jkv-cli`. Each flag that names a
//! location can also come from the environment:
//!
//! | Flag            | Environment       | Default          |
//! |-----------------|-------------------|------------------|
//! | `--dir`         | `JKV_DIR`         | `jkv_db`         |
//! | `--addr`        | `JKV_ADDR`        | `localhost:6379` |
//! | `--timeout-ms`  | `JKV_TIMEOUT_MS`  | `5000`           |

use crate::storage::{Backend, FsStore, RemoteStore};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Which backend serves the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Directory tree under `--dir`
    Fs,
    /// Redis-compatible server at `--addr`
    Remote,
}

/// Command-line configuration for `jkv-cli`.
#[derive(Debug, Parser)]
#[command(
    name = "jkv-cli",
    about = "Scalar and hash key-value store on a directory tree or a Redis server",
    version,
    disable_version_flag = true
)]
pub struct Config {
    /// Use the remote (Redis-compatible) backend
    #[arg(short = 'r', conflicts_with = "fs")]
    pub remote: bool,

    /// Use the filesystem backend
    #[arg(short = 'f')]
    pub fs: bool,

    /// Read the SET value from stdin
    #[arg(short = 'x')]
    pub stdin_value: bool,

    /// Root directory of the filesystem backend
    #[arg(short = 'd', long = "dir", env = "JKV_DIR", default_value = crate::DEFAULT_DB_DIR)]
    pub dir: PathBuf,

    /// Address of the remote backend
    #[arg(short = 'a', long = "addr", env = "JKV_ADDR", default_value = crate::DEFAULT_ADDR)]
    pub addr: String,

    /// Round-trip deadline for the remote backend, in milliseconds
    #[arg(long = "timeout-ms", env = "JKV_TIMEOUT_MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    pub show_version: bool,

    /// Run this single command instead of prompting
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Config {
    /// Chooses the backend. Explicit flags win; otherwise running as
    /// `redis-cli` implies the remote backend and anything else the filesystem.
    pub fn backend_kind(&self, program: &str) -> BackendKind {
        if self.remote {
            BackendKind::Remote
        } else if self.fs {
            BackendKind::Fs
        } else if program == "redis-cli" {
            BackendKind::Remote
        } else {
            BackendKind::Fs
        }
    }

    /// True when no command was given on the command line.
    pub fn is_prompt(&self) -> bool {
        self.command.is_empty()
    }

    /// The single-shot command as one line.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Builds a closed backend of the given kind.
    pub fn build_backend(&self, kind: BackendKind) -> io::Result<Box<dyn Backend>> {
        Ok(match kind {
            BackendKind::Fs => Box::new(FsStore::new(&self.dir)),
            BackendKind::Remote => Box::new(RemoteStore::new(&self.addr, self.timeout())?),
        })
    }
}

/// Base name of the executable, as in `argv[0]`.
pub fn program_name(argv0: &str) -> &str {
    argv0.rsplit(['/', '\\']).next().unwrap_or(argv0)
}
