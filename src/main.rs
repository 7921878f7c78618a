//! jkv-cli - command-line client for JKV
//!
//! With a command on the command line it runs that one command and exits.
//! Without one it prompts with the store location and runs each line read
//! from stdin.

use anyhow::Context;
use clap::Parser;
use jkv::commands::CommandHandler;
use jkv::config::{program_name, Config};
use std::io::{self, Write};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    if config.show_version {
        println!("{}", jkv::VERSION);
        return Ok(());
    }

    // Logs go to stderr so they never mix with replies
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("JKV_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let argv0 = std::env::args().next().unwrap_or_default();
    let kind = config.backend_kind(program_name(&argv0));
    let mut backend = config
        .build_backend(kind)
        .context("failed to create backend")?;
    backend
        .open()
        .with_context(|| format!("failed to open store at {}", backend.location()))?;
    debug!(?kind, location = %backend.location(), "Backend ready");

    let location = backend.location();
    let mut handler = CommandHandler::new(backend);
    if config.stdin_value {
        handler = if config.is_prompt() {
            // Commands and values share stdin, so each SET takes one line
            handler.with_value_lines(io::stdin())
        } else {
            handler.with_value_source(io::stdin())
        };
    }

    if config.is_prompt() {
        run_prompt(&mut handler, &location)
    } else {
        run_once(&mut handler, &config.command_line())
    }
}

/// Runs a single command.
fn run_once(handler: &mut CommandHandler, line: &str) -> anyhow::Result<()> {
    if let Some(reply) = handler.execute(line) {
        println!("{}", reply);
    }
    Ok(())
}

/// Prompts with `<location>> ` and runs every line until stdin ends.
///
/// Stdin is locked one line at a time, and a stream-mode SET reads exactly the
/// next line as its value, so commands after it still run in order.
fn run_prompt(handler: &mut CommandHandler, location: &str) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        write!(stdout, "{}> ", location)?;
        stdout.flush()?;

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Error reading input");
                eprintln!("Error reading input: {}", e);
                break;
            }
        }

        if let Some(reply) = handler.execute(&line) {
            writeln!(stdout, "{}", reply)?;
        }
    }

    writeln!(stdout)?;
    Ok(())
}
