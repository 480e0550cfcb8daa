//! Entry point for the bootdbg tool.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Initialize `tracing` output at the requested level.
//! 3. Open a GDB/MI session, either over an existing channel or by spawning
//!    a private `gdb`.
//! 4. Look the requested command up in the registry and invoke it.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bootdbg::commands;
use bootdbg::config::Config;
use bootdbg::gdb::GdbMi;

fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level)
                .with_context(|| format!("invalid log level {:?}", config.log_level))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let command = commands::find(&config.command).with_context(|| {
        let known: Vec<&str> = commands::COMMANDS.iter().map(|c| c.name).collect();
        format!(
            "unknown command {:?} (available: {})",
            config.command,
            known.join(", ")
        )
    })?;

    let mut session = match &config.mi {
        Some(channel) => GdbMi::connect(channel)?,
        None => GdbMi::spawn(&config.gdb, config.remote.as_deref())?,
    };

    command.invoke(&mut session)
}
