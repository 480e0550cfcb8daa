//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for `bootdbg` using `clap`.
//! The target executables themselves are not CLI arguments: each setup command
//! reads its target path from an environment variable at invocation time
//! (`loader_exe`, `kernel_exe`), matching the contract the debugged programs
//! were built against.

use clap::Parser;
use std::path::PathBuf;

/// Configure GDB for debugging a UEFI bootloader and kernel.
///
/// Runs one of the registered setup commands against a GDB session. By default
/// a fresh `gdb` is spawned in MI mode; pass `--mi` to drive an already-running
/// GDB through an MI channel opened inside it with `new-ui mi <pty>`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Setup command to run (see `setup-bootloader`, `setup-kernel`)
    pub command: String,

    /// Path to an MI channel of a running GDB (created with `new-ui mi <pty>`)
    #[arg(long)]
    pub mi: Option<PathBuf>,

    /// GDB executable to spawn when no --mi channel is given
    #[arg(long, default_value = "gdb")]
    pub gdb: String,

    /// Remote target for a spawned GDB (e.g. "localhost:1234" for a QEMU gdbstub)
    #[arg(long)]
    pub remote: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}
