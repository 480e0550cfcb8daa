//! Debugger capability surface.
//!
//! The setup commands are written against this trait rather than a concrete
//! debugger, so they can be exercised against a fake session in tests. The
//! production implementation is [`crate::gdb::GdbMi`].

use anyhow::Result;
use std::path::Path;

/// A live debugger session, stopped at a point where its target can be inspected.
pub trait DebuggerSession {
    /// Read a general-purpose register from the current frame.
    ///
    /// Fails when no execution context is available (nothing running, or the
    /// target not stopped); callers must surface that failure rather than
    /// guess a value.
    fn read_register(&mut self, name: &str) -> Result<u64>;

    /// Remove a previously loaded symbol table registered under `path`.
    ///
    /// The underlying debugger does not distinguish "nothing to remove" from
    /// a genuine removal failure, so callers treat any error here as
    /// best-effort cleanup.
    fn remove_symbols(&mut self, path: &Path) -> Result<()>;

    /// Load a symbol table from `path`.
    ///
    /// `anchor` is the runtime address of the code section; `overrides` maps
    /// further section names to their runtime addresses. With `anchor` absent
    /// the debugger uses the file's own embedded addressing (the
    /// non-relocated case) and `overrides` must be empty.
    fn load_symbols(&mut self, path: &Path, anchor: Option<u64>, overrides: &[(String, u64)])
        -> Result<()>;

    /// Assign `value` to a global variable of the debugged program.
    fn set_variable(&mut self, name: &str, value: u64) -> Result<()>;
}
