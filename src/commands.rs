//! The operator-invocable setup commands.
//!
//! Two commands, structurally identical: `setup-bootloader` maps a relocated
//! UEFI loader's sections to their runtime addresses before loading symbols,
//! `setup-kernel` loads the kernel's symbols at the addresses it was linked
//! at. Both finish by setting a flag variable the debugged program polls to
//! detect that a debugger is attached.
//!
//! Target paths come from the environment at invocation time, so the operator
//! can retarget between runs without restarting anything.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::pe::{self, SectionMap};
use crate::session::DebuggerSession;

/// Environment variable naming the bootloader PE image.
pub const LOADER_EXE_ENV: &str = "loader_exe";
/// Environment variable naming the kernel image.
pub const KERNEL_EXE_ENV: &str = "kernel_exe";

/// Register the bootloader parks its runtime load base in before waiting for
/// the debugger. Part of the calling convention shared with the target.
pub const LOADER_BASE_REGISTER: &str = "r13";

/// Flag polled by the bootloader to detect an attached debugger.
pub const LOADER_ATTACHED_FLAG: &str = "DEBUGGER_ATTACHED";
/// Flag polled by the kernel to detect an attached debugger.
pub const KERNEL_ATTACHED_FLAG: &str = "KERNEL_DEBUGGER_ATTACHED";

/// The section whose address anchors a relocated symbol table.
const CODE_SECTION: &str = ".text";

/// Everything that determines one symbol-load request.
pub struct LoadContext {
    path: PathBuf,
    /// Runtime load base for a relocated image, `None` when the file's own
    /// addressing already matches runtime addresses.
    base: Option<u64>,
    sections: SectionMap,
}

impl LoadContext {
    /// Context for an image relocated to `base`, with its sections mapped.
    pub fn relocated(path: PathBuf, base: u64, sections: SectionMap) -> Self {
        Self {
            path,
            base: Some(base),
            sections,
        }
    }

    /// Context for an image debugged at the addresses it was linked at.
    pub fn in_place(path: PathBuf) -> Self {
        Self {
            path,
            base: None,
            sections: SectionMap::new(),
        }
    }
}

/// Replace any stale symbol table for the context's file, load the new one,
/// then raise the attachment flag.
///
/// Removal is best-effort cleanup: the debugger does not distinguish "nothing
/// to remove" from a real removal failure, so errors here are logged and
/// swallowed. A failed load aborts before the flag is touched, so the target
/// keeps observing "not attached".
pub fn attach(session: &mut dyn DebuggerSession, context: &LoadContext, flag: &str) -> Result<()> {
    if let Err(error) = session.remove_symbols(&context.path) {
        tracing::debug!(
            "no stale symbol table removed for {}: {:#}",
            context.path.display(),
            error
        );
    }

    let (anchor, overrides) = match context.base {
        Some(_) => {
            let anchor = context.sections.get(CODE_SECTION).with_context(|| {
                format!(
                    "{} has no {} section to anchor the symbol table on",
                    context.path.display(),
                    CODE_SECTION
                )
            })?;
            let overrides: Vec<(String, u64)> = context
                .sections
                .iter()
                .filter(|&(name, _)| name != CODE_SECTION)
                .map(|(name, address)| (name.to_owned(), address))
                .collect();
            (Some(anchor), overrides)
        }
        None => (None, Vec::new()),
    };
    session.load_symbols(&context.path, anchor, &overrides)?;
    session.set_variable(flag, 1)?;
    Ok(())
}

/// Configure the session for debugging the UEFI bootloader.
pub fn setup_bootloader(session: &mut dyn DebuggerSession) -> Result<()> {
    let path = target_from_env(LOADER_EXE_ENV)?;
    run_bootloader(session, &path)
}

fn run_bootloader(session: &mut dyn DebuggerSession, path: &Path) -> Result<()> {
    let base = session.read_register(LOADER_BASE_REGISTER)?;
    tracing::info!("UEFI loader {} at {:#x}", path.display(), base);
    let sections = pe::read_sections(path, base)?;
    let context = LoadContext::relocated(path.to_owned(), base, sections);
    attach(session, &context, LOADER_ATTACHED_FLAG)
}

/// Configure the session for debugging the kernel.
pub fn setup_kernel(session: &mut dyn DebuggerSession) -> Result<()> {
    let path = target_from_env(KERNEL_EXE_ENV)?;
    tracing::info!("kernel {} at its linked addresses", path.display());
    // The kernel isn't relocatable, so the file's addressing is used as-is.
    let context = LoadContext::in_place(path);
    attach(session, &context, KERNEL_ATTACHED_FLAG)
}

fn target_from_env(variable: &str) -> Result<PathBuf> {
    match std::env::var_os(variable) {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => bail!(
            "environment variable `{variable}` is not set; point it at the executable to debug"
        ),
    }
}

/// An operator-invocable command.
pub struct Command {
    pub name: &'static str,
    pub description: &'static str,
    run: fn(&mut dyn DebuggerSession) -> Result<()>,
}

impl Command {
    pub fn invoke(&self, session: &mut dyn DebuggerSession) -> Result<()> {
        (self.run)(session)
    }
}

/// All registered commands.
pub const COMMANDS: &[Command] = &[
    Command {
        name: "setup-bootloader",
        description: "Configure the debugger for debugging the UEFI bootloader",
        run: setup_bootloader,
    },
    Command {
        name: "setup-kernel",
        description: "Configure the debugger for debugging the kernel",
        run: setup_kernel,
    },
];

/// Look a command up by its registered name.
pub fn find(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|command| command.name == name)
}
