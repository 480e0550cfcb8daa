//! GDB/MI transport.
//!
//! Implements [`DebuggerSession`] on top of GDB's machine interface. Two ways
//! to get a channel:
//! - [`GdbMi::connect`] opens an MI channel of an already-running GDB,
//!   created inside that GDB with `new-ui mi <pty>`. This is the usual mode:
//!   the operator keeps their interactive session and this tool slips the
//!   symbol tables in from the side.
//! - [`GdbMi::spawn`] starts a private `gdb --interpreter=mi2`, optionally
//!   attached to a remote gdbstub. Mostly useful for scripted sessions.
//!
//! MI is line-oriented: a command gets stream/async records (skipped here,
//! traced for visibility), then one result record (`^done`, `^error,msg=...`),
//! then the `(gdb)` prompt.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Stdio};

use crate::session::DebuggerSession;

/// A GDB session driven over its machine interface.
pub struct GdbMi {
    reader: BufReader<Box<dyn Read>>,
    writer: Box<dyn Write>,
    child: Option<Child>,
}

impl GdbMi {
    fn new(reader: Box<dyn Read>, writer: Box<dyn Write>, child: Option<Child>) -> Result<Self> {
        let mut session = Self {
            reader: BufReader::new(reader),
            writer,
            child,
        };
        // add-symbol-file and remove-symbol-file ask for confirmation;
        // there is nobody on this channel to answer.
        session.execute("-gdb-set confirm off")?;
        Ok(session)
    }

    /// Attach to the MI channel of a running GDB (see `new-ui mi <pty>`).
    pub fn connect(path: &Path) -> Result<Self> {
        let channel = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open MI channel {}", path.display()))?;
        let reader = channel
            .try_clone()
            .with_context(|| format!("failed to clone MI channel {}", path.display()))?;
        Self::new(Box::new(reader), Box::new(channel), None)
    }

    /// Spawn a private GDB in MI mode, optionally targeting a remote gdbstub.
    pub fn spawn(gdb: &str, remote: Option<&str>) -> Result<Self> {
        let mut child = std::process::Command::new(gdb)
            .args(["--interpreter=mi2", "--nx", "--quiet"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {gdb}"))?;
        let stdin = child.stdin.take().context("gdb stdin unavailable")?;
        let stdout = child.stdout.take().context("gdb stdout unavailable")?;
        let mut session = Self::new(Box::new(stdout), Box::new(stdin), Some(child))?;
        if let Some(remote) = remote {
            session
                .execute(&format!("-target-select remote {remote}"))
                .with_context(|| format!("failed to attach to remote target {remote}"))?;
        }
        Ok(session)
    }

    /// Send one MI command and collect its result record's payload.
    fn execute(&mut self, command: &str) -> Result<String> {
        tracing::trace!("mi <- {}", command);
        writeln!(self.writer, "{command}")?;
        self.writer.flush()?;

        let mut result: Option<Result<String>> = None;
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                bail!("gdb closed the MI channel");
            }
            let line = line.trim_end();
            if line == "(gdb)" {
                // Prompts seen before our result record belong to earlier
                // output (e.g. the startup banner); skip them.
                if let Some(result) = result.take() {
                    return result;
                }
                continue;
            }
            if line.starts_with('^') {
                result = Some(parse_result_record(line));
            } else {
                tracing::trace!("mi -> {}", line);
            }
        }
    }

    /// Run a console command through the MI channel.
    fn console(&mut self, command: &str) -> Result<String> {
        tracing::debug!("gdb: {}", command);
        self.execute(&format!(
            "-interpreter-exec console \"{}\"",
            escape_console(command)
        ))
    }
}

impl DebuggerSession for GdbMi {
    fn read_register(&mut self, name: &str) -> Result<u64> {
        // The cast keeps GDB from printing a signed value for wide registers.
        let payload =
            self.execute(&format!("-data-evaluate-expression \"(unsigned long long)${name}\""))?;
        let value = mi_field(&payload, "value")
            .with_context(|| format!("malformed MI response for ${name}: {payload:?}"))?;
        parse_u64(&value)
            .with_context(|| format!("register ${name} evaluated to a non-numeric {value:?}"))
    }

    fn remove_symbols(&mut self, path: &Path) -> Result<()> {
        self.console(&format!("remove-symbol-file {}", path.display()))?;
        Ok(())
    }

    fn load_symbols(
        &mut self,
        path: &Path,
        anchor: Option<u64>,
        overrides: &[(String, u64)],
    ) -> Result<()> {
        self.console(&render_load_command(path, anchor, overrides))?;
        Ok(())
    }

    fn set_variable(&mut self, name: &str, value: u64) -> Result<()> {
        self.execute(&format!("-gdb-set var {name}={value}"))?;
        Ok(())
    }
}

impl Drop for GdbMi {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = writeln!(self.writer, "-gdb-exit");
            let _ = self.writer.flush();
            let _ = child.wait();
        }
    }
}

/// Render the `add-symbol-file` console command for a load request.
fn render_load_command(path: &Path, anchor: Option<u64>, overrides: &[(String, u64)]) -> String {
    let mut command = format!("add-symbol-file {}", path.display());
    if let Some(anchor) = anchor {
        let _ = write!(command, " {anchor:#x}");
    }
    for (name, address) in overrides {
        let _ = write!(command, " -s {name} {address:#x}");
    }
    command
}

/// Interpret an MI result record (`^done`, `^error,msg=...`, ...).
fn parse_result_record(line: &str) -> Result<String> {
    if let Some(rest) = line.strip_prefix("^done") {
        return Ok(rest.strip_prefix(',').unwrap_or("").to_owned());
    }
    if line.starts_with("^running") || line.starts_with("^connected") {
        return Ok(String::new());
    }
    if let Some(rest) = line.strip_prefix("^error") {
        let message = mi_field(rest, "msg").unwrap_or_else(|| rest.to_owned());
        return Err(anyhow!("gdb: {message}"));
    }
    bail!("unrecognized MI result record: {line}")
}

/// Extract and unescape a `key="..."` field from an MI record payload.
fn mi_field(payload: &str, key: &str) -> Option<String> {
    let pattern = format!("{key}=\"");
    let start = payload.find(&pattern)? + pattern.len();
    let mut value = String::new();
    let mut chars = payload[start..].chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(value),
            '\\' => match chars.next()? {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                other => value.push(other),
            },
            other => value.push(other),
        }
    }
    None
}

/// Escape a console command for embedding in an MI c-string argument.
fn escape_console(command: &str) -> String {
    let mut escaped = String::with_capacity(command.len());
    for c in command.chars() {
        if c == '"' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_u64(text: &str) -> Result<u64> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| anyhow!("expected an unsigned integer, got {text:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn session_over(input: &str) -> GdbMi {
        // Prepend the handshake's result so `new` succeeds.
        let input = format!("^done\n(gdb)\n{input}");
        GdbMi::new(
            Box::new(Cursor::new(input.into_bytes())),
            Box::new(std::io::sink()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn execute_skips_chatter_until_result() {
        let mut session = session_over("~\"banner text\"\n=thread-created,id=\"1\"\n^done,value=\"0x42\"\n(gdb)\n");
        let payload = session.execute("-data-evaluate-expression \"$r13\"").unwrap();
        assert_eq!(payload, "value=\"0x42\"");
    }

    #[test]
    fn execute_surfaces_mi_errors() {
        let mut session = session_over("^error,msg=\"No registers\"\n(gdb)\n");
        let error = session.execute("-data-evaluate-expression \"$r13\"").unwrap_err();
        assert!(error.to_string().contains("No registers"));
    }

    #[test]
    fn execute_fails_on_closed_channel() {
        let mut session = session_over("");
        let error = session.execute("-gdb-set var X=1").unwrap_err();
        assert!(error.to_string().contains("closed"));
    }

    #[test]
    fn read_register_parses_decimal_and_hex() {
        let mut session = session_over("^done,value=\"2147418112\"\n(gdb)\n^done,value=\"0x7fff0000\"\n(gdb)\n");
        assert_eq!(session.read_register("r13").unwrap(), 0x7fff_0000);
        assert_eq!(session.read_register("r13").unwrap(), 0x7fff_0000);
    }

    #[test]
    fn read_register_rejects_non_numeric_values() {
        let mut session = session_over("^done,value=\"void\"\n(gdb)\n");
        assert!(session.read_register("r13").is_err());
    }

    #[test]
    fn renders_anchor_and_overrides() {
        let command = render_load_command(
            Path::new("loader.efi"),
            Some(0x7fff_1000),
            &[(".data".to_owned(), 0x7fff_5000)],
        );
        assert_eq!(command, "add-symbol-file loader.efi 0x7fff1000 -s .data 0x7fff5000");
    }

    #[test]
    fn renders_bare_load_for_in_place_images() {
        let command = render_load_command(Path::new("/boot/kernel.elf"), None, &[]);
        assert_eq!(command, "add-symbol-file /boot/kernel.elf");
    }

    #[test]
    fn unescapes_mi_fields() {
        assert_eq!(
            mi_field("msg=\"path \\\"a\\\\b\\\"\"", "msg").unwrap(),
            "path \"a\\b\""
        );
        assert_eq!(mi_field("value=\"1\"", "msg"), None);
    }

    #[test]
    fn escapes_console_commands() {
        assert_eq!(
            escape_console("add-symbol-file \"C:\\loader.efi\""),
            "add-symbol-file \\\"C:\\\\loader.efi\\\""
        );
    }
}
