//! Debugger setup for boot-time software.
//!
//! This library provides the core components for the `bootdbg` tool, which
//! configures a host GDB to resolve symbols for a relocatable UEFI bootloader
//! application and a non-relocatable kernel image.
//! It is organized into several modules:
//! - `config`: CLI configuration.
//! - `session`: The debugger capability surface.
//! - `gdb`: GDB/MI transport implementing that surface.
//! - `pe`: PE section table to runtime-address mapping.
//! - `commands`: The operator-invocable setup commands.

pub mod commands;
pub mod config;
pub mod gdb;
pub mod pe;
pub mod session;
