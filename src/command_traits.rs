//! Type-safe command argument contracts.
//!
//! This module provides the `CommandArgs` trait for ensuring compile-time
//! correctness of external program invocations. Instead of raw string vectors,
//! Rust structs implement this trait to produce validated CLI arguments,
//! environment variables and (optionally) a stdin payload.
//!
//! # Design Goals
//!
//! 1. **Compile-Time Safety**: Flag mismatches (e.g., `-qy` vs `-y`) live in
//!    one `to_cli_args()` per command, not scattered string literals.
//! 2. **Single Source of Truth**: The struct definition IS the contract.
//! 3. **Secrets via stdin**: Anything sensitive travels through
//!    `stdin_payload()`, never through args or environment.
//! 4. **Dry-run awareness**: `is_mutating()` tells the runner which commands
//!    may be skipped in dry-run mode; probes still execute.

use std::sync::atomic::{AtomicBool, Ordering};

/// Global dry-run switch, set once from the CLI.
static DRY_RUN: AtomicBool = AtomicBool::new(false);

/// Enable dry-run mode: mutating commands are logged and skipped.
pub fn enable_dry_run() {
    DRY_RUN.store(true, Ordering::SeqCst);
    log::info!("Dry-run mode enabled: no changes will be made to the host");
}

/// Returns true if dry-run mode is active.
pub fn is_dry_run() -> bool {
    DRY_RUN.load(Ordering::SeqCst)
}

/// Trait for typed command arguments.
///
/// # Contract
///
/// - `program()`: Executable name or absolute path (e.g., `"dnf"`).
/// - `to_cli_args()`: Arguments exactly as the program expects them.
/// - `get_env_vars()`: Extra environment for the child. Never secrets.
/// - `stdin_payload()`: Bytes written to the child's stdin, if any.
/// - `is_mutating()`: Whether the command changes host state.
///
/// # Example
///
/// ```ignore
/// use pgprovision::command_traits::CommandArgs;
/// use pgprovision::commands::dnf::DnfInstallArgs;
///
/// let args = DnfInstallArgs { targets: vec!["postgresql17-server".into()] };
/// assert_eq!(args.program(), "dnf");
/// assert_eq!(args.to_cli_args(), ["-y", "install", "postgresql17-server"]);
/// ```
pub trait CommandArgs {
    /// Program to execute.
    fn program(&self) -> String;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Get required environment variables.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }

    /// Bytes to feed on stdin. The runner never logs this.
    fn stdin_payload(&self) -> Option<&[u8]> {
        None
    }

    /// Whether this command modifies the host.
    ///
    /// Mutating commands are skipped in dry-run mode. Read-only probes
    /// (`rpm -q`, `systemctl is-active`) return `false` so a dry run still
    /// reports realistic state.
    fn is_mutating(&self) -> bool;

    /// Short human-readable rendering for logs: program plus arguments.
    fn display(&self) -> String {
        let args = self.to_cli_args();
        if args.is_empty() {
            self.program()
        } else {
            format!("{} {}", self.program(), args.join(" "))
        }
    }
}
