//! Type-Safe Command Execution
//!
//! This module provides the ONLY sanctioned way to execute external programs
//! against the host. All execution MUST go through `run_command_safe` to ensure:
//!
//! - Process group isolation (children die with the provisioner)
//! - Proper PID registration for cleanup on SIGINT/SIGTERM/SIGHUP
//! - Type-safe argument passing via the `CommandArgs` trait
//! - Dry-run handling for mutating commands
//! - The admin password variable never reaches a child's environment
//!
//! # Architecture Rule
//!
//! Capabilities in `host::system` never call `Command::new` directly; they
//! build a `CommandArgs` struct and hand it to `run_command_safe`.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::command_traits::{is_dry_run, CommandArgs};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::secret::ADMIN_PASSWORD_ENV;

/// Execute a program with type-safe arguments.
///
/// # Death Pact Compliance
///
/// - Spawns the program in a new process group via `.in_new_process_group()`
/// - Registers the child PID with `ChildRegistry::global()`
/// - Unregisters it once the child has been reaped
///
/// # Returns
///
/// - `Ok(output)` - The program ran (successfully or not); inspect `success`
/// - `Err` - The program could not be spawned or waited on
///
/// A non-zero exit is NOT an `Err`: callers decide whether it is fatal.
pub fn run_command_safe<T: CommandArgs + ?Sized>(args: &T) -> Result<CommandOutput> {
    let program = args.program();
    let cli_args = args.to_cli_args();
    let env_vars = args.get_env_vars();
    let env_names: Vec<&str> = env_vars.iter().map(|(k, _)| k.as_str()).collect();
    let stdin_payload = args.stdin_payload();

    if is_dry_run() && args.is_mutating() {
        info!("[DRY RUN] Skipped: {}", args.display());
        return Ok(CommandOutput {
            stdout: format!("[DRY RUN] Skipped: {}\n", args.display()),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
            dry_run: true,
        });
    }

    // Values of env vars are not logged, only their names
    info!(
        "run_command_safe: {} args={:?} env={:?} stdin={}",
        program,
        cli_args,
        env_names,
        if stdin_payload.is_some() { "<redacted>" } else { "none" }
    );

    let mut cmd = Command::new(&program);
    cmd.args(&cli_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .in_new_process_group();

    for (key, value) in &env_vars {
        cmd.env(key, value);
    }
    // Inherited from the provisioner when the password came from the environment
    cmd.env_remove(ADMIN_PASSWORD_ENV);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;
    let pid = child.id();

    if let Ok(mut guard) = ChildRegistry::global().lock() {
        guard.register(pid);
    }

    if let Some(payload) = stdin_payload {
        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits early closes the pipe; its exit status reports why
            if let Err(e) = stdin.write_all(payload) {
                debug!("Writing stdin to {} failed: {}", program, e);
            }
            // Dropping stdin sends EOF
        }
    }

    let waited = child
        .wait_with_output()
        .with_context(|| format!("Failed waiting for {}", program));

    if let Ok(mut guard) = ChildRegistry::global().lock() {
        guard.unregister(pid);
    }

    let output = waited?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();
    let success = output.status.success();

    if success {
        debug!("{} exited successfully", program);
    } else {
        info!("{} failed with exit code {}", program, exit_code.unwrap_or(-1));
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
        success,
        dry_run: false,
    })
}

/// Output from a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output from the program.
    pub stdout: String,
    /// Standard error from the program.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the program exited successfully (exit code 0).
    pub success: bool,
    /// Whether execution was skipped because of dry-run mode.
    pub dry_run: bool,
}

impl CommandOutput {
    /// The most useful diagnostic text: stderr if present, otherwise stdout.
    pub fn message(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }

    /// stdout and stderr together, for pattern checks on diagnostics.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}
