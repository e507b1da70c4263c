//! In-memory host capabilities for tests.
//!
//! All fakes share one [`FakeState`] behind `Arc<Mutex<_>>`: a journal of
//! every mutating call in order, the simulated service/package state, and a
//! list of injected failures. Keep the [`FakeHandle`] returned by
//! [`fake_host`] to inspect or script that state.
//!
//! Files are not faked here: pair the fakes with
//! [`LocalFiles::rooted`](super::system::LocalFiles::rooted) over a temporary
//! directory, or use [`FakeFiles`] for a purely in-memory filesystem.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::command_runner::CommandOutput;
use crate::command_traits::CommandArgs;
use crate::distro::PgLayout;
use crate::error::{ProvisionError, Result};
use crate::lineinfile::LineUpsert;
use crate::secret::Secret;
use crate::step::{PackageSpec, ServiceAction};

use super::{
    Change, CommandRunner, CredentialStore, FileEditor, Host, PackageManager, ServiceManager,
};

/// An injected failure: any journal entry starting with `prefix` fails.
#[derive(Debug, Clone)]
pub struct FakeFailure {
    pub prefix: String,
    pub message: String,
}

/// Simulated host state.
#[derive(Debug, Default)]
pub struct FakeState {
    /// Every mutating call, in order (`"systemctl stop firewalld"`, ...)
    pub journal: Vec<String>,
    pub active: BTreeSet<String>,
    pub enabled: BTreeSet<String>,
    pub installed: BTreeSet<String>,
    pub keys: BTreeSet<String>,
    pub disabled_modules: BTreeSet<String>,
    /// Role name -> password that was set
    pub passwords: BTreeMap<String, String>,
    pub files: BTreeMap<PathBuf, String>,
    pub failures: Vec<FakeFailure>,
}

impl FakeState {
    /// Record `entry`, or fail if it matches an injected failure.
    fn record(&mut self, entry: String) -> std::result::Result<(), String> {
        let failure = self
            .failures
            .iter()
            .find(|f| entry.starts_with(&f.prefix))
            .map(|f| f.message.clone());
        self.journal.push(entry);
        match failure {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

/// Shared handle on a [`FakeState`].
#[derive(Debug, Clone, Default)]
pub struct FakeHandle(Arc<Mutex<FakeState>>);

impl FakeHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the state. A poisoned lock (a panicking test) is recovered.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    /// Fail every call whose journal entry starts with `prefix`.
    pub fn fail_on(&self, prefix: impl Into<String>, message: impl Into<String>) {
        self.state().failures.push(FakeFailure {
            prefix: prefix.into(),
            message: message.into(),
        });
    }

    pub fn is_active(&self, unit: &str) -> bool {
        self.state().active.contains(unit)
    }

    pub fn is_enabled(&self, unit: &str) -> bool {
        self.state().enabled.contains(unit)
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.state().installed.contains(package)
    }
}

/// Build a host whose every capability shares `handle`, files included.
pub fn fake_host(handle: &FakeHandle) -> Host {
    Host {
        services: Box::new(FakeServices(handle.clone())),
        packages: Box::new(FakePackages(handle.clone())),
        files: Box::new(FakeFiles(handle.clone())),
        commands: Box::new(FakeCommands(handle.clone())),
        credentials: Box::new(FakeCredentials(handle.clone())),
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeServices(pub FakeHandle);

impl ServiceManager for FakeServices {
    fn set_state(&mut self, unit: &str, action: ServiceAction) -> Result<Change> {
        let mut state = self.0.state();
        let already = match action {
            ServiceAction::Start => state.active.contains(unit),
            ServiceAction::Stop => !state.active.contains(unit),
            ServiceAction::Enable => state.enabled.contains(unit),
            ServiceAction::Disable => !state.enabled.contains(unit),
        };
        if already {
            return Ok(Change::Unchanged);
        }

        state
            .record(format!("systemctl {} {}", action, unit))
            .map_err(ProvisionError::service)?;
        match action {
            ServiceAction::Start => state.active.insert(unit.to_string()),
            ServiceAction::Stop => state.active.remove(unit),
            ServiceAction::Enable => state.enabled.insert(unit.to_string()),
            ServiceAction::Disable => state.enabled.remove(unit),
        };
        Ok(Change::Changed)
    }

    fn daemon_reload(&mut self) -> Result<Change> {
        self.0
            .state()
            .record("systemctl daemon-reload".to_string())
            .map_err(ProvisionError::service)?;
        Ok(Change::Changed)
    }
}

// ============================================================================
// Packages
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakePackages(pub FakeHandle);

impl PackageManager for FakePackages {
    fn install(&mut self, packages: &[PackageSpec]) -> Result<Change> {
        let mut state = self.0.state();
        let missing: Vec<&PackageSpec> = packages
            .iter()
            .filter(|p| !state.installed.contains(p.installed_name()))
            .collect();
        if missing.is_empty() {
            return Ok(Change::Unchanged);
        }

        let targets: Vec<&str> = missing.iter().map(|p| p.install_target()).collect();
        state
            .record(format!("dnf install {}", targets.join(" ")))
            .map_err(ProvisionError::package)?;
        for package in missing {
            state.installed.insert(package.installed_name().to_string());
        }
        Ok(Change::Changed)
    }

    fn import_key(&mut self, url: &str) -> Result<Change> {
        let mut state = self.0.state();
        if state.keys.contains(url) {
            return Ok(Change::Unchanged);
        }
        state
            .record(format!("rpm --import {}", url))
            .map_err(ProvisionError::package)?;
        state.keys.insert(url.to_string());
        Ok(Change::Changed)
    }

    fn disable_module(&mut self, module: &str) -> Result<Change> {
        let mut state = self.0.state();
        if state.disabled_modules.contains(module) {
            return Ok(Change::Unchanged);
        }
        state
            .record(format!("dnf module disable {}", module))
            .map_err(ProvisionError::package)?;
        state.disabled_modules.insert(module.to_string());
        Ok(Change::Changed)
    }
}

// ============================================================================
// Files
// ============================================================================

/// In-memory files keyed by absolute path.
#[derive(Debug, Clone)]
pub struct FakeFiles(pub FakeHandle);

impl FakeFiles {
    /// Seed a file.
    pub fn put(handle: &FakeHandle, path: impl AsRef<Path>, content: impl Into<String>) {
        handle
            .state()
            .files
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    pub fn read(handle: &FakeHandle, path: impl AsRef<Path>) -> Option<String> {
        handle.state().files.get(path.as_ref()).cloned()
    }
}

impl FileEditor for FakeFiles {
    fn exists(&self, path: &Path) -> bool {
        self.0.state().files.contains_key(path)
    }

    fn backup(&mut self, path: &Path) -> Result<Change> {
        let mut state = self.0.state();
        let content = state.files.get(path).cloned().ok_or_else(|| {
            ProvisionError::file_edit(format!("cannot back up {}: file not found", path.display()))
        })?;
        let backup = super::system::LocalFiles::backup_path(path);
        if state.files.contains_key(&backup) {
            return Ok(Change::Unchanged);
        }
        state
            .record(format!("backup {}", path.display()))
            .map_err(ProvisionError::file_edit)?;
        state.files.insert(backup, content);
        Ok(Change::Changed)
    }

    fn upsert_line(&mut self, path: &Path, upsert: &LineUpsert, create: bool) -> Result<Change> {
        let mut state = self.0.state();
        let content = match state.files.get(path) {
            Some(content) => content.clone(),
            None if create => String::new(),
            None => {
                return Err(ProvisionError::file_edit(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
        };

        let outcome = upsert.apply(&content);
        if !outcome.changed() {
            return Ok(Change::Unchanged);
        }
        state
            .record(format!("upsert {}: {}", path.display(), upsert.line()))
            .map_err(ProvisionError::file_edit)?;
        state.files.insert(path.to_path_buf(), outcome.content);
        Ok(Change::Changed)
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Records `exec <command line>` and succeeds unless a failure is injected,
/// in which case the failure message becomes the command's stderr.
#[derive(Debug, Clone)]
pub struct FakeCommands(pub FakeHandle);

impl CommandRunner for FakeCommands {
    fn run(&mut self, command: &dyn CommandArgs) -> Result<CommandOutput> {
        let entry = format!("exec {}", command.display());
        match self.0.state().record(entry) {
            Ok(()) => Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
                success: true,
                dry_run: false,
            }),
            Err(message) => Ok(CommandOutput {
                stdout: String::new(),
                stderr: message,
                exit_code: Some(1),
                success: false,
                dry_run: false,
            }),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeCredentials(pub FakeHandle);

impl CredentialStore for FakeCredentials {
    fn set_role_password(
        &mut self,
        _layout: &PgLayout,
        role: &str,
        password: &Secret,
    ) -> Result<Change> {
        let mut state = self.0.state();
        state
            .record(format!("alter role {}", role))
            .map_err(ProvisionError::credential)?;
        state
            .passwords
            .insert(role.to_string(), password.expose().to_string());
        Ok(Change::Changed)
    }
}
