//! Host capabilities.
//!
//! Everything the reconciler does to a machine goes through one of these
//! traits. `system` holds the real implementations (systemd, dnf/rpm, the local
//! filesystem, child processes, psql); `fake` holds in-memory doubles that
//! record a journal for tests.
//!
//! All capabilities are `Send` so a `Host` can be moved to a worker thread.

use std::path::Path;

use crate::command_runner::CommandOutput;
use crate::command_traits::CommandArgs;
use crate::distro::PgLayout;
use crate::error::Result;
use crate::lineinfile::LineUpsert;
use crate::secret::Secret;
use crate::step::{PackageSpec, ServiceAction, StepOutcome};

pub mod fake;
pub mod system;

/// Effect of a capability call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Changed,
    Unchanged,
    /// A change was needed but dry-run mode skipped it.
    DryRun,
}

impl From<Change> for StepOutcome {
    fn from(change: Change) -> Self {
        match change {
            Change::Changed => StepOutcome::Changed,
            Change::Unchanged => StepOutcome::Unchanged,
            Change::DryRun => StepOutcome::DryRun,
        }
    }
}

/// Service state. Failures are `ProvisionError::Service`.
pub trait ServiceManager: Send {
    /// Converge `unit` to `action`; a unit already in that state is `Unchanged`.
    fn set_state(&mut self, unit: &str, action: ServiceAction) -> Result<Change>;

    /// Reload unit definitions after drop-ins changed.
    fn daemon_reload(&mut self) -> Result<Change>;
}

/// Packages, signing keys and module streams. Failures are `ProvisionError::Package`.
pub trait PackageManager: Send {
    /// Install whichever of `packages` are missing.
    fn install(&mut self, packages: &[PackageSpec]) -> Result<Change>;

    fn import_key(&mut self, url: &str) -> Result<Change>;

    fn disable_module(&mut self, module: &str) -> Result<Change>;
}

/// Configuration files. Failures are `ProvisionError::FileEdit`.
pub trait FileEditor: Send {
    fn exists(&self, path: &Path) -> bool;

    /// Copy `path` to `path.bak` unless that backup already exists.
    fn backup(&mut self, path: &Path) -> Result<Change>;

    /// Apply a line upsert to `path`. A missing file is an error unless `create`.
    fn upsert_line(&mut self, path: &Path, upsert: &LineUpsert, create: bool) -> Result<Change>;
}

/// Arbitrary programs. Spawn failures are `ProvisionError::Command`; a
/// non-zero exit is returned in the output for the caller to judge.
pub trait CommandRunner: Send {
    fn run(&mut self, command: &dyn CommandArgs) -> Result<CommandOutput>;
}

/// Database role credentials. Failures are `ProvisionError::Credential`.
pub trait CredentialStore: Send {
    fn set_role_password(&mut self, layout: &PgLayout, role: &str, password: &Secret)
        -> Result<Change>;
}

/// The machine a plan is applied to.
pub struct Host {
    pub services: Box<dyn ServiceManager>,
    pub packages: Box<dyn PackageManager>,
    pub files: Box<dyn FileEditor>,
    pub commands: Box<dyn CommandRunner>,
    pub credentials: Box<dyn CredentialStore>,
}

impl Host {
    /// The machine this process runs on.
    pub fn local() -> Self {
        Self {
            services: Box::new(system::SystemdServices),
            packages: Box::new(system::DnfPackages),
            files: Box::new(system::LocalFiles::new()),
            commands: Box::new(system::SystemCommands),
            credentials: Box::new(system::PsqlCredentials),
        }
    }
}
