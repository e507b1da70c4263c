//! Steps and their outcomes.
//!
//! A `Step` is one idempotent unit of work in a provisioning plan. The plan
//! builder (`engine::plan`) produces them in order; the reconciler
//! (`engine::reconciler`) hands each `Operation` to the matching host
//! capability and records a `StepOutcome`.
//!
//! | Kind              | Operation            | Capability        |
//! |-------------------|----------------------|-------------------|
//! | service-state     | `Service`            | `ServiceManager`  |
//! | unit-reload       | `ReloadUnits`        | `ServiceManager`  |
//! | package-install   | `InstallPackages`    | `PackageManager`  |
//! | key-import        | `ImportKey`          | `PackageManager`  |
//! | module-disable    | `DisableModule`      | `PackageManager`  |
//! | command-exec      | `Exec`               | `CommandRunner`   |
//! | cluster-init      | `InitCluster`        | `CommandRunner`   |
//! | file-backup       | `BackupFile`         | `FileEditor`      |
//! | file-line-upsert  | `UpsertLine`         | `FileEditor`      |
//! | set-password      | `SetRolePassword`    | `CredentialStore` |

use std::fmt;
use std::path::PathBuf;

use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::distro::PgLayout;
use crate::lineinfile::LineUpsert;
use crate::provision_state::ProvisionStage;
use crate::secret::Secret;

// ============================================================================
// Operation Types
// ============================================================================

/// Desired service state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Enable,
    Disable,
}

/// A package to install, with the name `rpm -q` knows it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSpec {
    /// A package resolved from the configured repositories.
    Name(String),
    /// A package fetched directly by URL (repository descriptor RPMs).
    Url { url: String, provides: String },
}

impl PackageSpec {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn url(url: impl Into<String>, provides: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            provides: provides.into(),
        }
    }

    /// Argument passed to `dnf install`.
    pub fn install_target(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Url { url, .. } => url,
        }
    }

    /// Installed package name used for the `rpm -q` probe.
    pub fn installed_name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Url { provides, .. } => provides,
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{}", name),
            Self::Url { url, provides } => write!(f, "{} ({})", provides, url),
        }
    }
}

/// An arbitrary program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub program: String,
    pub args: Vec<String>,
    /// If this path exists the command is considered already done.
    pub creates: Option<PathBuf>,
}

impl fmt::Display for ExecSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        if let Some(ref creates) = self.creates {
            write!(f, " (creates {})", creates.display())?;
        }
        Ok(())
    }
}

/// Operation kinds, for logging and plan listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    ServiceState,
    UnitReload,
    PackageInstall,
    KeyImport,
    ModuleDisable,
    CommandExec,
    ClusterInit,
    FileBackup,
    FileLineUpsert,
    SetPassword,
}

/// What a step does, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Bring a systemd unit to a state (`systemctl <action> <unit>`)
    Service { unit: String, action: ServiceAction },

    /// `systemctl daemon-reload`, only if the step named `after` changed
    /// something earlier in the same run
    ReloadUnits { after: String },

    /// Install packages that are not yet installed
    InstallPackages { packages: Vec<PackageSpec> },

    /// Import a package signing key
    ImportKey { url: String },

    /// Disable a dnf module stream
    DisableModule { module: String },

    /// Run an arbitrary command
    Exec(ExecSpec),

    /// Initialize the database cluster with the packaged setup helper
    InitCluster { layout: PgLayout, data_dir: PathBuf },

    /// Copy `path` to `path.bak` unless a backup already exists
    BackupFile { path: PathBuf },

    /// Line-level upsert into a file
    UpsertLine {
        path: PathBuf,
        upsert: LineUpsert,
        /// Create the file (and parent directory) if it does not exist
        create: bool,
    },

    /// Set a database role's password
    SetRolePassword {
        layout: PgLayout,
        role: String,
        password: Secret,
    },
}

impl Operation {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Service { .. } => StepKind::ServiceState,
            Self::ReloadUnits { .. } => StepKind::UnitReload,
            Self::InstallPackages { .. } => StepKind::PackageInstall,
            Self::ImportKey { .. } => StepKind::KeyImport,
            Self::DisableModule { .. } => StepKind::ModuleDisable,
            Self::Exec(_) => StepKind::CommandExec,
            Self::InitCluster { .. } => StepKind::ClusterInit,
            Self::BackupFile { .. } => StepKind::FileBackup,
            Self::UpsertLine { .. } => StepKind::FileLineUpsert,
            Self::SetRolePassword { .. } => StepKind::SetPassword,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service { unit, action } => write!(f, "systemctl {} {}", action, unit),
            Self::ReloadUnits { after } => write!(f, "systemctl daemon-reload (if {} changed)", after),
            Self::InstallPackages { packages } => {
                let names: Vec<String> = packages.iter().map(|p| p.to_string()).collect();
                write!(f, "install {}", names.join(", "))
            }
            Self::ImportKey { url } => write!(f, "rpm --import {}", url),
            Self::DisableModule { module } => write!(f, "dnf module disable {}", module),
            Self::Exec(spec) => write!(f, "{}", spec),
            Self::InitCluster { layout, data_dir } => write!(
                f,
                "{} initdb ({})",
                layout.setup_program().display(),
                data_dir.display()
            ),
            Self::BackupFile { path } => {
                write!(f, "backup {} -> {}.bak", path.display(), path.display())
            }
            Self::UpsertLine { path, upsert, .. } => {
                write!(f, "{}: {}", path.display(), upsert)
            }
            // Password Display is already redacted
            Self::SetRolePassword { role, password, .. } => {
                write!(f, "ALTER ROLE {} PASSWORD {}", role, password)
            }
        }
    }
}

// ============================================================================
// Step
// ============================================================================

/// One named, ordered unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub stage: ProvisionStage,
    pub operation: Operation,
    /// Failures are recorded and the run continues.
    pub ignore_failure: bool,
}

impl Step {
    pub fn new(name: impl Into<String>, stage: ProvisionStage, operation: Operation) -> Self {
        Self {
            name: name.into(),
            stage,
            operation,
            ignore_failure: false,
        }
    }

    /// Mark the step as tolerated on failure.
    pub fn ignoring_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }

    pub fn kind(&self) -> StepKind {
        self.operation.kind()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind(), self.name, self.operation)?;
        if self.ignore_failure {
            write!(f, " (ignore failure)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What happened when a step ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The host was changed.
    Changed,
    /// The host already satisfied the step.
    Unchanged,
    /// The step failed in a way that shows its goal was already reached.
    AlreadySatisfied(String),
    /// A tolerated failure.
    IgnoredFailure(String),
    /// Mutation skipped because of dry-run mode.
    DryRun,
}

impl StepOutcome {
    /// True if the step modified the host.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changed => write!(f, "changed"),
            Self::Unchanged => write!(f, "ok"),
            Self::AlreadySatisfied(reason) => write!(f, "already satisfied ({})", reason),
            Self::IgnoredFailure(reason) => write!(f, "failed, ignored ({})", reason),
            Self::DryRun => write!(f, "dry run"),
        }
    }
}

/// Outcome of every step of a completed run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub entries: Vec<(String, StepOutcome)>,
}

impl RunReport {
    pub fn push(&mut self, step: impl Into<String>, outcome: StepOutcome) {
        self.entries.push((step.into(), outcome));
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.entries
            .iter()
            .find(|(name, _)| name == step)
            .map(|(_, outcome)| outcome)
    }

    /// Number of steps that changed the host.
    pub fn changed_count(&self) -> usize {
        self.entries.iter().filter(|(_, o)| o.is_change()).count()
    }

    /// True if no step changed the host (the host had converged).
    pub fn is_converged(&self) -> bool {
        self.changed_count() == 0
    }

    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.entries.len() + 1);
        for (name, outcome) in &self.entries {
            lines.push(format!("  {:<32} {}", name, outcome));
        }
        lines.push(format!(
            "{} steps, {} changed",
            self.entries.len(),
            self.changed_count()
        ));
        lines.join("\n")
    }
}
