//! pgprovision Library
//!
//! Idempotent provisioning of a PostgreSQL server on Oracle Linux 8: an ordered
//! list of convergent steps (service state, package install, command exec,
//! file line upsert) applied to a host through injected capabilities.

pub mod cli;
pub mod command_runner;
pub mod command_traits;
pub mod commands;
pub mod config_file;
pub mod distro;
pub mod engine;
pub mod error;
pub mod host;
pub mod lineinfile;
pub mod process_guard;
pub mod provision_state;
pub mod secret;
pub mod step;

// Re-export main types for convenience
pub use command_runner::{run_command_safe, CommandOutput};
pub use command_traits::{enable_dry_run, is_dry_run, CommandArgs};
pub use config_file::{HbaAuthMethod, HbaConnectionType, HbaRule, PostCommand, ProvisionConfig};
pub use distro::PgLayout;
pub use engine::{build_plan, Reconciler};
pub use error::{ProvisionError, Result};
pub use host::{
    Change, CommandRunner, CredentialStore, FileEditor, Host, PackageManager, ServiceManager,
};
pub use lineinfile::{LinePattern, LineUpsert, UpsertAction, UpsertOutcome};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use provision_state::{ProvisionContext, ProvisionStage, ProvisionTransitionError};
pub use secret::Secret;
pub use step::{
    ExecSpec, Operation, PackageSpec, RunReport, ServiceAction, Step, StepKind, StepOutcome,
};
