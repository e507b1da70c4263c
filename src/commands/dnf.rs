//! Type-safe arguments for `dnf`.
//!
//! - `DnfInstallArgs` for `dnf -y install <pkg|url>...`
//! - `DnfModuleDisableArgs` for `dnf -qy module disable <module>`
//! - `DnfModuleListDisabledArgs` for `dnf -q module list --disabled <module>`

use crate::command_traits::CommandArgs;

// ============================================================================
// Install
// ============================================================================

/// `dnf -y install`.
///
/// Targets may be package names or repository RPM URLs; dnf accepts both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnfInstallArgs {
    pub targets: Vec<String>,
}

impl CommandArgs for DnfInstallArgs {
    fn program(&self) -> String {
        "dnf".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "install".to_string()];
        args.extend(self.targets.iter().cloned());
        args
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// Module Disable
// ============================================================================

/// `dnf -qy module disable`.
///
/// On EL8 the AppStream `postgresql` module masks the PGDG packages; it must
/// be disabled before `postgresqlNN-server` can be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnfModuleDisableArgs {
    pub module: String,
}

impl CommandArgs for DnfModuleDisableArgs {
    fn program(&self) -> String {
        "dnf".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-qy".to_string(),
            "module".to_string(),
            "disable".to_string(),
            self.module.clone(),
        ]
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// Module List
// ============================================================================

/// `dnf -q module list --disabled <module>`: read-only probe.
///
/// Exits 0 and lists the module only when a stream of it is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnfModuleListDisabledArgs {
    pub module: String,
}

impl CommandArgs for DnfModuleListDisabledArgs {
    fn program(&self) -> String {
        "dnf".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-q".to_string(),
            "module".to_string(),
            "list".to_string(),
            "--disabled".to_string(),
            self.module.clone(),
        ]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}
