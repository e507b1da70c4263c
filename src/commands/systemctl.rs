//! Type-safe arguments for `systemctl`.
//!
//! # Field to Flag Mapping
//!
//! | Rust Field | CLI position | Notes |
//! |------------|--------------|-------|
//! | `action`   | verb         | `start`, `is-enabled`, `daemon-reload`, ... |
//! | `unit`     | unit name    | Omitted for `daemon-reload` |

use strum::{AsRefStr, Display, EnumString};

use crate::command_traits::CommandArgs;

/// systemctl verbs used by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum SystemctlAction {
    Start,
    Stop,
    Enable,
    Disable,
    DaemonReload,
    IsActive,
    IsEnabled,
}

impl SystemctlAction {
    /// Probes only read unit state.
    pub fn is_probe(&self) -> bool {
        matches!(self, Self::IsActive | Self::IsEnabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemctlArgs {
    pub action: SystemctlAction,
    pub unit: Option<String>,
}

impl SystemctlArgs {
    pub fn unit(action: SystemctlAction, unit: impl Into<String>) -> Self {
        Self {
            action,
            unit: Some(unit.into()),
        }
    }

    pub fn daemon_reload() -> Self {
        Self {
            action: SystemctlAction::DaemonReload,
            unit: None,
        }
    }
}

impl CommandArgs for SystemctlArgs {
    fn program(&self) -> String {
        "systemctl".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![self.action.to_string()];
        if let Some(ref unit) = self.unit {
            args.push(unit.clone());
        }
        args
    }

    fn is_mutating(&self) -> bool {
        !self.action.is_probe()
    }
}
