//! Type-safe arguments for `rpm`.
//!
//! - `RpmQueryArgs` for `rpm -q <pkg>...` (read-only probe)
//! - `RpmImportKeyArgs` for `rpm --import <url>`

use crate::command_traits::CommandArgs;

/// `rpm -q`: exits 0 only if every named package is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmQueryArgs {
    pub packages: Vec<String>,
}

impl CommandArgs for RpmQueryArgs {
    fn program(&self) -> String {
        "rpm".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-q".to_string()];
        args.extend(self.packages.iter().cloned());
        args
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// `rpm --import`: adds a package signing key to the RPM database.
///
/// Re-importing a key that is already present is a no-op on the rpm side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpmImportKeyArgs {
    pub url: String,
}

impl CommandArgs for RpmImportKeyArgs {
    fn program(&self) -> String {
        "rpm".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--import".to_string(), self.url.clone()]
    }

    fn is_mutating(&self) -> bool {
        true
    }
}
