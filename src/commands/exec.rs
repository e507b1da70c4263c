//! Arguments for user-supplied commands.
//!
//! `ExecSpec` comes straight from the configuration file, so nothing about the
//! program is known beyond its name; it is always treated as mutating.

use crate::command_traits::CommandArgs;
use crate::step::ExecSpec;

impl CommandArgs for ExecSpec {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn is_mutating(&self) -> bool {
        true
    }
}
