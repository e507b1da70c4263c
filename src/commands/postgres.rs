//! Type-safe arguments for PostgreSQL tooling.
//!
//! - `ClusterSetupArgs` for `/usr/pgsql-NN/bin/postgresql-NN-setup initdb`
//! - `PsqlArgs` for `runuser -u postgres -- psql ... -f -`
//!
//! # Security Model
//!
//! **CRITICAL**: SQL carrying a password is NEVER passed via `-c` (visible in
//! `ps aux`) or via `PGPASSWORD` (visible in `/proc/<pid>/environ`). `PsqlArgs`
//! feeds it through stdin with `-f -`, and its `Debug` output redacts it.

use std::fmt;
use std::path::PathBuf;

use zeroize::Zeroizing;

use crate::command_traits::CommandArgs;
use crate::distro::{PgLayout, PG_OS_USER};

// ============================================================================
// Cluster Setup
// ============================================================================

/// Runs the packaged setup helper's `initdb` action.
///
/// The helper reads `PGDATA` from the systemd unit, so a custom data directory
/// must be installed as a unit drop-in (and daemon-reloaded) beforehand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSetupArgs {
    pub layout: PgLayout,
}

impl CommandArgs for ClusterSetupArgs {
    fn program(&self) -> String {
        self.layout.setup_program().display().to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["initdb".to_string()]
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// psql
// ============================================================================

/// Runs a SQL script through psql as the `postgres` OS user (peer auth).
#[derive(Clone)]
pub struct PsqlArgs {
    /// Path to the psql binary.
    pub psql: PathBuf,
    /// Database to connect to.
    pub database: String,
    /// Script fed on stdin.
    pub sql: Zeroizing<String>,
}

impl PsqlArgs {
    pub fn new(layout: &PgLayout, sql: Zeroizing<String>) -> Self {
        Self {
            psql: layout.psql_program(),
            database: "postgres".to_string(),
            sql,
        }
    }
}

impl fmt::Debug for PsqlArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PsqlArgs")
            .field("psql", &self.psql)
            .field("database", &self.database)
            .field("sql", &"<redacted>")
            .finish()
    }
}

impl CommandArgs for PsqlArgs {
    fn program(&self) -> String {
        "runuser".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-u".to_string(),
            PG_OS_USER.to_string(),
            "--".to_string(),
            self.psql.display().to_string(),
            // No ~/.psqlrc, quiet, stop at the first error
            "-X".to_string(),
            "-q".to_string(),
            "-v".to_string(),
            "ON_ERROR_STOP=1".to_string(),
            "-d".to_string(),
            self.database.clone(),
            "-f".to_string(),
            "-".to_string(),
        ]
    }

    fn stdin_payload(&self) -> Option<&[u8]> {
        Some(self.sql.as_bytes())
    }

    fn is_mutating(&self) -> bool {
        true
    }
}
