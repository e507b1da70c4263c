use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pgprovision - Idempotent PostgreSQL provisioning for Oracle Linux 8
#[derive(Parser)]
#[command(name = "pgprovision")]
#[command(about = "Install and configure a PostgreSQL server on Oracle Linux 8")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be changed without making changes.
    ///
    /// In this mode, mutating commands (dnf install, systemctl start, file
    /// writes) are skipped and logged. Read-only probes (rpm -q,
    /// systemctl is-active) still execute so the preview is realistic.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision this host
    Apply {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Read the admin password from this file (first line)
        #[arg(long)]
        password_file: Option<PathBuf>,

        /// Override the data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the steps that apply would run
    Plan {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
    /// Upsert a single line into a file
    Upsert {
        /// File to edit
        #[arg(short, long)]
        file: PathBuf,
        /// Regex selecting the line(s) to replace
        #[arg(short, long)]
        pattern: String,
        /// Replacement line; must itself match the pattern
        #[arg(short, long)]
        line: String,
        /// Copy the file to <file>.bak first (only if no backup exists)
        #[arg(long)]
        backup: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
