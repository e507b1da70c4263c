//! Type-safe command argument modules.
//!
//! Each struct implements `CommandArgs` for one external program and maps
//! Rust fields to the exact flags that program expects:
//!
//! - `dnf`: package installation, AppStream module list/disable
//! - `rpm`: installed-package probes, signing key import
//! - `systemctl`: service state changes and probes
//! - `postgres`: cluster setup helper and psql
//! - `exec`: user-supplied commands from the configuration

pub mod dnf;
pub mod exec;
pub mod postgres;
pub mod rpm;
pub mod systemctl;
