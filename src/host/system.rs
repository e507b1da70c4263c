//! Real host capabilities.
//!
//! Every external program goes through `run_command_safe` with a typed
//! `CommandArgs` struct. Each mutating call is preceded by a read-only probe so
//! that an already-converged host reports `Change::Unchanged`, and dry-run mode
//! (which skips only mutating commands) still reports what would change.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::command_runner::{run_command_safe, CommandOutput};
use crate::command_traits::{is_dry_run, CommandArgs};
use crate::commands::dnf::{DnfInstallArgs, DnfModuleDisableArgs, DnfModuleListDisabledArgs};
use crate::commands::postgres::PsqlArgs;
use crate::commands::rpm::{RpmImportKeyArgs, RpmQueryArgs};
use crate::commands::systemctl::{SystemctlAction, SystemctlArgs};
use crate::distro::PgLayout;
use crate::error::{ProvisionError, Result};
use crate::lineinfile::{LineUpsert, UpsertAction};
use crate::secret::{Secret, REDACTED};
use crate::step::{PackageSpec, ServiceAction};

use super::{Change, CommandRunner, CredentialStore, FileEditor, PackageManager, ServiceManager};

/// Map a successful mutating command to its `Change`.
fn change_from(output: &CommandOutput) -> Change {
    if output.dry_run {
        Change::DryRun
    } else {
        Change::Changed
    }
}

// ============================================================================
// Services
// ============================================================================

/// systemd via `systemctl`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdServices;

impl SystemdServices {
    fn run(&self, args: &SystemctlArgs) -> Result<CommandOutput> {
        run_command_safe(args).map_err(|e| ProvisionError::service(format!("{:#}", e)))
    }

    /// `is-active` / `is-enabled` exit 0 only when the answer is yes.
    fn probe(&self, action: SystemctlAction, unit: &str) -> Result<bool> {
        Ok(self.run(&SystemctlArgs::unit(action, unit))?.success)
    }
}

impl ServiceManager for SystemdServices {
    fn set_state(&mut self, unit: &str, action: ServiceAction) -> Result<Change> {
        let (probe, wanted, verb) = match action {
            ServiceAction::Start => (SystemctlAction::IsActive, true, SystemctlAction::Start),
            ServiceAction::Stop => (SystemctlAction::IsActive, false, SystemctlAction::Stop),
            ServiceAction::Enable => (SystemctlAction::IsEnabled, true, SystemctlAction::Enable),
            ServiceAction::Disable => {
                (SystemctlAction::IsEnabled, false, SystemctlAction::Disable)
            }
        };

        // Unknown units probe as inactive/disabled, so stop/disable of a unit
        // that is not installed is a no-op.
        if self.probe(probe, unit)? == wanted {
            debug!("{} already satisfies '{}'", unit, action);
            return Ok(Change::Unchanged);
        }

        let output = self.run(&SystemctlArgs::unit(verb, unit))?;
        if !output.success {
            return Err(ProvisionError::service(format!(
                "systemctl {} {} failed (exit code {}): {}",
                verb,
                unit,
                output.exit_code.unwrap_or(-1),
                output.message()
            )));
        }
        info!("systemctl {} {}", verb, unit);
        Ok(change_from(&output))
    }

    fn daemon_reload(&mut self) -> Result<Change> {
        let output = self.run(&SystemctlArgs::daemon_reload())?;
        if !output.success {
            return Err(ProvisionError::service(format!(
                "systemctl daemon-reload failed: {}",
                output.message()
            )));
        }
        Ok(change_from(&output))
    }
}

// ============================================================================
// Packages
// ============================================================================

/// dnf for installs and modules, rpm for probes and keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnfPackages;

impl DnfPackages {
    fn run<T: CommandArgs>(&self, args: &T) -> Result<CommandOutput> {
        run_command_safe(args).map_err(|e| ProvisionError::package(format!("{:#}", e)))
    }

    fn is_installed(&self, name: &str) -> Result<bool> {
        let output = self.run(&RpmQueryArgs {
            packages: vec![name.to_string()],
        })?;
        Ok(output.success)
    }

    /// Fingerprints of imported keys (`gpg-pubkey-<id>-<date>` lines).
    fn imported_keys(&self) -> Result<String> {
        let output = self.run(&RpmQueryArgs {
            packages: vec!["gpg-pubkey".to_string()],
        })?;
        // No keys at all exits non-zero; treat as an empty list
        Ok(if output.success {
            output.stdout
        } else {
            String::new()
        })
    }
}

impl PackageManager for DnfPackages {
    fn install(&mut self, packages: &[PackageSpec]) -> Result<Change> {
        let mut missing = Vec::new();
        for package in packages {
            if self.is_installed(package.installed_name())? {
                debug!("{} already installed", package.installed_name());
            } else {
                missing.push(package.install_target().to_string());
            }
        }

        if missing.is_empty() {
            return Ok(Change::Unchanged);
        }

        info!("Installing {}", missing.join(" "));
        let args = DnfInstallArgs { targets: missing };
        let output = self.run(&args)?;
        if !output.success {
            return Err(ProvisionError::package(format!(
                "{} failed (exit code {}): {}",
                args.display(),
                output.exit_code.unwrap_or(-1),
                output.message()
            )));
        }
        Ok(change_from(&output))
    }

    fn import_key(&mut self, url: &str) -> Result<Change> {
        let before = self.imported_keys()?;

        let args = RpmImportKeyArgs {
            url: url.to_string(),
        };
        let output = self.run(&args)?;
        if !output.success {
            return Err(ProvisionError::package(format!(
                "{} failed: {}",
                args.display(),
                output.message()
            )));
        }
        if output.dry_run {
            return Ok(Change::DryRun);
        }

        // rpm --import of a known key succeeds without adding anything
        if self.imported_keys()? == before {
            Ok(Change::Unchanged)
        } else {
            Ok(Change::Changed)
        }
    }

    fn disable_module(&mut self, module: &str) -> Result<Change> {
        let listed = self.run(&DnfModuleListDisabledArgs {
            module: module.to_string(),
        })?;
        let already_disabled = listed.success
            && listed
                .stdout
                .lines()
                .any(|line| line.split_whitespace().next() == Some(module));
        if already_disabled {
            debug!("module {} already disabled", module);
            return Ok(Change::Unchanged);
        }

        let args = DnfModuleDisableArgs {
            module: module.to_string(),
        };
        let output = self.run(&args)?;
        if !output.success {
            return Err(ProvisionError::package(format!(
                "{} failed: {}",
                args.display(),
                output.message()
            )));
        }
        Ok(change_from(&output))
    }
}

// ============================================================================
// Files
// ============================================================================

/// The local filesystem, optionally rebased under a root directory.
///
/// A root other than `/` lets a plan target a mounted image, and lets tests
/// run a full plan inside a temporary directory.
#[derive(Debug, Clone)]
pub struct LocalFiles {
    root: PathBuf,
}

impl Default for LocalFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFiles {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }

    /// Resolve every absolute path under `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where `path` actually lives on disk.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => self.root.join(path),
        }
    }

    /// `pg_hba.conf` -> `pg_hba.conf.bak`
    pub fn backup_path(path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }
}

impl FileEditor for LocalFiles {
    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn backup(&mut self, path: &Path) -> Result<Change> {
        let source = self.resolve(path);
        if !source.is_file() {
            // An earlier step (initdb) would have created it
            if is_dry_run() {
                info!("[DRY RUN] Would back up {} once it exists", path.display());
                return Ok(Change::DryRun);
            }
            return Err(ProvisionError::file_edit(format!(
                "cannot back up {}: file not found",
                path.display()
            )));
        }

        let backup = Self::backup_path(&source);
        if backup.exists() {
            debug!("Backup {} already present", backup.display());
            return Ok(Change::Unchanged);
        }
        if is_dry_run() {
            info!("[DRY RUN] Would back up {}", path.display());
            return Ok(Change::DryRun);
        }

        fs::copy(&source, &backup).map_err(|e| {
            ProvisionError::file_edit(format!("failed to back up {}: {}", path.display(), e))
        })?;
        info!("Backed up {} to {}", path.display(), backup.display());
        Ok(Change::Changed)
    }

    fn upsert_line(&mut self, path: &Path, upsert: &LineUpsert, create: bool) -> Result<Change> {
        let target = self.resolve(path);
        let content = if target.exists() {
            fs::read_to_string(&target).map_err(|e| {
                ProvisionError::file_edit(format!("failed to read {}: {}", path.display(), e))
            })?
        } else if create {
            String::new()
        } else if is_dry_run() {
            info!(
                "[DRY RUN] Would set '{}' in {} once it exists",
                upsert.line(),
                path.display()
            );
            return Ok(Change::DryRun);
        } else {
            return Err(ProvisionError::file_edit(format!(
                "{} does not exist",
                path.display()
            )));
        };

        let outcome = upsert.apply(&content);
        if !outcome.changed() {
            debug!("{} already contains '{}'", path.display(), upsert.line());
            return Ok(Change::Unchanged);
        }

        match outcome.action {
            UpsertAction::Replaced {
                line_number,
                removed,
            } => info!(
                "{}:{}: '{}' (removed {} duplicate(s))",
                path.display(),
                line_number,
                upsert.line(),
                removed
            ),
            UpsertAction::Inserted { line_number } => info!(
                "{}:{}: inserted '{}'",
                path.display(),
                line_number,
                upsert.line()
            ),
            UpsertAction::Appended => info!("{}: appended '{}'", path.display(), upsert.line()),
            UpsertAction::Unchanged => {}
        }

        if is_dry_run() {
            return Ok(Change::DryRun);
        }

        if create {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    ProvisionError::file_edit(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        // Writing in place keeps the file's owner and mode
        fs::write(&target, outcome.content.as_bytes()).map_err(|e| {
            ProvisionError::file_edit(format!("failed to write {}: {}", path.display(), e))
        })?;
        Ok(Change::Changed)
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Child processes through `run_command_safe`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommands;

impl CommandRunner for SystemCommands {
    fn run(&mut self, command: &dyn CommandArgs) -> Result<CommandOutput> {
        run_command_safe(command).map_err(|e| ProvisionError::command(format!("{:#}", e)))
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Quote a role name as a SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `ALTER ROLE` through psql, with the statement on stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsqlCredentials;

impl CredentialStore for PsqlCredentials {
    fn set_role_password(
        &mut self,
        layout: &PgLayout,
        role: &str,
        password: &Secret,
    ) -> Result<Change> {
        let literal = password.to_sql_literal();
        let mut sql = zeroize::Zeroizing::new(String::with_capacity(literal.len() + 64));
        sql.push_str("ALTER ROLE ");
        sql.push_str(&quote_ident(role));
        sql.push_str(" WITH PASSWORD ");
        sql.push_str(&literal);
        sql.push_str(";\n");

        let args = PsqlArgs::new(layout, sql);
        let output = run_command_safe(&args)
            .map_err(|e| ProvisionError::credential(format!("{:#}", e)))?;

        if !output.success {
            // psql echoes the failing statement on syntax errors
            let message = output.message().replace(password.expose(), REDACTED);
            warn!("Setting password for role {} failed", role);
            return Err(ProvisionError::credential(format!(
                "ALTER ROLE {} failed (exit code {}): {}",
                role,
                output.exit_code.unwrap_or(-1),
                message
            )));
        }

        info!("Password set for role {}", role);
        Ok(change_from(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineinfile::LinePattern;

    #[test]
    fn test_resolve_rebases_absolute_paths() {
        let files = LocalFiles::rooted("/mnt/image");
        assert_eq!(
            files.resolve(Path::new("/var/lib/pgsql/17/data/pg_hba.conf")),
            PathBuf::from("/mnt/image/var/lib/pgsql/17/data/pg_hba.conf")
        );
        assert_eq!(
            LocalFiles::new().resolve(Path::new("/etc/hosts")),
            PathBuf::from("/etc/hosts")
        );
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            LocalFiles::backup_path(Path::new("/data/pg_hba.conf")),
            PathBuf::from("/data/pg_hba.conf.bak")
        );
    }

    #[test]
    fn test_backup_is_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("postgresql.conf");
        fs::write(&conf, "original\n").unwrap();

        let mut files = LocalFiles::new();
        assert_eq!(files.backup(&conf).unwrap(), Change::Changed);

        fs::write(&conf, "edited\n").unwrap();
        assert_eq!(files.backup(&conf).unwrap(), Change::Unchanged);

        let backup = fs::read_to_string(LocalFiles::backup_path(&conf)).unwrap();
        assert_eq!(backup, "original\n");
    }

    #[test]
    fn test_backup_of_missing_file_is_file_edit_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = LocalFiles::new();
        let err = files.backup(&dir.path().join("absent.conf")).unwrap_err();
        assert!(matches!(err, ProvisionError::FileEdit(_)));
    }

    #[test]
    fn test_upsert_writes_and_converges() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("postgresql.conf");
        fs::write(&conf, "#work_mem = 4MB\nshared_buffers = 128MB\n").unwrap();

        let upsert = LineUpsert::setting("work_mem", "6990kB").unwrap();
        let mut files = LocalFiles::new();

        assert_eq!(files.upsert_line(&conf, &upsert, false).unwrap(), Change::Changed);
        assert_eq!(
            fs::read_to_string(&conf).unwrap(),
            "work_mem = 6990kB\nshared_buffers = 128MB\n"
        );
        assert_eq!(files.upsert_line(&conf, &upsert, false).unwrap(), Change::Unchanged);
    }

    #[test]
    fn test_upsert_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let upsert = LineUpsert::new(
            LinePattern::new(r"^Environment=PGDATA=").unwrap(),
            "Environment=PGDATA=/srv/pg",
        )
        .and_then(|u| u.in_section("[Service]"))
        .unwrap();
        let mut files = LocalFiles::new();

        let missing = dir.path().join("nope.conf");
        let err = files.upsert_line(&missing, &upsert, false).unwrap_err();
        assert!(matches!(err, ProvisionError::FileEdit(_)));

        let created = dir.path().join("unit.d").join("override.conf");
        assert_eq!(files.upsert_line(&created, &upsert, true).unwrap(), Change::Changed);
        assert_eq!(
            fs::read_to_string(&created).unwrap(),
            "[Service]\nEnvironment=PGDATA=/srv/pg\n"
        );
    }

    #[test]
    fn test_upsert_keeps_crlf_endings() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("postgresql.conf");
        fs::write(&conf, "#work_mem = 4MB\r\nport = 5432\r\n").unwrap();

        let mut files = LocalFiles::new();
        let upsert = LineUpsert::setting("work_mem", "6990kB").unwrap();
        assert_eq!(files.upsert_line(&conf, &upsert, false).unwrap(), Change::Changed);
        let upsert = LineUpsert::setting("listen_addresses", "'*'").unwrap();
        assert_eq!(files.upsert_line(&conf, &upsert, false).unwrap(), Change::Changed);

        assert_eq!(
            fs::read_to_string(&conf).unwrap(),
            "work_mem = 6990kB\r\nport = 5432\r\nlisten_addresses = '*'\r\n"
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("postgres"), "\"postgres\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
