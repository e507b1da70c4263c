//! Configuration file handling for saving and loading provisioning configs.
//!
//! This module uses type-safe enums instead of strings for configuration values
//! (connection types, auth methods), so typos fail at load time rather than
//! producing a `pg_hba.conf` the server refuses to read.
//!
//! The admin password is never written back out: `save_to_file` skips it, and
//! it is normally supplied at run time through `PGPROVISION_ADMIN_PASSWORD` or
//! `--password-file` (see [`ProvisionConfig::resolve_admin_password`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};

use crate::distro::{PgLayout, DEFAULT_PG_VERSION, MIN_PG_VERSION, PG_OS_USER};
use crate::lineinfile::{LinePattern, LineUpsert};
use crate::secret::Secret;

pub use crate::secret::ADMIN_PASSWORD_ENV;

/// Longest identifier PostgreSQL keeps (NAMEDATALEN - 1).
const MAX_IDENT_LEN: usize = 63;

// ============================================================================
// pg_hba.conf rules
// ============================================================================

/// First column of a `pg_hba.conf` record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HbaConnectionType {
    Local,
    Host,
    Hostssl,
    Hostnossl,
}

impl HbaConnectionType {
    /// Every type except `local` needs an address column.
    pub fn needs_address(self) -> bool {
        self != Self::Local
    }
}

/// Authentication method column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HbaAuthMethod {
    Trust,
    Reject,
    #[serde(rename = "scram-sha-256")]
    #[strum(serialize = "scram-sha-256")]
    ScramSha256,
    Md5,
    Password,
    Peer,
    Ident,
}

/// One client authentication record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HbaRule {
    #[serde(rename = "type")]
    pub conn_type: HbaConnectionType,
    pub database: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub method: HbaAuthMethod,
}

impl HbaRule {
    pub fn host(address: &str, method: HbaAuthMethod) -> Self {
        Self {
            conn_type: HbaConnectionType::Host,
            database: "all".to_string(),
            user: "all".to_string(),
            address: Some(address.to_string()),
            method,
        }
    }

    /// Render in the column layout of the stock file.
    pub fn render(&self) -> String {
        let conn_type = self.conn_type.to_string();
        match self.address {
            Some(ref address) => format!(
                "{:<7} {:<15} {:<15} {:<23} {}",
                conn_type, self.database, self.user, address, self.method
            ),
            // `local` rows have no address column
            None => format!(
                "{:<7} {:<15} {:<15} {}",
                conn_type, self.database, self.user, self.method
            ),
        }
    }

    /// Matches an existing record for the same type/database/user/address,
    /// commented out or not, whatever its method.
    pub fn pattern(&self) -> Result<LinePattern> {
        let mut pattern = format!(
            r"^#?\s*{}\s+{}\s+{}",
            regex::escape(&self.conn_type.to_string()),
            regex::escape(&self.database),
            regex::escape(&self.user)
        );
        if let Some(ref address) = self.address {
            pattern.push_str(r"\s+");
            pattern.push_str(&regex::escape(address));
        }
        pattern.push_str(r"\s");
        LinePattern::new(&pattern).context("Invalid pg_hba.conf rule pattern")
    }

    pub fn to_upsert(&self) -> Result<LineUpsert> {
        LineUpsert::new(self.pattern()?, self.render())
            .with_context(|| format!("Invalid pg_hba.conf rule '{}'", self.render()))
    }

    fn validate(&self) -> Result<()> {
        for (what, value) in [("database", &self.database), ("user", &self.user)] {
            if value.trim().is_empty() {
                anyhow::bail!("pg_hba.conf rule {} must be specified", what);
            }
            if value.contains(char::is_whitespace) {
                anyhow::bail!("pg_hba.conf rule {} cannot contain whitespace", what);
            }
        }

        match (self.conn_type.needs_address(), &self.address) {
            (true, None) => {
                anyhow::bail!("pg_hba.conf '{}' rule requires an address", self.conn_type)
            }
            (false, Some(_)) => anyhow::bail!("pg_hba.conf 'local' rule cannot have an address"),
            (true, Some(address)) => {
                if address.trim().is_empty() || address.contains(char::is_whitespace) {
                    anyhow::bail!("pg_hba.conf rule address '{}' is invalid", address);
                }
            }
            (false, None) => {}
        }
        Ok(())
    }
}

// ============================================================================
// Post-install commands
// ============================================================================

/// A command run after the server is up (e.g. creating an extension).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCommand {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Skip the command when this path exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creates: Option<PathBuf>,
    #[serde(default)]
    pub ignore_failure: bool,
}

// ============================================================================
// Provision config
// ============================================================================

/// Provisioning configuration that can be saved/loaded
///
/// Every field has a default, so a config file only needs the fields it
/// changes; `{}` describes the stock Oracle Linux 8 / PostgreSQL 17 install.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    // Server
    pub postgres_version: u32,
    /// `None` keeps the packaged default (`/var/lib/pgsql/NN/data`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_directory: Option<PathBuf>,

    // Credentials
    pub admin_role: String,
    #[serde(skip_serializing)]
    pub admin_password: Option<Secret>,

    // Host preparation
    pub disable_firewall: bool,
    pub install_epel: bool,
    pub extra_packages: Vec<String>,

    // Configuration files
    pub hba_rules: Vec<HbaRule>,
    /// `postgresql.conf` key -> literal value (quotes included where needed)
    pub server_settings: BTreeMap<String, String>,

    // Final setup
    pub post_commands: Vec<PostCommand>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        let server_settings = [
            ("listen_addresses", "'*'"),
            ("max_connections", "100"),
            ("shared_buffers", "1GB"),
            ("effective_cache_size", "3GB"),
            ("maintenance_work_mem", "256MB"),
            ("checkpoint_completion_target", "0.9"),
            ("wal_buffers", "16MB"),
            ("default_statistics_target", "100"),
            ("random_page_cost", "1.1"),
            ("effective_io_concurrency", "200"),
            ("work_mem", "6990kB"),
            ("huge_pages", "off"),
            ("min_wal_size", "1GB"),
            ("max_wal_size", "4GB"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            postgres_version: DEFAULT_PG_VERSION,
            data_directory: None,
            admin_role: PG_OS_USER.to_string(),
            admin_password: None,
            disable_firewall: true,
            install_epel: true,
            extra_packages: Vec::new(),
            hba_rules: vec![
                HbaRule::host("127.0.0.1/32", HbaAuthMethod::ScramSha256),
                HbaRule::host("0.0.0.0/0", HbaAuthMethod::ScramSha256),
            ],
            server_settings,
            post_commands: Vec::new(),
        }
    }
}

impl ProvisionConfig {
    /// Create a new configuration with the stock defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file (the admin password is omitted)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    pub fn layout(&self) -> PgLayout {
        PgLayout::new(self.postgres_version)
    }

    /// Effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_directory
            .clone()
            .unwrap_or_else(|| self.layout().default_data_dir())
    }

    /// True if the data directory differs from the packaged default, which
    /// requires a systemd drop-in.
    pub fn has_custom_data_dir(&self) -> bool {
        self.data_dir() != self.layout().default_data_dir()
    }

    /// Fill in the admin password from run-time sources.
    ///
    /// Precedence: `password_file`, then `PGPROVISION_ADMIN_PASSWORD`, then
    /// whatever the config file held.
    pub fn resolve_admin_password(&mut self, password_file: Option<&Path>) -> Result<()> {
        if let Some(path) = password_file {
            self.admin_password = Some(Secret::from_file(path)?);
            log::debug!("Admin password read from {}", path.display());
        } else if let Some(secret) = Secret::from_env(ADMIN_PASSWORD_ENV)? {
            self.admin_password = Some(secret);
            log::debug!("Admin password read from ${}", ADMIN_PASSWORD_ENV);
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.postgres_version < MIN_PG_VERSION {
            anyhow::bail!(
                "PostgreSQL {} is not supported (minimum {})",
                self.postgres_version,
                MIN_PG_VERSION
            );
        }

        // Validate data directory (absolute, usable inside a unit Environment= line)
        if let Some(ref dir) = self.data_directory {
            if !dir.is_absolute() {
                anyhow::bail!("Data directory must be an absolute path: {}", dir.display());
            }
            if dir.to_string_lossy().contains(char::is_whitespace) {
                anyhow::bail!("Data directory cannot contain whitespace: {}", dir.display());
            }
        }

        // Validate admin role
        let role = self.admin_role.as_str();
        if role.trim().is_empty() {
            anyhow::bail!("Admin role must be specified");
        }
        if role.len() > MAX_IDENT_LEN {
            anyhow::bail!("Admin role must be at most {} bytes long", MAX_IDENT_LEN);
        }
        if role.contains('\0') {
            anyhow::bail!("Admin role cannot contain NUL bytes");
        }

        // Validate package names
        for package in &self.extra_packages {
            if package.trim().is_empty() {
                anyhow::bail!("Extra package names cannot be empty");
            }
            if package.starts_with('-') || package.contains(char::is_whitespace) {
                anyhow::bail!("Invalid package name '{}'", package);
            }
        }

        for rule in &self.hba_rules {
            rule.validate()?;
        }

        // Validate server settings (GUC names, single-line values)
        for (key, value) in &self.server_settings {
            let valid_key = key
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if !valid_key {
                anyhow::bail!("Invalid server setting name '{}'", key);
            }
            if value.trim().is_empty() {
                anyhow::bail!("Server setting '{}' must have a value", key);
            }
            if value.contains('\n') || value.contains('\r') {
                anyhow::bail!("Server setting '{}' must be a single line", key);
            }
        }

        for command in &self.post_commands {
            if command.name.trim().is_empty() {
                anyhow::bail!("Post-install command name must be specified");
            }
            if command.program.trim().is_empty() {
                anyhow::bail!("Post-install command '{}' has no program", command.name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ProvisionConfig::default();
        assert_eq!(config.postgres_version, 17);
        assert_eq!(config.admin_role, "postgres");
        assert!(config.admin_password.is_none());
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/pgsql/17/data"));
        assert!(!config.has_custom_data_dir());
        assert_eq!(config.server_settings.get("work_mem").map(String::as_str), Some("6990kB"));
        assert_eq!(
            config.server_settings.get("listen_addresses").map(String::as_str),
            Some("'*'")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_object_is_default() {
        let config: ProvisionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.postgres_version, 17);
        assert_eq!(config.hba_rules.len(), 2);
    }

    #[test]
    fn test_save_and_load_json_config() {
        let mut config = ProvisionConfig::default();
        config.data_directory = Some(PathBuf::from("/srv/pgdata"));
        config.extra_packages = vec!["postgresql17-contrib".to_string()];
        config.admin_password = Some(Secret::new("s3cret").unwrap());

        let temp_file = NamedTempFile::new().unwrap();
        config.save_to_file(temp_file.path()).unwrap();

        let raw = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(!raw.contains("s3cret"));
        assert!(!raw.contains("admin_password"));

        let loaded = ProvisionConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.data_directory, config.data_directory);
        assert_eq!(loaded.extra_packages, config.extra_packages);
        assert_eq!(loaded.hba_rules, config.hba_rules);
        assert!(loaded.admin_password.is_none());
    }

    #[test]
    fn test_load_password_from_json() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(br#"{ "admin_password": "from-file" }"#)
            .unwrap();
        temp_file.flush().unwrap();

        let loaded = ProvisionConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.admin_password.unwrap().expose(), "from-file");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ProvisionConfig::load_from_file(Path::new("/nonexistent/path"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_json() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ invalid json }").unwrap();
        temp_file.flush().unwrap();

        assert!(ProvisionConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_unknown_auth_method_fails() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(
                br#"{ "hba_rules": [ { "type": "host", "database": "all", "user": "all",
                      "address": "0.0.0.0/0", "method": "kerberos9" } ] }"#,
            )
            .unwrap();
        temp_file.flush().unwrap();

        assert!(ProvisionConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_password_file_override() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"from-password-file\n").unwrap();
        temp_file.flush().unwrap();

        let mut config = ProvisionConfig::default();
        config.resolve_admin_password(Some(temp_file.path())).unwrap();
        assert_eq!(
            config.admin_password.as_ref().map(|s| s.expose()),
            Some("from-password-file")
        );
    }

    #[test]
    fn test_custom_data_dir() {
        let config = ProvisionConfig {
            data_directory: Some(PathBuf::from("/srv/pgdata")),
            ..Default::default()
        };
        assert!(config.has_custom_data_dir());
        assert_eq!(config.data_dir(), PathBuf::from("/srv/pgdata"));

        let same = ProvisionConfig {
            data_directory: Some(PathBuf::from("/var/lib/pgsql/17/data")),
            ..Default::default()
        };
        assert!(!same.has_custom_data_dir());
    }

    #[test]
    fn test_validation_rejects_relative_data_dir() {
        let config = ProvisionConfig {
            data_directory: Some(PathBuf::from("pgdata")),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_old_version() {
        let config = ProvisionConfig {
            postgres_version: 9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_setting() {
        let mut config = ProvisionConfig::default();
        config
            .server_settings
            .insert("work mem".to_string(), "4MB".to_string());
        assert!(config.validate().is_err());

        let mut config = ProvisionConfig::default();
        config
            .server_settings
            .insert("work_mem".to_string(), "4MB\nfsync = off".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_hba_address_mismatch() {
        let mut config = ProvisionConfig::default();
        config.hba_rules.push(HbaRule {
            conn_type: HbaConnectionType::Host,
            database: "all".to_string(),
            user: "all".to_string(),
            address: None,
            method: HbaAuthMethod::Md5,
        });
        assert!(config.validate().is_err());

        let mut config = ProvisionConfig::default();
        config.hba_rules.push(HbaRule {
            conn_type: HbaConnectionType::Local,
            database: "all".to_string(),
            user: "all".to_string(),
            address: Some("127.0.0.1/32".to_string()),
            method: HbaAuthMethod::Peer,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_package() {
        let config = ProvisionConfig {
            extra_packages: vec!["--nogpgcheck".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hba_rule_render_and_pattern() {
        let rule = HbaRule::host("0.0.0.0/0", HbaAuthMethod::ScramSha256);
        let line = rule.render();
        assert!(line.starts_with("host    all             all             0.0.0.0/0"));
        assert!(line.ends_with("scram-sha-256"));

        let pattern = rule.pattern().unwrap();
        assert!(pattern.is_match(&line));
        assert!(pattern.is_match("host all all 0.0.0.0/0 md5"));
        assert!(pattern.is_match("#host    all    all    0.0.0.0/0    ident"));
        assert!(!pattern.is_match("host all all 127.0.0.1/32 md5"));
        assert!(!pattern.is_match("host all all 0.0.0.0/00 md5"));
    }

    #[test]
    fn test_local_hba_rule() {
        let rule = HbaRule {
            conn_type: HbaConnectionType::Local,
            database: "all".to_string(),
            user: "all".to_string(),
            address: None,
            method: HbaAuthMethod::Peer,
        };
        assert_eq!(rule.render(), "local   all             all             peer");
        let upsert = rule.to_upsert().unwrap();
        assert!(upsert.pattern().is_match("local   all   all   scram-sha-256"));
        assert!(!upsert.pattern().is_match("local   replication   all   peer"));
    }

    #[test]
    fn test_auth_method_strings() {
        assert_eq!(HbaAuthMethod::ScramSha256.to_string(), "scram-sha-256");
        assert_eq!(
            "scram-sha-256".parse::<HbaAuthMethod>().unwrap(),
            HbaAuthMethod::ScramSha256
        );
        assert_eq!(
            serde_json::to_string(&HbaAuthMethod::ScramSha256).unwrap(),
            "\"scram-sha-256\""
        );
    }
}
