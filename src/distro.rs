//! Oracle Linux 8 / PGDG layout.
//!
//! Repository descriptors, signing keys, package names and on-disk paths for
//! the PostgreSQL Global Development Group (PGDG) RPMs on EL8. Everything
//! version-dependent is derived from the major version through [`PgLayout`].

use std::path::PathBuf;

/// The only major version the defaults target.
pub const DEFAULT_PG_VERSION: u32 = 17;

/// Oldest major version still published in the EL8 PGDG repository.
pub const MIN_PG_VERSION: u32 = 13;

/// PGDG repository descriptor RPM for EL8 x86_64.
pub const PGDG_REPO_RPM_URL: &str =
    "https://download.postgresql.org/pub/repos/yum/reporpms/EL-8-x86_64/pgdg-redhat-repo-latest.noarch.rpm";

/// Package installed by [`PGDG_REPO_RPM_URL`].
pub const PGDG_REPO_PACKAGE: &str = "pgdg-redhat-repo";

/// PGDG RPM signing key.
pub const PGDG_KEY_URL: &str = "https://download.postgresql.org/pub/repos/yum/keys/PGDG-RPM-GPG-KEY-RHEL";

/// EPEL release descriptor RPM for EL8.
pub const EPEL_REPO_RPM_URL: &str =
    "https://dl.fedoraproject.org/pub/epel/epel-release-latest-8.noarch.rpm";

/// Package installed by [`EPEL_REPO_RPM_URL`].
pub const EPEL_REPO_PACKAGE: &str = "epel-release";

/// EPEL 8 signing key.
pub const EPEL_KEY_URL: &str = "https://dl.fedoraproject.org/pub/epel/RPM-GPG-KEY-EPEL-8";

/// AppStream module that shadows the PGDG packages unless disabled.
pub const APPSTREAM_PG_MODULE: &str = "postgresql";

/// Firewall service disabled before the server is exposed.
pub const FIREWALL_SERVICE: &str = "firewalld";

/// OS account that owns the cluster.
pub const PG_OS_USER: &str = "postgres";

/// Marker file initdb writes into a populated data directory.
pub const PG_VERSION_FILE: &str = "PG_VERSION";

/// Client authentication file name inside the data directory.
pub const HBA_FILE: &str = "pg_hba.conf";

/// Server configuration file name inside the data directory.
pub const SERVER_CONF_FILE: &str = "postgresql.conf";

/// Paths and names for one PGDG major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgLayout {
    pub version: u32,
}

impl PgLayout {
    pub const fn new(version: u32) -> Self {
        Self { version }
    }

    /// Server package (`postgresql17-server`).
    pub fn server_package(&self) -> String {
        format!("postgresql{}-server", self.version)
    }

    /// Client package (`postgresql17`).
    pub fn client_package(&self) -> String {
        format!("postgresql{}", self.version)
    }

    /// systemd unit (`postgresql-17`).
    pub fn service_name(&self) -> String {
        format!("postgresql-{}", self.version)
    }

    /// Install prefix (`/usr/pgsql-17`).
    pub fn prefix(&self) -> PathBuf {
        PathBuf::from(format!("/usr/pgsql-{}", self.version))
    }

    /// Cluster setup helper (`/usr/pgsql-17/bin/postgresql-17-setup`).
    pub fn setup_program(&self) -> PathBuf {
        self.prefix()
            .join("bin")
            .join(format!("postgresql-{}-setup", self.version))
    }

    /// psql client binary.
    pub fn psql_program(&self) -> PathBuf {
        self.prefix().join("bin").join("psql")
    }

    /// Data directory the packaged unit uses (`/var/lib/pgsql/17/data`).
    pub fn default_data_dir(&self) -> PathBuf {
        PathBuf::from(format!("/var/lib/pgsql/{}/data", self.version))
    }

    /// systemd drop-in that overrides `PGDATA` for a custom data directory.
    pub fn unit_override_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/etc/systemd/system/{}.service.d/override.conf",
            self.service_name()
        ))
    }
}

impl Default for PgLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PG_VERSION)
    }
}
