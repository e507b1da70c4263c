//! In-memory handling of the database admin password.
//!
//! # Security Model
//!
//! **CRITICAL**: The password is NEVER placed in CLI arguments (visible in
//! `ps aux`) or in a child's environment (visible in `/proc/<pid>/environ`).
//! It lives in a [`Secret`], which is wiped from memory on drop and redacts
//! itself in `Debug`/`Display`, and is only ever written to a child's stdin.
//!
//! When the password is supplied through [`ADMIN_PASSWORD_ENV`] the variable
//! stays in the provisioner's own environment; `run_command_safe` strips it
//! from every child it spawns.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use crate::error::{ProvisionError, Result};

/// Environment variable consulted for the admin password.
pub const ADMIN_PASSWORD_ENV: &str = "PGPROVISION_ADMIN_PASSWORD";

/// Text shown wherever a secret would otherwise be printed.
pub const REDACTED: &str = "********";

/// A credential that zeroizes its buffer when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wrap a credential, rejecting values PostgreSQL cannot store.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = Zeroizing::new(value.into());
        if value.is_empty() {
            return Err(ProvisionError::validation("password must not be empty"));
        }
        if value.contains('\0') {
            return Err(ProvisionError::validation(
                "password must not contain NUL bytes",
            ));
        }
        Ok(Self(value))
    }

    /// Read a credential from a file, dropping one trailing newline.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::config(format!(
                "failed to read password file {}: {}",
                path.display(),
                e
            ))
        })?);
        let trimmed = raw
            .strip_suffix("\r\n")
            .or_else(|| raw.strip_suffix('\n'))
            .unwrap_or(raw.as_str());
        Self::new(trimmed)
    }

    /// Read a credential from an environment variable, if set and non-empty.
    pub fn from_env(var: &str) -> Result<Option<Self>> {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Self::new(value).map(Some),
            _ => Ok(None),
        }
    }

    /// Borrow the plaintext. Callers must not log or persist the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Render as a single-quoted SQL string literal.
    ///
    /// Assumes `standard_conforming_strings = on` (the default since 9.1):
    /// only single quotes need doubling.
    pub fn to_sql_literal(&self) -> Zeroizing<String> {
        let mut out = Zeroizing::new(String::with_capacity(self.0.len() + 2));
        out.push('\'');
        for ch in self.0.chars() {
            if ch == '\'' {
                out.push('\'');
            }
            out.push(ch);
        }
        out.push('\'');
        out
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Zeroizing::new(String::deserialize(deserializer)?);
        Secret::new(raw.as_str()).map_err(serde::de::Error::custom)
    }
}
