//! Error handling module for pgprovision
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every capability (services, packages, files, commands, credentials) reports
//! failures through its own variant so the reconciler can decide what is fatal.

use thiserror::Error;

/// Main error type for pgprovision
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// IO errors (file operations, process spawning, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Repository, signing key or package installation failures
    #[error("Package error: {0}")]
    Package(String),

    /// Service stop/disable/enable/start failures
    #[error("Service error: {0}")]
    Service(String),

    /// Database cluster initialization failures
    #[error("Cluster init error: {0}")]
    Init(String),

    /// Missing file or directory, unreadable or unwritable configuration file
    #[error("File edit error: {0}")]
    FileEdit(String),

    /// Arbitrary command execution failures
    #[error("Command failed: {0}")]
    Command(String),

    /// Failures while setting a database role credential
    #[error("Credential error: {0}")]
    Credential(String),

    /// Configuration errors (loading, parsing)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (config values, patterns)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provision state machine transition errors
    #[error("Provision transition error: {0}")]
    Transition(String),

    /// A fatal step failure; carries the name of the step that aborted the run
    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<ProvisionError>,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pgprovision operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

// Convenient error constructors
impl ProvisionError {
    /// Create a package error
    pub fn package(msg: impl Into<String>) -> Self {
        Self::Package(msg.into())
    }

    /// Create a service error
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Create a cluster init error
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    /// Create a file edit error
    pub fn file_edit(msg: impl Into<String>) -> Self {
        Self::FileEdit(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a transition error
    pub fn transition(msg: impl Into<String>) -> Self {
        Self::Transition(msg.into())
    }

    /// Wrap an error with the name of the step that produced it
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// Name of the failing step, if this error came out of a reconciliation run
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The underlying error, looking through any step wrapper
    pub fn root(&self) -> &ProvisionError {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::package("postgresql17-server not found");
        assert_eq!(err.to_string(), "Package error: postgresql17-server not found");

        let err = ProvisionError::validation("data directory must be absolute");
        assert_eq!(
            err.to_string(),
            "Validation error: data directory must be absolute"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProvisionError = io_err.into();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(ProvisionError::service("x"), ProvisionError::Service(_)));
        assert!(matches!(ProvisionError::init("x"), ProvisionError::Init(_)));
        assert!(matches!(ProvisionError::file_edit("x"), ProvisionError::FileEdit(_)));
        assert!(matches!(ProvisionError::command("x"), ProvisionError::Command(_)));
        assert!(matches!(ProvisionError::credential("x"), ProvisionError::Credential(_)));
    }

    #[test]
    fn test_step_wrapper() {
        let err = ProvisionError::package("dnf exited with code 1").in_step("install-server");
        assert_eq!(err.failed_step(), Some("install-server"));
        assert!(matches!(err.root(), ProvisionError::Package(_)));
        assert_eq!(
            err.to_string(),
            "Step 'install-server' failed: Package error: dnf exited with code 1"
        );
    }
}
