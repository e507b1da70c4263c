//! Provision State Machine
//!
//! Authoritative, Rust-side record of how far a provisioning run has got.
//! Every `Step` belongs to a stage; the reconciler walks the stages forward as
//! it executes steps, which gives progress logging and a precise "failed at"
//! stage when a fatal error aborts the run.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! PreparingHost            (firewall)
//!     ↓
//! RegisteringRepositories  (repo RPMs, signing keys, module disable)
//!     ↓
//! InstallingPackages
//!     ↓
//! InitializingCluster      (PGDATA drop-in, initdb)
//!     ↓
//! ConfiguringServer        (backups, pg_hba.conf, postgresql.conf)
//!     ↓
//! StartingService
//!     ↓
//! SettingCredentials
//!     ↓
//! Finalizing               (post-install commands)
//!     ↓
//! Completed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```
//!
//! Stages with no steps in a given plan are passed through, never skipped:
//! `advance_to` walks every intermediate stage so the history stays complete.

use std::fmt;

use strum::EnumIter;
use thiserror::Error;

/// Provisioning stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
#[repr(u8)]
pub enum ProvisionStage {
    NotStarted = 0,
    PreparingHost = 1,
    RegisteringRepositories = 2,
    InstallingPackages = 3,
    InitializingCluster = 4,
    ConfiguringServer = 5,
    StartingService = 6,
    SettingCredentials = 7,
    Finalizing = 8,
    Completed = 9,
    Failed = 255,
}

impl ProvisionStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns true if this is a terminal state (Completed or Failed)
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns the next stage in the sequence, or None at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::PreparingHost),
            Self::PreparingHost => Some(Self::RegisteringRepositories),
            Self::RegisteringRepositories => Some(Self::InstallingPackages),
            Self::InstallingPackages => Some(Self::InitializingCluster),
            Self::InitializingCluster => Some(Self::ConfiguringServer),
            Self::ConfiguringServer => Some(Self::StartingService),
            Self::StartingService => Some(Self::SettingCredentials),
            Self::SettingCredentials => Some(Self::Finalizing),
            Self::Finalizing => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::PreparingHost => "Preparing host",
            Self::RegisteringRepositories => "Registering repositories",
            Self::InstallingPackages => "Installing packages",
            Self::InitializingCluster => "Initializing database cluster",
            Self::ConfiguringServer => "Configuring server",
            Self::StartingService => "Starting service",
            Self::SettingCredentials => "Setting credentials",
            Self::Finalizing => "Finalizing",
            Self::Completed => "Provisioning complete",
            Self::Failed => "Provisioning failed",
        }
    }

    /// Approximate progress percentage for this stage
    pub const fn progress_percent(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::PreparingHost => 5,
            Self::RegisteringRepositories => 15,
            Self::InstallingPackages => 35,
            Self::InitializingCluster => 55,
            Self::ConfiguringServer => 70,
            Self::StartingService => 85,
            Self::SettingCredentials => 92,
            Self::Finalizing => 97,
            Self::Completed => 100,
            Self::Failed => 0,
        }
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionTransitionError {
    /// Attempted to go backwards (steps are out of stage order)
    #[error("Cannot go backwards from {from} to {to} (provisioning is forward-only)")]
    BackwardTransition {
        from: ProvisionStage,
        to: ProvisionStage,
    },

    /// Attempted to transition from a terminal state
    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: ProvisionStage },

    /// Attempted to enter Failed through a normal transition
    #[error("Use fail() to enter {to}")]
    InvalidTarget { to: ProvisionStage },
}

/// Tracks the current stage of one provisioning run.
///
/// # Example
///
/// ```
/// use pgprovision::provision_state::{ProvisionContext, ProvisionStage};
///
/// let mut ctx = ProvisionContext::new();
/// ctx.advance_to(ProvisionStage::InstallingPackages).unwrap();
/// assert_eq!(ctx.current_stage(), ProvisionStage::InstallingPackages);
///
/// // Forward-only
/// assert!(ctx.advance_to(ProvisionStage::PreparingHost).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    current: ProvisionStage,
    failed_at: Option<ProvisionStage>,
    /// Every stage entered, with a unix timestamp
    stage_history: Vec<(ProvisionStage, u64)>,
}

impl Default for ProvisionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionContext {
    pub fn new() -> Self {
        Self {
            current: ProvisionStage::NotStarted,
            failed_at: None,
            stage_history: Vec::new(),
        }
    }

    #[inline]
    pub fn current_stage(&self) -> ProvisionStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<ProvisionStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == ProvisionStage::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == ProvisionStage::Failed
    }

    pub fn stage_history(&self) -> &[(ProvisionStage, u64)] {
        &self.stage_history
    }

    /// Advance one stage.
    pub fn advance(&mut self) -> Result<ProvisionStage, ProvisionTransitionError> {
        let next = self
            .current
            .next()
            .ok_or(ProvisionTransitionError::FromTerminalState { from: self.current })?;
        self.enter(next);
        Ok(next)
    }

    /// Advance through every intermediate stage until `target` is current.
    ///
    /// Staying at the current stage is a no-op.
    pub fn advance_to(
        &mut self,
        target: ProvisionStage,
    ) -> Result<ProvisionStage, ProvisionTransitionError> {
        if self.current.is_terminal() {
            return Err(ProvisionTransitionError::FromTerminalState { from: self.current });
        }
        if target == ProvisionStage::Failed {
            return Err(ProvisionTransitionError::InvalidTarget { to: target });
        }
        if target.order() < self.current.order() {
            return Err(ProvisionTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        while self.current != target {
            self.advance()?;
        }
        Ok(self.current)
    }

    /// Mark the run as failed at the current stage.
    pub fn fail(&mut self) -> Result<(), ProvisionTransitionError> {
        if self.current.is_terminal() {
            return Err(ProvisionTransitionError::FromTerminalState { from: self.current });
        }
        self.failed_at = Some(self.current);
        self.enter(ProvisionStage::Failed);
        Ok(())
    }

    fn enter(&mut self, stage: ProvisionStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        log::info!("[{:>3}%] {}", stage.progress_percent(), stage.description());
        self.stage_history.push((stage, timestamp));
        self.current = stage;
    }
}

impl From<ProvisionTransitionError> for crate::error::ProvisionError {
    fn from(err: ProvisionTransitionError) -> Self {
        crate::error::ProvisionError::transition(err.to_string())
    }
}
