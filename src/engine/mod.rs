//! Engine modules: the "brain" that turns a provisioning config into steps and
//! applies them.
//!
//! - `plan`: pure config → ordered `Step` list
//! - `reconciler`: executes steps against a `Host`, halting on fatal errors

pub mod plan;
pub mod reconciler;

pub use plan::build_plan;
pub use reconciler::Reconciler;
