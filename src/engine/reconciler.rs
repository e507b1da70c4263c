//! The reconciler: applies an ordered step list to a host.
//!
//! Steps run strictly in order. Each operation is dispatched to the matching
//! host capability; a failing step aborts the run with its name attached
//! unless it is marked `ignore_failure`, in which case the failure is recorded
//! and the next step runs. There is no rollback.

use std::path::Path;

use log::{debug, error, info, warn};

use crate::commands::postgres::ClusterSetupArgs;
use crate::config_file::ProvisionConfig;
use crate::distro::{PgLayout, PG_VERSION_FILE};
use crate::error::{ProvisionError, Result};
use crate::host::Host;
use crate::provision_state::{ProvisionContext, ProvisionStage};
use crate::step::{ExecSpec, Operation, RunReport, Step, StepOutcome};

/// Setup-helper and initdb both say "... is not empty" when the cluster exists.
const CLUSTER_EXISTS_MARKER: &str = "is not empty";

/// An ordered, validated plan ready to run.
#[derive(Debug, Clone)]
pub struct Reconciler {
    steps: Vec<Step>,
}

impl Reconciler {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Build the plan for `config`.
    pub fn from_config(config: &ProvisionConfig) -> Result<Self> {
        let steps = super::plan::build_plan(config)
            .map_err(|e| ProvisionError::validation(format!("{:#}", e)))?;
        Ok(Self::new(steps))
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Execute every step against `host`.
    ///
    /// # Errors
    ///
    /// Returns the first fatal step error wrapped in `ProvisionError::Step`.
    pub fn run(&self, host: &mut Host) -> Result<RunReport> {
        let mut ctx = ProvisionContext::new();
        let mut report = RunReport::default();
        let total = self.steps.len();

        for (index, step) in self.steps.iter().enumerate() {
            ctx.advance_to(step.stage)
                .map_err(|e| ProvisionError::from(e).in_step(&step.name))?;
            info!("[{}/{}] {}", index + 1, total, step);

            match execute(step, host, &report) {
                Ok(outcome) => {
                    info!("{}: {}", step.name, outcome);
                    report.push(&step.name, outcome);
                }
                Err(err) if step.ignore_failure => {
                    warn!("{}: failure ignored: {}", step.name, err);
                    report.push(&step.name, StepOutcome::IgnoredFailure(err.to_string()));
                }
                Err(err) => {
                    error!("{}: {}", step.name, err);
                    // Already failing; a transition error here adds nothing
                    let _ = ctx.fail();
                    return Err(err.in_step(&step.name));
                }
            }
        }

        ctx.advance_to(ProvisionStage::Completed)?;
        info!(
            "Provisioning finished: {} steps, {} changed",
            report.entries.len(),
            report.changed_count()
        );
        Ok(report)
    }
}

/// Run one step's operation. `report` holds the outcomes of earlier steps.
fn execute(step: &Step, host: &mut Host, report: &RunReport) -> Result<StepOutcome> {
    match &step.operation {
        Operation::Service { unit, action } => {
            host.services.set_state(unit, *action).map(Into::into)
        }
        Operation::ReloadUnits { after } => match report.outcome(after) {
            Some(StepOutcome::Changed | StepOutcome::DryRun) => {
                host.services.daemon_reload().map(Into::into)
            }
            _ => {
                debug!("{} made no change, skipping daemon-reload", after);
                Ok(StepOutcome::Unchanged)
            }
        },
        Operation::InstallPackages { packages } => host.packages.install(packages).map(Into::into),
        Operation::ImportKey { url } => host.packages.import_key(url).map(Into::into),
        Operation::DisableModule { module } => {
            host.packages.disable_module(module).map(Into::into)
        }
        Operation::Exec(spec) => run_exec(spec, host),
        Operation::InitCluster { layout, data_dir } => init_cluster(layout, data_dir, host),
        Operation::BackupFile { path } => host.files.backup(path).map(Into::into),
        Operation::UpsertLine {
            path,
            upsert,
            create,
        } => host.files.upsert_line(path, upsert, *create).map(Into::into),
        Operation::SetRolePassword {
            layout,
            role,
            password,
        } => host
            .credentials
            .set_role_password(layout, role, password)
            .map(Into::into),
    }
}

fn run_exec(spec: &ExecSpec, host: &mut Host) -> Result<StepOutcome> {
    if let Some(ref creates) = spec.creates {
        if host.files.exists(creates) {
            info!("{} exists, skipping {}", creates.display(), spec.program);
            return Ok(StepOutcome::Unchanged);
        }
    }

    let output = host.commands.run(spec)?;
    if output.dry_run {
        Ok(StepOutcome::DryRun)
    } else if output.success {
        Ok(StepOutcome::Changed)
    } else {
        Err(ProvisionError::command(format!(
            "{} failed (exit code {}): {}",
            spec,
            output.exit_code.unwrap_or(-1),
            output.message()
        )))
    }
}

/// Initialize the cluster, classifying the tolerated failure modes.
///
/// - `PG_VERSION` already in the data directory: `Unchanged`, initdb not run
/// - initdb reports a non-empty data directory: `AlreadySatisfied`
/// - any other failure: `ProvisionError::Init`
fn init_cluster(layout: &PgLayout, data_dir: &Path, host: &mut Host) -> Result<StepOutcome> {
    let marker = data_dir.join(PG_VERSION_FILE);
    if host.files.exists(&marker) {
        info!("Cluster already initialized in {}", data_dir.display());
        return Ok(StepOutcome::Unchanged);
    }

    let output = host.commands.run(&ClusterSetupArgs { layout: *layout })?;
    if output.dry_run {
        return Ok(StepOutcome::DryRun);
    }
    if output.success {
        return Ok(StepOutcome::Changed);
    }

    if output.combined().contains(CLUSTER_EXISTS_MARKER) {
        return Ok(StepOutcome::AlreadySatisfied(output.message().to_string()));
    }
    Err(ProvisionError::init(format!(
        "{} initdb failed (exit code {}): {}",
        layout.setup_program().display(),
        output.exit_code.unwrap_or(-1),
        output.message()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::{fake_host, FakeFiles, FakeHandle};
    use crate::step::{PackageSpec, ServiceAction};
    use std::path::PathBuf;

    fn init_step() -> Step {
        Step::new(
            "init-cluster",
            ProvisionStage::InitializingCluster,
            Operation::InitCluster {
                layout: PgLayout::new(17),
                data_dir: PathBuf::from("/var/lib/pgsql/17/data"),
            },
        )
        .ignoring_failure()
    }

    #[test]
    fn test_init_skipped_when_cluster_exists() {
        let handle = FakeHandle::new();
        FakeFiles::put(&handle, "/var/lib/pgsql/17/data/PG_VERSION", "17\n");
        let mut host = fake_host(&handle);

        let report = Reconciler::new(vec![init_step()]).run(&mut host).unwrap();
        assert_eq!(report.outcome("init-cluster"), Some(&StepOutcome::Unchanged));
        assert!(handle.journal().is_empty());
    }

    #[test]
    fn test_init_not_empty_is_already_satisfied() {
        let handle = FakeHandle::new();
        handle.fail_on(
            "exec /usr/pgsql-17/bin/postgresql-17-setup",
            "Data directory \"/var/lib/pgsql/17/data\" is not empty!",
        );
        let mut host = fake_host(&handle);

        let report = Reconciler::new(vec![init_step()]).run(&mut host).unwrap();
        assert!(matches!(
            report.outcome("init-cluster"),
            Some(StepOutcome::AlreadySatisfied(_))
        ));
    }

    #[test]
    fn test_init_other_failure_is_ignored() {
        let handle = FakeHandle::new();
        handle.fail_on("exec /usr/pgsql-17/bin/postgresql-17-setup", "disk full");
        let mut host = fake_host(&handle);

        let report = Reconciler::new(vec![init_step()]).run(&mut host).unwrap();
        match report.outcome("init-cluster") {
            Some(StepOutcome::IgnoredFailure(msg)) => assert!(msg.contains("disk full")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_fatal_error_names_step() {
        let handle = FakeHandle::new();
        handle.fail_on("systemctl start", "Job for postgresql-17.service failed");
        let mut host = fake_host(&handle);

        let steps = vec![Step::new(
            "start-postgresql",
            ProvisionStage::StartingService,
            Operation::Service {
                unit: "postgresql-17".to_string(),
                action: ServiceAction::Start,
            },
        )];
        let err = Reconciler::new(steps).run(&mut host).unwrap_err();
        assert_eq!(err.failed_step(), Some("start-postgresql"));
        assert!(matches!(err.root(), ProvisionError::Service(_)));
    }

    #[test]
    fn test_out_of_order_stages_are_rejected() {
        let handle = FakeHandle::new();
        let mut host = fake_host(&handle);
        let steps = vec![
            Step::new(
                "install",
                ProvisionStage::InstallingPackages,
                Operation::InstallPackages {
                    packages: vec![PackageSpec::name("a")],
                },
            ),
            Step::new(
                "late-firewall",
                ProvisionStage::PreparingHost,
                Operation::Service {
                    unit: "firewalld".to_string(),
                    action: ServiceAction::Stop,
                },
            ),
        ];
        let err = Reconciler::new(steps).run(&mut host).unwrap_err();
        assert_eq!(err.failed_step(), Some("late-firewall"));
        assert!(matches!(err.root(), ProvisionError::Transition(_)));
    }

    #[test]
    fn test_exec_creates_guard() {
        let handle = FakeHandle::new();
        FakeFiles::put(&handle, "/var/lib/marker", "");
        let mut host = fake_host(&handle);

        let steps = vec![Step::new(
            "marker",
            ProvisionStage::Finalizing,
            Operation::Exec(ExecSpec {
                program: "/usr/bin/touch".to_string(),
                args: vec!["/var/lib/marker".to_string()],
                creates: Some(PathBuf::from("/var/lib/marker")),
            }),
        )];
        let report = Reconciler::new(steps).run(&mut host).unwrap();
        assert_eq!(report.outcome("marker"), Some(&StepOutcome::Unchanged));
        assert!(handle.journal().is_empty());
    }

    #[test]
    fn test_reload_follows_trigger_step() {
        let upsert = crate::lineinfile::LineUpsert::new(
            crate::lineinfile::LinePattern::new("^Environment=PGDATA=").unwrap(),
            "Environment=PGDATA=/srv/pgdata",
        )
        .unwrap();
        let steps = vec![
            Step::new(
                "override",
                ProvisionStage::InitializingCluster,
                Operation::UpsertLine {
                    path: PathBuf::from("/etc/override.conf"),
                    upsert,
                    create: true,
                },
            ),
            Step::new(
                "reload",
                ProvisionStage::InitializingCluster,
                Operation::ReloadUnits {
                    after: "override".to_string(),
                },
            ),
        ];
        let reconciler = Reconciler::new(steps);
        let handle = FakeHandle::new();

        let first = reconciler.run(&mut fake_host(&handle)).unwrap();
        assert_eq!(first.outcome("reload"), Some(&StepOutcome::Changed));
        assert!(handle.journal().contains(&"systemctl daemon-reload".to_string()));

        handle.clear_journal();
        let second = reconciler.run(&mut fake_host(&handle)).unwrap();
        assert_eq!(second.outcome("reload"), Some(&StepOutcome::Unchanged));
        assert!(second.is_converged());
        assert!(handle.journal().is_empty());
    }

    #[test]
    fn test_exec_failure_is_command_error() {
        let handle = FakeHandle::new();
        handle.fail_on("exec /bin/false", "exit 1");
        let mut host = fake_host(&handle);

        let steps = vec![Step::new(
            "false",
            ProvisionStage::Finalizing,
            Operation::Exec(ExecSpec {
                program: "/bin/false".to_string(),
                args: vec![],
                creates: None,
            }),
        )];
        let err = Reconciler::new(steps).run(&mut host).unwrap_err();
        assert!(matches!(err.root(), ProvisionError::Command(_)));
    }
}
