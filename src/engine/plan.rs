//! Provisioning Plan Builder
//!
//! Translates a `ProvisionConfig` into the ordered `Step` list the reconciler
//! executes.
//!
//! # Plan Order
//!
//! | Stage                   | Steps |
//! |-------------------------|-------|
//! | PreparingHost           | stop firewalld → disable firewalld |
//! | RegisteringRepositories | EPEL repo RPM → PGDG repo RPM → signing keys → disable AppStream module |
//! | InstallingPackages      | server + client → extra packages |
//! | InitializingCluster     | PGDATA in drop-in `[Service]` → daemon-reload if it changed → `postgresql-NN-setup initdb` |
//! | ConfiguringServer       | backups → `pg_hba.conf` rules → `postgresql.conf` settings |
//! | StartingService         | enable → start |
//! | SettingCredentials      | admin password |
//! | Finalizing              | post-install commands |
//!
//! # Design
//!
//! - **Pure logic**: No I/O, no side effects; only generates the plan
//! - **Validated**: The config is validated before any step is produced
//! - **Convergent**: Every step is safe to re-run against a provisioned host

use anyhow::Result;
use log::warn;

use crate::config_file::ProvisionConfig;
use crate::distro::{
    APPSTREAM_PG_MODULE, EPEL_KEY_URL, EPEL_REPO_PACKAGE, EPEL_REPO_RPM_URL, FIREWALL_SERVICE,
    HBA_FILE, PGDG_KEY_URL, PGDG_REPO_PACKAGE, PGDG_REPO_RPM_URL, SERVER_CONF_FILE,
};
use crate::lineinfile::{LinePattern, LineUpsert};
use crate::provision_state::ProvisionStage;
use crate::step::{ExecSpec, Operation, PackageSpec, ServiceAction, Step};

/// Step that writes `Environment=PGDATA=` into the unit drop-in.
const UNIT_OVERRIDE_STEP: &str = "unit-override-pgdata";

/// Build the ordered step list for `config`.
pub fn build_plan(config: &ProvisionConfig) -> Result<Vec<Step>> {
    config.validate()?;

    let mut steps = Vec::new();
    plan_host_preparation(config, &mut steps);
    plan_repositories(config, &mut steps);
    plan_packages(config, &mut steps);
    plan_cluster(config, &mut steps)?;
    plan_configuration(config, &mut steps)?;
    plan_service(config, &mut steps);
    plan_credentials(config, &mut steps);
    plan_post_commands(config, &mut steps);
    Ok(steps)
}

fn plan_host_preparation(config: &ProvisionConfig, steps: &mut Vec<Step>) {
    if !config.disable_firewall {
        return;
    }
    for (name, action) in [
        ("stop-firewall", ServiceAction::Stop),
        ("disable-firewall", ServiceAction::Disable),
    ] {
        steps.push(Step::new(
            name,
            ProvisionStage::PreparingHost,
            Operation::Service {
                unit: FIREWALL_SERVICE.to_string(),
                action,
            },
        ));
    }
}

fn plan_repositories(config: &ProvisionConfig, steps: &mut Vec<Step>) {
    let stage = ProvisionStage::RegisteringRepositories;

    if config.install_epel {
        steps.push(Step::new(
            "install-epel-repository",
            stage,
            Operation::InstallPackages {
                packages: vec![PackageSpec::url(EPEL_REPO_RPM_URL, EPEL_REPO_PACKAGE)],
            },
        ));
    }
    steps.push(Step::new(
        "install-pgdg-repository",
        stage,
        Operation::InstallPackages {
            packages: vec![PackageSpec::url(PGDG_REPO_RPM_URL, PGDG_REPO_PACKAGE)],
        },
    ));

    if config.install_epel {
        steps.push(Step::new(
            "import-epel-key",
            stage,
            Operation::ImportKey {
                url: EPEL_KEY_URL.to_string(),
            },
        ));
    }
    steps.push(Step::new(
        "import-pgdg-key",
        stage,
        Operation::ImportKey {
            url: PGDG_KEY_URL.to_string(),
        },
    ));

    steps.push(Step::new(
        "disable-appstream-postgresql",
        stage,
        Operation::DisableModule {
            module: APPSTREAM_PG_MODULE.to_string(),
        },
    ));
}

fn plan_packages(config: &ProvisionConfig, steps: &mut Vec<Step>) {
    let layout = config.layout();
    steps.push(Step::new(
        "install-postgresql",
        ProvisionStage::InstallingPackages,
        Operation::InstallPackages {
            packages: vec![
                PackageSpec::name(layout.server_package()),
                PackageSpec::name(layout.client_package()),
            ],
        },
    ));

    if !config.extra_packages.is_empty() {
        steps.push(Step::new(
            "install-extra-packages",
            ProvisionStage::InstallingPackages,
            Operation::InstallPackages {
                packages: config.extra_packages.iter().map(PackageSpec::name).collect(),
            },
        ));
    }
}

fn plan_cluster(config: &ProvisionConfig, steps: &mut Vec<Step>) -> Result<()> {
    let stage = ProvisionStage::InitializingCluster;
    let layout = config.layout();
    let data_dir = config.data_dir();

    // The setup helper and the unit both read PGDATA from the unit environment
    if config.has_custom_data_dir() {
        let pgdata = LineUpsert::new(
            LinePattern::new(r"^#?\s*Environment=PGDATA=")?,
            format!("Environment=PGDATA={}", data_dir.display()),
        )?
        .in_section("[Service]")?;

        steps.push(Step::new(
            UNIT_OVERRIDE_STEP,
            stage,
            Operation::UpsertLine {
                path: layout.unit_override_path(),
                upsert: pgdata,
                create: true,
            },
        ));
        steps.push(Step::new(
            "reload-units",
            stage,
            Operation::ReloadUnits {
                after: UNIT_OVERRIDE_STEP.to_string(),
            },
        ));
    }

    steps.push(
        Step::new(
            "init-cluster",
            stage,
            Operation::InitCluster { layout, data_dir },
        )
        .ignoring_failure(),
    );
    Ok(())
}

fn plan_configuration(config: &ProvisionConfig, steps: &mut Vec<Step>) -> Result<()> {
    let stage = ProvisionStage::ConfiguringServer;
    let data_dir = config.data_dir();
    let hba = data_dir.join(HBA_FILE);
    let server_conf = data_dir.join(SERVER_CONF_FILE);

    steps.push(Step::new(
        "backup-pg-hba",
        stage,
        Operation::BackupFile { path: hba.clone() },
    ));
    steps.push(Step::new(
        "backup-postgresql-conf",
        stage,
        Operation::BackupFile {
            path: server_conf.clone(),
        },
    ));

    for (index, rule) in config.hba_rules.iter().enumerate() {
        steps.push(Step::new(
            format!("hba-rule-{}", index + 1),
            stage,
            Operation::UpsertLine {
                path: hba.clone(),
                upsert: rule.to_upsert()?,
                create: false,
            },
        ));
    }

    for (key, value) in &config.server_settings {
        steps.push(Step::new(
            format!("set-{}", key),
            stage,
            Operation::UpsertLine {
                path: server_conf.clone(),
                upsert: LineUpsert::setting(key, value)?,
                create: false,
            },
        ));
    }
    Ok(())
}

fn plan_service(config: &ProvisionConfig, steps: &mut Vec<Step>) {
    let unit = config.layout().service_name();
    for (name, action) in [
        ("enable-postgresql", ServiceAction::Enable),
        ("start-postgresql", ServiceAction::Start),
    ] {
        steps.push(Step::new(
            name,
            ProvisionStage::StartingService,
            Operation::Service {
                unit: unit.clone(),
                action,
            },
        ));
    }
}

fn plan_credentials(config: &ProvisionConfig, steps: &mut Vec<Step>) {
    match config.admin_password {
        Some(ref password) => steps.push(Step::new(
            "set-admin-password",
            ProvisionStage::SettingCredentials,
            Operation::SetRolePassword {
                layout: config.layout(),
                role: config.admin_role.clone(),
                password: password.clone(),
            },
        )),
        None => warn!(
            "No admin password configured; role '{}' keeps its current password",
            config.admin_role
        ),
    }
}

fn plan_post_commands(config: &ProvisionConfig, steps: &mut Vec<Step>) {
    for command in &config.post_commands {
        let step = Step::new(
            command.name.clone(),
            ProvisionStage::Finalizing,
            Operation::Exec(ExecSpec {
                program: command.program.clone(),
                args: command.args.clone(),
                creates: command.creates.clone(),
            }),
        );
        steps.push(if command.ignore_failure {
            step.ignoring_failure()
        } else {
            step
        });
    }
}
