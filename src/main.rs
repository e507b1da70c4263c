//! pgprovision - Main entry point
//!
//! Thin CLI over the library: loads the configuration, builds the plan and
//! hands it to the reconciler with the local host's capabilities.

use log::{debug, error, info};
use std::path::{Path, PathBuf};

use pgprovision::cli::{Cli, Commands};
use pgprovision::command_traits::enable_dry_run;
use pgprovision::config_file::ProvisionConfig;
use pgprovision::engine::{build_plan, Reconciler};
use pgprovision::host::system::LocalFiles;
use pgprovision::host::{Change, FileEditor, Host};
use pgprovision::lineinfile::{LinePattern, LineUpsert};
use pgprovision::process_guard::{self, ProcessGuard};

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

/// Main application entry point
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging first
    init_logger();
    info!("pgprovision starting up");

    // Child process groups are terminated if we receive SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        log::warn!("Failed to initialize signal handlers: {}", e);
        // Continue anyway - cleanup will still work via Drop
    }
    let _guard = ProcessGuard::new();
    debug!("Signal handlers initialized");

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    if cli.dry_run {
        enable_dry_run();
    }

    match cli.command {
        Commands::Validate { config } => {
            info!("Validating configuration file: {:?}", config);
            match ProvisionConfig::load_from_file(&config) {
                Ok(loaded) => match loaded.validate() {
                    Ok(_) => {
                        info!("Configuration validation successful");
                        println!("✓ Configuration file is valid: {}", config.display());
                    }
                    Err(e) => {
                        error!("Configuration validation failed: {}", e);
                        eprintln!("✗ Configuration validation failed: {}", e);
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    error!("Failed to load configuration file: {:#}", e);
                    eprintln!("✗ Failed to load configuration file: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::InitConfig { path } => {
            ProvisionConfig::default().save_to_file(&path)?;
            info!("Default configuration written to {:?}", path);
            println!("✓ Default configuration written to {}", path.display());
        }
        Commands::Plan { config } => {
            let config = load_config(config.as_deref())?;
            let steps = build_plan(&config)?;
            for (index, step) in steps.iter().enumerate() {
                println!("{:>3}. {}", index + 1, step);
            }
        }
        Commands::Apply {
            config,
            password_file,
            data_dir,
        } => {
            run_apply(config.as_deref(), password_file.as_deref(), data_dir)?;
        }
        Commands::Upsert {
            file,
            pattern,
            line,
            backup,
        } => {
            run_upsert(&file, &pattern, &line, backup)?;
        }
    }

    Ok(())
}

/// Load the configuration file, or the defaults when none was given
fn load_config(path: Option<&Path>) -> anyhow::Result<ProvisionConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            ProvisionConfig::load_from_file(path)
        }
        None => {
            info!("No configuration file given, using defaults");
            Ok(ProvisionConfig::default())
        }
    }
}

/// Provision the local host
fn run_apply(
    config_path: Option<&Path>,
    password_file: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    if let Some(dir) = data_dir {
        info!("Data directory overridden: {}", dir.display());
        config.data_directory = Some(dir);
    }
    config.resolve_admin_password(password_file)?;

    let reconciler = Reconciler::from_config(&config)?;
    info!(
        "Provisioning PostgreSQL {} with {} steps",
        config.postgres_version,
        reconciler.steps().len()
    );
    println!("🚀 Provisioning PostgreSQL {}...", config.postgres_version);

    let mut host = Host::local();
    match reconciler.run(&mut host) {
        Ok(report) => {
            println!("{}", report.summary());
            println!("\n✓ Provisioning completed successfully!");
            Ok(())
        }
        Err(e) => {
            error!("Provisioning failed: {}", e);
            eprintln!("\n✗ Provisioning failed");
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Apply one line upsert to a local file
fn run_upsert(
    file: &Path,
    pattern: &str,
    line: &str,
    backup: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let upsert = LineUpsert::new(LinePattern::new(pattern)?, line)?;
    let mut files = LocalFiles::new();

    if backup {
        files.backup(file)?;
    }

    match files.upsert_line(file, &upsert, false)? {
        Change::Changed => println!("✓ {}: {}", file.display(), upsert.line()),
        Change::Unchanged => println!("✓ {} already up to date", file.display()),
        Change::DryRun => println!("[DRY RUN] {} would be updated", file.display()),
    }
    Ok(())
}
