// src/cli/commands/run.rs

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use crate::core::config::{FleetConfig, ReportFormat, RunOptions};
use crate::core::modmap::{ModuleMap, RepositoryView};
use crate::core::models::Task;
use crate::core::service::ServiceDescriptor;
use crate::core::store::StoreManager;
use crate::core::tester::TestOrchestrator;
use crate::infra::command::{CommandRunner, CommandSpec, ProcessRunner};
use crate::infra::fs::create_folder_link;
use crate::infra::git::GitAdapter;
use crate::infra::logger::Logger;
use crate::reporting::console;

pub async fn execute(options: RunOptions) -> Result<()> {
    let config = FleetConfig::load(&options.config_path)?;

    let logger = Arc::new(Logger::new(config.general.log_file.as_deref())?);
    if options.report == ReportFormat::Console {
        // Progress stays in the log file; the console belongs to the report.
        logger.set_console(false);
    }

    let runner = Arc::new(ProcessRunner::new(Arc::clone(&logger)));
    setup_signal_handler(Arc::clone(&runner), Arc::clone(&logger));

    let result = run_phases(&config, &options, &runner, &logger).await;

    if result.is_err() {
        // Best-effort teardown before the causal error surfaces.
        runner.kill_all();
    }
    logger.flush();
    result
}

fn setup_signal_handler(runner: Arc<ProcessRunner>, logger: Arc<Logger>) {
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl-C");
        logger.warn("Interrupted, terminating subprocesses...");
        runner.kill_all();
        logger.flush();
        std::process::exit(2);
    });
}

async fn run_phases(
    config: &FleetConfig,
    options: &RunOptions,
    runner: &Arc<ProcessRunner>,
    logger: &Arc<Logger>,
) -> Result<()> {
    if options.reps.is_empty() {
        bail!("--rep must name at least one repository");
    }

    let store_root = config.store_root(options);

    let service = match &options.workspace {
        Some(path) => Some(ServiceDescriptor::load(path)?),
        None => None,
    };
    let descriptor_repos = service
        .as_ref()
        .map(|s| s.repositories())
        .unwrap_or_default();

    if options.tasks.contains(&Task::InitStore) {
        // Selection pass over whatever is already on disk: on a first run it
        // only sees the explicitly requested repositories.
        let selection_map =
            ModuleMap::build(&present_repositories(config, &store_root), logger).await?;
        let git = GitAdapter::new(Arc::clone(runner));
        let store = StoreManager::new(config, options, git, Arc::clone(logger));
        store.run(&selection_map, &descriptor_repos).await?;
    }

    // The definitive map: built once over the complete store, read-only from
    // here on.
    let map = ModuleMap::build(&present_repositories(config, &store_root), logger).await?;
    logger.info(format!("Module map ready: {} module(s)", map.len()));

    if options.tasks.contains(&Task::Build) {
        run_build_phase(config, options, runner, logger, &map, service).await?;
    }

    if options.tasks.contains(&Task::Test) {
        let orchestrator = TestOrchestrator::new(
            config,
            options,
            &map,
            Arc::clone(runner),
            Arc::clone(logger),
        );
        let summary = orchestrator.run().await?;

        console::print_summary(&summary.outcomes);
        if summary.has_failures() && options.report == ReportFormat::Console {
            console::print_failure_details(&summary.outcomes);
            bail!("Unit tests failed");
        }
    }

    Ok(())
}

/// Configured repositories that exist on disk and can be scanned.
fn present_repositories(config: &FleetConfig, store_root: &Path) -> Vec<RepositoryView> {
    config
        .repositories
        .iter()
        .filter_map(|repo| {
            let path = config.repo_path(repo, store_root);
            path.is_dir().then(|| RepositoryView {
                name: repo.name.clone(),
                path,
            })
        })
        .collect()
}

/// Runs the external build toolchain, creates the configured folder links
/// and refreshes the service descriptor.
async fn run_build_phase(
    config: &FleetConfig,
    options: &RunOptions,
    runner: &Arc<ProcessRunner>,
    logger: &Arc<Logger>,
    map: &ModuleMap,
    service: Option<ServiceDescriptor>,
) -> Result<()> {
    match &config.build.command {
        Some(command) => {
            logger.info("Running build toolchain");
            let spec = CommandSpec::shell(command)?;
            runner
                .run(spec)
                .await
                .map_err(|e| anyhow::anyhow!(e))
                .context("Build toolchain failed")?;
        }
        None => {
            logger.warn("No build command configured; skipping build phase");
        }
    }

    let store_root = config.store_root(options);
    for repo in &config.repositories {
        let repo_root = config.repo_path(repo, &store_root);
        for link in &repo.links {
            create_folder_link(&repo_root.join(&link.source), &link.target)?;
        }
    }

    if let Some(mut service) = service {
        service.rewrite_for_store(map);
        service.save()?;
    }

    Ok(())
}
