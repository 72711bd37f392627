//! # Test Orchestrator / 测试编排器
//!
//! Generates run configurations and executes unit tests per module or
//! repository, with diff-based selection, bounded concurrency, browser
//! retries for transient environment failures, report post-processing and
//! the known-errors allow-list.
//!
//! 生成运行配置并按模块或仓库执行单元测试，支持基于 diff 的选择、限定并发、
//! 针对瞬时环境失败的浏览器重试、报告后处理以及已知错误允许列表。

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use futures::future::join_all;
use futures::{StreamExt, stream};

use crate::core::config::{FleetConfig, ReportFormat, RunOptions, resolve_revision};
use crate::core::modmap::ModuleMap;
use crate::core::models::{
    CoverageConfig, ModuleDescriptor, ModuleTestOutcome, OutcomeStatus, RunEnvironment,
    TestRunConfig,
};
use crate::infra::command::{CommandOutput, CommandRunner, CommandSpec, ProcessError};
use crate::infra::fs::ensure_dir;
use crate::infra::git::GitAdapter;
use crate::infra::logger::Logger;
use crate::infra::net::PortAllocator;
use crate::reporting::allowlist::AllowedErrors;
use crate::reporting::junit::TestReport;

/// Concurrent module test runs. Each run spawns a heavyweight subprocess
/// and may bind a browser driver.
const MODULE_CONCURRENCY: usize = 2;

/// Stderr blocks without this marker are treated as noise and never
/// attributed as module errors.
const STACK_TRACE_MARKER: &str = " at ";

/// Failure signatures that make a browser run worth repeating in place.
const TRANSIENT_BROWSER_ERRORS: &[&str] = &[
    "EADDRINUSE",
    "ECONNREFUSED",
    "session not created",
    "failed to start",
];

pub const ALLOWED_ERRORS_FILE: &str = "allowed-errors.json";

pub struct TestRunSummary {
    pub outcomes: Vec<ModuleTestOutcome>,
}

impl TestRunSummary {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.is_failure())
    }
}

/// Groups stderr lines into blank-line separated blocks and keeps the
/// blocks carrying a stack-trace marker.
pub fn collect_error_blocks(lines: &[String]) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>, blocks: &mut Vec<String>| {
        if current.iter().any(|line| line.contains(STACK_TRACE_MARKER)) {
            blocks.push(current.join("\n"));
        }
        current.clear();
    };

    for line in lines {
        if line.trim().is_empty() {
            flush(&mut current, &mut blocks);
        } else {
            current.push(line);
        }
    }
    flush(&mut current, &mut blocks);
    blocks
}

fn is_transient_browser_error(error: &ProcessError) -> bool {
    let rendered = error.to_string();
    let in_output = |needle: &str| {
        error
            .output()
            .is_some_and(|output| output.contains(needle))
    };
    TRANSIENT_BROWSER_ERRORS
        .iter()
        .any(|needle| rendered.contains(needle) || in_output(needle))
}

enum LaunchError {
    Setup(anyhow::Error),
    Process(ProcessError),
}

pub struct TestOrchestrator<'a, R> {
    config: &'a FleetConfig,
    options: &'a RunOptions,
    map: &'a ModuleMap,
    runner: Arc<R>,
    git: GitAdapter<R>,
    logger: Arc<Logger>,
    ports: PortAllocator,
    work_dir: PathBuf,
    store_root: PathBuf,
}

impl<'a, R: CommandRunner> TestOrchestrator<'a, R> {
    pub fn new(
        config: &'a FleetConfig,
        options: &'a RunOptions,
        map: &'a ModuleMap,
        runner: Arc<R>,
        logger: Arc<Logger>,
    ) -> Self {
        let git = GitAdapter::new(Arc::clone(&runner));
        let ports = PortAllocator::new(config.tester.port_start, config.tester.port_end);
        let work_dir = config.work_dir(options);
        let store_root = config.store_root(options);
        Self {
            config,
            options,
            map,
            runner,
            git,
            logger,
            ports,
            work_dir,
            store_root,
        }
    }

    /// Runs the whole test phase and returns per-target outcomes.
    pub async fn run(&self) -> Result<TestRunSummary> {
        ensure_dir(&self.configs_dir())?;
        ensure_dir(&self.reports_dir())?;

        let diffs = if self.options.diff {
            self.collect_diffs().await
        } else {
            HashMap::new()
        };

        let mut allowed = AllowedErrors::load(&self.allowed_errors_path(), &self.logger);

        let mut outcomes = if self.options.only {
            let Some(repository) = self.options.reps.first() else {
                bail!("--only requires a repository in --rep");
            };
            self.run_repository(repository).await
        } else {
            self.run_modules(&diffs).await
        };

        outcomes.sort_by(|a, b| {
            (a.target.as_str(), a.environment.as_str())
                .cmp(&(b.target.as_str(), b.environment.as_str()))
        });

        // Interactive server runs with console reporting keep no report
        // files to fix up.
        let interactive = self.options.server && self.options.report != ReportFormat::Xml;
        if !interactive {
            self.finalize_reports(&outcomes, &allowed)?;
        }

        if self.options.save_errors {
            for outcome in &outcomes {
                for error in &outcome.errors {
                    allowed.record(error);
                }
            }
            allowed.save()?;
            self.logger.info(format!(
                "Saved {} allowed error signature(s)",
                allowed.len()
            ));
        }

        Ok(TestRunSummary { outcomes })
    }

    pub fn allowed_errors_path(&self) -> PathBuf {
        self.work_dir.join(ALLOWED_ERRORS_FILE)
    }

    fn configs_dir(&self) -> PathBuf {
        self.work_dir.join("configs")
    }

    fn reports_dir(&self) -> PathBuf {
        self.work_dir.join("reports")
    }

    pub fn report_path(&self, target: &str, environment: RunEnvironment) -> PathBuf {
        self.reports_dir()
            .join(format!("{}_{}.xml", target, environment))
    }

    /// Changed-file sets per repository, comparing each checkout against the
    /// release-candidate branch. Repositories sitting on the rc branch, and
    /// repositories whose diff cannot be computed, contribute no entry:
    /// absence of diff information means "always test".
    async fn collect_diffs(&self) -> HashMap<String, Vec<PathBuf>> {
        let mut diffs: HashMap<String, Vec<PathBuf>> = HashMap::new();
        let Some(rc_label) = self.options.rc_label(self.config) else {
            self.logger
                .warn("--diff requested but no rc label configured; testing everything");
            return diffs;
        };

        for repository in self.map.get_test_list(&self.options.reps) {
            let Some(repo) = self.config.repository(&repository) else {
                continue;
            };
            let revision = resolve_revision(self.config, self.options, repo);
            if revision.is_none_or(|r| r.is_rc(Some(rc_label))) {
                continue;
            }
            let dir = self.config.repo_path(repo, &self.store_root);
            match self.git.changed_files(&dir, rc_label).await {
                Ok(changed) => {
                    self.logger.info(format!(
                        "Repository `{}`: {} changed file(s) against `{}`",
                        repository,
                        changed.len(),
                        rc_label
                    ));
                    diffs.insert(repository, changed);
                }
                Err(e) => {
                    self.logger.warn(format!(
                        "Repository `{}`: diff failed ({}); testing everything",
                        repository, e
                    ));
                }
            }
        }
        diffs
    }

    async fn run_modules(&self, diffs: &HashMap<String, Vec<PathBuf>>) -> Vec<ModuleTestOutcome> {
        let repositories = self.map.get_test_list(&self.options.reps);
        let modules: Vec<&ModuleDescriptor> = repositories
            .iter()
            .flat_map(|repository| self.map.test_modules_of(repository))
            .collect();

        self.logger.info(format!(
            "Running unit tests for {} module(s) across {} repository(ies)",
            modules.len(),
            repositories.len()
        ));

        let nested: Vec<Vec<ModuleTestOutcome>> = stream::iter(modules)
            .map(|module| self.run_module(module, diffs))
            .buffer_unordered(MODULE_CONCURRENCY)
            .collect()
            .await;
        nested.into_iter().flatten().collect()
    }

    /// Runs one module's node and browser passes concurrently, or skips the
    /// module entirely when diff information shows no changes under its
    /// directory.
    async fn run_module(
        &self,
        module: &ModuleDescriptor,
        diffs: &HashMap<String, Vec<PathBuf>>,
    ) -> Vec<ModuleTestOutcome> {
        let environments = self.environments_for(module);
        if environments.is_empty() {
            return Vec::new();
        }

        if let Some(changed) = diffs.get(&module.repository) {
            if !self.module_touched(module, changed) {
                self.logger.info(format!(
                    "Module `{}`: no changes against rc, skipping",
                    module.name
                ));
                return environments
                    .into_iter()
                    .map(|environment| ModuleTestOutcome {
                        target: module.name.clone(),
                        environment,
                        status: OutcomeStatus::SkippedNoChanges,
                        duration: Duration::ZERO,
                        errors: Vec::new(),
                    })
                    .collect();
            }
        }

        join_all(environments.into_iter().map(|environment| {
            self.run_target(
                module.name.clone(),
                vec![module.name.clone()],
                environment,
            )
        }))
        .await
    }

    /// Only-mode: one run per environment for the whole repository, without
    /// the per-module partition.
    async fn run_repository(&self, repository: &str) -> Vec<ModuleTestOutcome> {
        let test_modules: Vec<String> = self
            .map
            .test_modules_of(repository)
            .iter()
            .map(|m| m.name.clone())
            .collect();
        if test_modules.is_empty() {
            self.logger.warn(format!(
                "Repository `{}` has no test modules",
                repository
            ));
            return Vec::new();
        }

        let mut environments = Vec::new();
        if self.options.node_enabled() {
            environments.push(RunEnvironment::Node);
        }
        if self.options.browser_enabled()
            && self
                .map
                .test_modules_of(repository)
                .iter()
                .any(|m| m.test_in_browser)
        {
            environments.push(RunEnvironment::Browser);
        }

        join_all(environments.into_iter().map(|environment| {
            self.run_target(repository.to_string(), test_modules.clone(), environment)
        }))
        .await
    }

    fn environments_for(&self, module: &ModuleDescriptor) -> Vec<RunEnvironment> {
        let mut environments = Vec::new();
        if self.options.node_enabled() {
            environments.push(RunEnvironment::Node);
        }
        if module.test_in_browser && self.options.browser_enabled() {
            environments.push(RunEnvironment::Browser);
        }
        environments
    }

    /// Whether any changed path falls under the module directory.
    fn module_touched(&self, module: &ModuleDescriptor, changed: &[PathBuf]) -> bool {
        let Some(repo) = self.config.repository(&module.repository) else {
            return true;
        };
        let repo_root = self.config.repo_path(repo, &self.store_root);
        let Ok(module_rel) = module.filesystem_path.strip_prefix(&repo_root) else {
            return true;
        };
        changed.iter().any(|path| path.starts_with(module_rel))
    }

    /// One test pass: lease a port, write the derived run configuration,
    /// invoke the external runner and classify the result.
    async fn run_target(
        &self,
        target: String,
        tests: Vec<String>,
        environment: RunEnvironment,
    ) -> ModuleTestOutcome {
        self.logger
            .info(format!("Testing `{}` ({})", target, environment));
        let started = Instant::now();
        let mut errors: Vec<String> = Vec::new();

        let status = match self.launch_runner(&target, &tests, environment).await {
            Ok(output) => {
                errors.extend(collect_error_blocks(&output.stderr));
                if errors.is_empty() {
                    OutcomeStatus::Passed
                } else {
                    OutcomeStatus::Failed
                }
            }
            Err(LaunchError::Process(ProcessError::Timeout { output, timeout, .. })) => {
                errors.extend(collect_error_blocks(&output.stderr));
                errors.push(format!("Test run timed out after {}s", timeout.as_secs()));
                OutcomeStatus::Timeout
            }
            Err(LaunchError::Process(ProcessError::Failed { output, code, .. })) => {
                errors.extend(collect_error_blocks(&output.stderr));
                if errors.is_empty() {
                    errors.push(format!("Test runner exited with status {:?}", code));
                }
                OutcomeStatus::Failed
            }
            Err(LaunchError::Process(other)) => {
                errors.push(other.to_string());
                OutcomeStatus::Failed
            }
            Err(LaunchError::Setup(e)) => {
                errors.push(format!("{e:#}"));
                OutcomeStatus::Failed
            }
        };

        let duration = started.elapsed();
        match status {
            OutcomeStatus::Passed => self.logger.info(format!(
                "Passed `{}` ({}) in {:.2?}",
                target, environment, duration
            )),
            _ => self.logger.error(format!(
                "Failed `{}` ({}) in {:.2?}",
                target, environment, duration
            )),
        }

        ModuleTestOutcome {
            target,
            environment,
            status,
            duration,
            errors,
        }
    }

    async fn launch_runner(
        &self,
        target: &str,
        tests: &[String],
        environment: RunEnvironment,
    ) -> Result<CommandOutput, LaunchError> {
        let Some(command) = &self.config.tester.command else {
            return Err(LaunchError::Setup(anyhow::anyhow!(
                "No tester command configured (tester.command)"
            )));
        };

        let port = self.ports.lease().map_err(LaunchError::Setup)?;

        let config_path = self
            .configs_dir()
            .join(format!("{}_{}.json", target, environment));
        let run_config = self.make_run_config(target, tests, environment, port);
        if let Err(e) = run_config.write_to(&config_path) {
            self.ports.release(port);
            return Err(LaunchError::Setup(e));
        }

        let spec = match CommandSpec::shell(command) {
            Ok(spec) => spec
                .arg(format!("--config={}", config_path.display()))
                .timeout(Duration::from_secs(self.config.tester.timeout_secs)),
            Err(e) => {
                self.ports.release(port);
                return Err(LaunchError::Setup(e));
            }
        };

        let result = self.invoke_runner(spec, environment).await;
        self.ports.release(port);
        result.map_err(LaunchError::Process)
    }

    /// Invokes the external runner; transient browser failures retry the
    /// same command in place.
    fn invoke_runner<'s>(
        &'s self,
        spec: CommandSpec,
        environment: RunEnvironment,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput, ProcessError>> + Send + 's>> {
        Box::pin(async move {
            match self.runner.run(spec.clone()).await {
                Err(e)
                    if environment == RunEnvironment::Browser
                        && is_transient_browser_error(&e) =>
                {
                    self.logger
                        .warn(format!("Transient browser failure, retrying: {e}"));
                    self.invoke_runner(spec, environment).await
                }
                other => other,
            }
        })
    }

    fn make_run_config(
        &self,
        target: &str,
        tests: &[String],
        environment: RunEnvironment,
        port: u16,
    ) -> TestRunConfig {
        let coverage = self.options.coverage.then(|| {
            let closure = self.map.get_child_modules(tests);
            CoverageConfig {
                report: self.work_dir.join("coverage").join(format!("{target}.json")),
                include: closure
                    .iter()
                    .map(|module| format!("{module}/**/*.js"))
                    .collect(),
            }
        });

        TestRunConfig {
            port,
            tests: tests.to_vec(),
            resources: self.store_root.clone(),
            report: self.report_path(target, environment),
            browser: environment == RunEnvironment::Browser,
            server: self.options.server,
            ignore_leaks: self
                .config
                .tester
                .ignore_leaks
                .iter()
                .any(|name| name == target),
            coverage,
        }
    }

    /// Ensures every expected report exists, namespaces testcase classnames
    /// with the owning target and injects captured error blocks as synthetic
    /// failing cases, suppressing allow-listed signatures.
    fn finalize_reports(
        &self,
        outcomes: &[ModuleTestOutcome],
        allowed: &AllowedErrors,
    ) -> Result<()> {
        for outcome in outcomes {
            let path = self.report_path(&outcome.target, outcome.environment);

            let mut report = if outcome.status == OutcomeStatus::SkippedNoChanges {
                TestReport::no_changes(&outcome.target)
            } else if path.exists() {
                match TestReport::load(&path) {
                    Ok(report) => report,
                    Err(e) => {
                        self.logger
                            .warn(format!("Unreadable report, synthesizing: {e:#}"));
                        TestReport::missing_template(&outcome.target)
                    }
                }
            } else {
                self.logger.warn(format!(
                    "Report missing for `{}` ({}), synthesizing",
                    outcome.target, outcome.environment
                ));
                TestReport::missing_template(&outcome.target)
            };

            report.prefix_classnames(&outcome.target);

            for error in &outcome.errors {
                if allowed.contains(error) {
                    continue;
                }
                let first_line = error.lines().next().unwrap_or("uncaught error");
                report.push_failing(&outcome.target, first_line, "uncaught error", error);
            }

            report
                .save(&path)
                .with_context(|| format!("Failed to finalize report for `{}`", outcome.target))?;
        }
        Ok(())
    }
}
