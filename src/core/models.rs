//! # Data Models Module / 数据模型模块
//!
//! This module defines the core data structures used throughout the fleet
//! runner: module descriptors discovered in the repository store, run
//! environments, per-run test configurations and per-module outcomes.
//!
//! 此模块定义了整个 fleet runner 中使用的核心数据结构：
//! 在仓库存储中发现的模块描述符、运行环境、每次运行的测试配置和每个模块的结果。

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One buildable/testable unit found inside a repository.
///
/// `dependencies` may reference modules not yet discovered at insertion time;
/// forward references are resolved once the full scan completes. The relation
/// is a general directed graph, so every traversal guards against cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Unique across the whole workspace; collisions are first-registered-wins.
    pub name: String,
    /// Owning repository name.
    pub repository: String,
    /// Directory of the module.
    pub filesystem_path: PathBuf,
    /// Location of the module manifest file.
    pub descriptor_path: PathBuf,
    /// Declared required modules, in declaration order.
    pub dependencies: Vec<String>,
    /// Set when the manifest declares a unit-test section.
    pub has_unit_tests: bool,
    /// Computed: some test module in the same repository transitively
    /// depends on this module.
    pub required_for_tests: bool,
    /// Whether this module's tests must also run in a browser environment.
    pub test_in_browser: bool,
}

/// Execution environment of a single test pass.
/// 单次测试的执行环境。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunEnvironment {
    Node,
    Browser,
}

impl RunEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEnvironment::Node => "node",
            RunEnvironment::Browser => "browser",
        }
    }
}

impl fmt::Display for RunEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coverage section of a run configuration.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageConfig {
    pub report: PathBuf,
    /// Include globs derived from the target's dependency closure.
    pub include: Vec<String>,
}

/// Ephemeral per-run configuration handed to the external test runner as a
/// JSON file via `--config=<path>`. Created per module per environment and
/// discarded after the run.
///
/// 通过 `--config=<path>` 以 JSON 文件形式交给外部测试运行器的临时配置。
/// 按模块和环境创建，运行后丢弃。
#[derive(Debug, Clone, Serialize)]
pub struct TestRunConfig {
    /// Free TCP port the runner should listen on.
    pub port: u16,
    /// Target test module list.
    pub tests: Vec<String>,
    /// Resource root the runner resolves modules against.
    pub resources: PathBuf,
    /// XML report output path.
    pub report: PathBuf,
    pub browser: bool,
    pub server: bool,
    #[serde(rename = "ignoreLeaks")]
    pub ignore_leaks: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageConfig>,
}

impl TestRunConfig {
    /// Writes the configuration as pretty-printed JSON.
    pub fn write_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run config: {}", path.display()))
    }
}

/// Final status of one test pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Timeout,
    /// Diff-based selection found no changes under the module directory.
    SkippedNoChanges,
}

/// Result of one test pass for a module (or a whole repository in
/// only-mode).
#[derive(Debug, Clone)]
pub struct ModuleTestOutcome {
    /// Module name, or repository name in only-mode.
    pub target: String,
    pub environment: RunEnvironment,
    pub status: OutcomeStatus,
    pub duration: Duration,
    /// Captured error blocks attributed to this pass.
    pub errors: Vec<String>,
}

impl ModuleTestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed | OutcomeStatus::Timeout)
    }

    /// Status column text for the console summary.
    /// 控制台摘要的状态列文本。
    pub fn status_str(&self) -> &'static str {
        match self.status {
            OutcomeStatus::Passed => "Passed",
            OutcomeStatus::Failed => "Failed",
            OutcomeStatus::Timeout => "Timeout",
            OutcomeStatus::SkippedNoChanges => "Skipped (no changes)",
        }
    }
}

/// Orchestration phases selectable with `--tasks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    InitStore,
    Build,
    Test,
}

impl Task {
    pub fn parse(value: &str) -> Option<Task> {
        match value.trim() {
            "init-store" => Some(Task::InitStore),
            "build" => Some(Task::Build),
            "test" => Some(Task::Test),
            _ => None,
        }
    }

    pub fn all() -> Vec<Task> {
        vec![Task::InitStore, Task::Build, Task::Test]
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::InitStore => "init-store",
            Task::Build => "build",
            Task::Test => "test",
        };
        f.write_str(name)
    }
}
