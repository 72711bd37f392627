//! # Configuration Module / 配置模块
//!
//! The orchestrator configuration, loaded from a TOML file, plus the options
//! collected from the command line and the revision syntax repositories are
//! checked out against.
//!
//! 编排器配置（从 TOML 文件加载）、从命令行收集的选项，
//! 以及仓库检出所使用的修订版本语法。

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::models::Task;

/// Default external test-runner timeout, in seconds.
fn default_timeout_secs() -> u64 {
    300
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_port_start() -> u16 {
    10000
}

fn default_port_end() -> u16 {
    10100
}

/// A symlink to create after the build phase.
/// 构建阶段后要创建的符号链接。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FolderLink {
    /// Path inside the repository checkout.
    pub source: String,
    /// Link location, relative to the workspace.
    pub target: PathBuf,
}

/// One configured repository.
/// 一个已配置的仓库。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
    pub name: String,
    /// Explicit clone URL; when absent the URL is derived from the mirror
    /// host and protocol.
    #[serde(default)]
    pub url: Option<String>,
    /// Pre-existing local checkout. Skips cloning and checkout entirely.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Externally supplied repository; the store manager leaves it alone.
    #[serde(default)]
    pub skip: bool,
    /// Branch override taking precedence over the run's rc label.
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub links: Vec<FolderLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Mirror host clone URLs are derived from, e.g. "git.example.com".
    #[serde(default)]
    pub mirror: Option<String>,
    /// "https" or "ssh".
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Default release-candidate label, e.g. "rc-21.1000".
    #[serde(default)]
    pub rc: Option<String>,
    #[serde(default)]
    pub store: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            mirror: None,
            protocol: default_protocol(),
            rc: None,
            store: None,
            work_dir: None,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildConfig {
    /// External build toolchain command line, run from the workspace.
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TesterConfig {
    /// External test runner command line; `--config=<path>` is appended.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_port_start")]
    pub port_start: u16,
    #[serde(default = "default_port_end")]
    pub port_end: u16,
    /// Modules whose runs set the ignore-leaks flag.
    #[serde(default)]
    pub ignore_leaks: Vec<String>,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_timeout_secs(),
            port_start: default_port_start(),
            port_end: default_port_end(),
            ignore_leaks: Vec::new(),
        }
    }
}

/// The whole orchestrator configuration, loaded from `FleetConfig.toml`.
/// 从 `FleetConfig.toml` 加载的完整编排器配置。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub tester: TesterConfig,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<FleetConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|repo| repo.name == name)
    }

    /// Clone URL for a repository: explicit `url`, or derived from the
    /// mirror host and protocol.
    pub fn clone_url(&self, repo: &RepositoryConfig) -> Result<String> {
        if let Some(url) = &repo.url {
            return Ok(url.clone());
        }
        let Some(mirror) = &self.general.mirror else {
            bail!(
                "Repository `{}` has no url and no mirror host is configured",
                repo.name
            );
        };
        match self.general.protocol.as_str() {
            "ssh" => Ok(format!("git@{}:{}.git", mirror, repo.name)),
            "https" => Ok(format!("https://{}/{}.git", mirror, repo.name)),
            other => bail!("Unsupported clone protocol: {other}"),
        }
    }

    /// Repository checkout location: explicit `path` or a directory named
    /// after the repository inside the store.
    pub fn repo_path(&self, repo: &RepositoryConfig, store_root: &Path) -> PathBuf {
        repo.path
            .clone()
            .unwrap_or_else(|| store_root.join(&repo.name))
    }

    pub fn store_root(&self, options: &RunOptions) -> PathBuf {
        options
            .store
            .clone()
            .or_else(|| self.general.store.clone())
            .unwrap_or_else(|| PathBuf::from("store"))
    }

    pub fn work_dir(&self, options: &RunOptions) -> PathBuf {
        options
            .work_dir
            .clone()
            .or_else(|| self.general.work_dir.clone())
            .unwrap_or_else(|| PathBuf::from("work"))
    }
}

/// Report destination selected with `--report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Xml,
    Console,
}

/// Options collected from the command line.
/// 从命令行收集的选项。
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Requested repositories; `all` is a reserved keyword.
    pub reps: Vec<String>,
    pub tasks: Vec<Task>,
    /// Release-candidate label override.
    pub rc: Option<String>,
    /// Per-repository branch overrides.
    pub branch_overrides: HashMap<String, String>,
    pub config_path: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub only: bool,
    pub diff: bool,
    pub coverage: bool,
    pub report: ReportFormat,
    pub node: bool,
    pub browser: bool,
    pub server: bool,
    pub save_errors: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reps: Vec::new(),
            tasks: Task::all(),
            rc: None,
            branch_overrides: HashMap::new(),
            config_path: PathBuf::from("FleetConfig.toml"),
            work_dir: None,
            workspace: None,
            store: None,
            only: false,
            diff: false,
            coverage: false,
            report: ReportFormat::Xml,
            node: false,
            browser: false,
            server: false,
            save_errors: false,
        }
    }
}

impl RunOptions {
    /// Whether the node environment is enabled. With neither `--node` nor
    /// `--browser` both environments run.
    pub fn node_enabled(&self) -> bool {
        self.node || !self.browser
    }

    pub fn browser_enabled(&self) -> bool {
        self.browser || !self.node
    }

    pub fn rc_label<'a>(&'a self, config: &'a FleetConfig) -> Option<&'a str> {
        self.rc.as_deref().or(config.general.rc.as_deref())
    }
}

/// A repository revision requested for checkout.
/// 请求检出的仓库修订版本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    Branch {
        name: String,
        /// Explicit secondary merge target (`branch:mergeTarget` syntax).
        merge_with: Option<String>,
    },
    Commit(String),
}

impl Revision {
    /// `branch`, `branch:mergeTarget`, or a bare 40-hex commit hash.
    pub fn parse(value: &str) -> Revision {
        if value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Revision::Commit(value.to_string());
        }
        match value.split_once(':') {
            Some((branch, target)) => Revision::Branch {
                name: branch.to_string(),
                merge_with: Some(target.to_string()),
            },
            None => Revision::Branch {
                name: value.to_string(),
                merge_with: None,
            },
        }
    }

    /// Whether the revision is itself a release-candidate branch: such
    /// checkouts never get a secondary merge.
    pub fn is_rc(&self, rc_label: Option<&str>) -> bool {
        match self {
            Revision::Branch { name, .. } => {
                rc_label.is_some_and(|rc| rc == name) || name.starts_with("rc-")
            }
            Revision::Commit(_) => false,
        }
    }
}

/// The revision a repository should be checked out at: CLI branch override,
/// then the repository's configured branch, then the run's rc label.
pub fn resolve_revision(
    config: &FleetConfig,
    options: &RunOptions,
    repo: &RepositoryConfig,
) -> Option<Revision> {
    options
        .branch_overrides
        .get(&repo.name)
        .map(String::as_str)
        .or(repo.branch.as_deref())
        .or(options.rc_label(config))
        .map(Revision::parse)
}
