//! # Version Control Adapter / 版本控制适配器
//!
//! Typed wrappers for the per-repository git operations the store manager
//! drives: fetch, checkout, reset, clean, merge with conflict recovery, and
//! name-only diffs for test selection.
//!
//! 类型化封装仓库级 git 操作：fetch、checkout、reset、clean、带冲突恢复的
//! merge，以及用于测试选择的 name-only diff。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::infra::command::{CommandOutput, CommandRunner, CommandSpec, ProcessError};

/// Remote-tracking ref for a branch name.
pub fn remote_ref(branch: &str) -> String {
    format!("remotes/origin/{branch}")
}

pub struct GitAdapter<R> {
    runner: Arc<R>,
}

impl<R> Clone for GitAdapter<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
        }
    }
}

impl<R: CommandRunner> GitAdapter<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    fn git(repo_dir: &Path, args: &[&str]) -> CommandSpec {
        CommandSpec::new("git")
            .args(args.iter().copied())
            .current_dir(repo_dir)
    }

    /// Clones `url` into `store_root/target`.
    pub async fn clone_into(
        &self,
        store_root: &Path,
        url: &str,
        target: &str,
    ) -> Result<CommandOutput, ProcessError> {
        let spec = CommandSpec::new("git")
            .args(["clone", url, target])
            .current_dir(store_root);
        self.runner.run(spec).await
    }

    pub async fn fetch_all(&self, repo_dir: &Path) -> Result<CommandOutput, ProcessError> {
        self.runner
            .run(Self::git(repo_dir, &["fetch", "--all"]))
            .await
    }

    /// Aborts any in-progress merge. Forced: failing when no merge is in
    /// progress is the expected case.
    pub async fn abort_merge(&self, repo_dir: &Path) -> Result<CommandOutput, ProcessError> {
        self.runner
            .run(Self::git(repo_dir, &["merge", "--abort"]).force(true))
            .await
    }

    pub async fn checkout(
        &self,
        repo_dir: &Path,
        branch: &str,
    ) -> Result<CommandOutput, ProcessError> {
        self.runner
            .run(Self::git(repo_dir, &["checkout", branch]))
            .await
    }

    pub async fn reset_hard(
        &self,
        repo_dir: &Path,
        target: &str,
    ) -> Result<CommandOutput, ProcessError> {
        self.runner
            .run(Self::git(repo_dir, &["reset", "--hard", target]))
            .await
    }

    /// Removes everything untracked, ignored files included.
    pub async fn clean(&self, repo_dir: &Path) -> Result<CommandOutput, ProcessError> {
        self.runner
            .run(Self::git(repo_dir, &["clean", "-fdx"]))
            .await
    }

    pub async fn merge(
        &self,
        repo_dir: &Path,
        target: &str,
    ) -> Result<CommandOutput, ProcessError> {
        self.runner
            .run(Self::git(repo_dir, &["merge", target]))
            .await
    }

    /// File paths changed on the current branch relative to `base`'s
    /// remote-tracking ref.
    pub async fn changed_files(
        &self,
        repo_dir: &Path,
        base: &str,
    ) -> Result<Vec<PathBuf>, ProcessError> {
        let range = format!("{}...HEAD", remote_ref(base));
        let output = self
            .runner
            .run(Self::git(repo_dir, &["diff", "--name-only", &range]))
            .await?;

        Ok(output
            .stdout
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(PathBuf::from)
            .collect())
    }
}
