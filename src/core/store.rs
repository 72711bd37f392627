//! # Store Manager / 仓库存储管理
//!
//! Ensures the on-disk repository checkout state matches configuration
//! before the module map and test orchestrator run. Repository
//! initialization is fanned out with bounded concurrency; a failing
//! repository never stops its siblings, but fails the run once the pool
//! drains.
//!
//! 在模块映射和测试编排器运行之前，确保磁盘上的仓库检出状态与配置一致。
//! 仓库初始化以限定并发扇出；单个仓库失败不会阻止其兄弟仓库，
//! 但在池排空后会使整个运行失败。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use futures::{StreamExt, stream};

use crate::core::config::{FleetConfig, RepositoryConfig, Revision, RunOptions, resolve_revision};
use crate::core::modmap::{ALL_REPOSITORIES, ModuleMap};
use crate::infra::command::CommandRunner;
use crate::infra::fs::ensure_dir;
use crate::infra::git::{GitAdapter, remote_ref};
use crate::infra::logger::Logger;

/// Concurrent repository initializations. Keeps the source-control server
/// and local disk responsive.
const INIT_CONCURRENCY: usize = 2;

pub struct StoreManager<'a, R> {
    config: &'a FleetConfig,
    options: &'a RunOptions,
    git: GitAdapter<R>,
    logger: Arc<Logger>,
    store_root: PathBuf,
}

impl<'a, R: CommandRunner> StoreManager<'a, R> {
    pub fn new(
        config: &'a FleetConfig,
        options: &'a RunOptions,
        git: GitAdapter<R>,
        logger: Arc<Logger>,
    ) -> Self {
        let store_root = config.store_root(options);
        Self {
            config,
            options,
            git,
            logger,
            store_root,
        }
    }

    /// Ensures every required repository exists at the requested revision.
    ///
    /// The required set is the union of the repositories implied by the
    /// module map's test list, the repositories named on the command line
    /// and any named by an external project descriptor.
    pub async fn run(&self, map: &ModuleMap, descriptor_repos: &[String]) -> Result<()> {
        ensure_dir(&self.store_root)?;

        let required = self.required_repositories(map, descriptor_repos);
        self.logger.info(format!(
            "Initializing {} repository(ies) in {}",
            required.len(),
            self.store_root.display()
        ));

        let failures: Vec<anyhow::Error> = stream::iter(required)
            .map(|name| async move { self.init_rep(&name).await })
            .buffer_unordered(INIT_CONCURRENCY)
            .filter_map(|result| async move { result.err() })
            .collect()
            .await;

        if !failures.is_empty() {
            for failure in &failures {
                self.logger.error(format!("{failure:#}"));
            }
            bail!("{} repository(ies) failed to initialize", failures.len());
        }
        Ok(())
    }

    fn required_repositories(&self, map: &ModuleMap, descriptor_repos: &[String]) -> Vec<String> {
        if self.options.reps.iter().any(|r| r == ALL_REPOSITORIES) {
            return self
                .config
                .repositories
                .iter()
                .map(|r| r.name.clone())
                .collect();
        }

        let mut required: Vec<String> = Vec::new();
        let push = |name: &String, required: &mut Vec<String>| {
            if !required.contains(name) {
                required.push(name.clone());
            }
        };

        for name in map.get_test_list(&self.options.reps) {
            push(&name, &mut required);
        }
        for name in &self.options.reps {
            push(name, &mut required);
        }
        for name in descriptor_repos {
            push(name, &mut required);
        }
        required
    }

    /// Brings one repository into the store: clone when absent, then check
    /// out the requested revision. Externally supplied repositories are
    /// left untouched.
    pub async fn init_rep(&self, name: &str) -> Result<()> {
        let Some(repo) = self.config.repository(name) else {
            bail!("Repository `{name}` is not configured");
        };

        if repo.skip || repo.path.is_some() {
            self.logger
                .info(format!("Repository `{name}` is externally supplied, skipping"));
            return Ok(());
        }

        self.clone_rep_to_store(repo).await?;

        let revision = resolve_revision(self.config, self.options, repo);
        self.checkout(repo, revision).await
    }

    /// The per-repository checkout state machine. Steps are strictly
    /// sequential: fetch, abort stale merge, checkout, reset, clean, merge.
    pub async fn checkout(&self, repo: &RepositoryConfig, revision: Option<Revision>) -> Result<()> {
        let Some(revision) = revision else {
            bail!(
                "Repository `{}`: no revision resolvable (configure a branch or pass --rc)",
                repo.name
            );
        };

        let dir = self.config.repo_path(repo, &self.store_root);

        self.git
            .fetch_all(&dir)
            .await
            .with_context(|| format!("Repository `{}`: fetch failed", repo.name))?;

        // A previous interrupted run may have left a merge in progress.
        self.git
            .abort_merge(&dir)
            .await
            .with_context(|| format!("Repository `{}`: merge recovery failed", repo.name))?;

        match &revision {
            Revision::Branch { name: branch, merge_with } => {
                self.git
                    .checkout(&dir, branch)
                    .await
                    .map_err(|e| self.checkout_error(repo, branch, e))?;

                self.git
                    .reset_hard(&dir, &remote_ref(branch))
                    .await
                    .with_context(|| format!("Repository `{}`: reset failed", repo.name))?;

                self.git
                    .clean(&dir)
                    .await
                    .with_context(|| format!("Repository `{}`: clean failed", repo.name))?;

                let rc_label = self.options.rc_label(self.config);
                if !revision.is_rc(rc_label) {
                    let target = merge_with.as_deref().or(rc_label);
                    if let Some(target) = target {
                        if let Err(e) = self.git.merge(&dir, &remote_ref(target)).await {
                            // Conflicted working trees are never left behind.
                            let _ = self.git.abort_merge(&dir).await;
                            return Err(anyhow!(e).context(format!(
                                "Repository `{}`: merge with `{}` failed",
                                repo.name, target
                            )));
                        }
                    }
                }
            }
            Revision::Commit(hash) => {
                self.git
                    .reset_hard(&dir, hash)
                    .await
                    .with_context(|| format!("Repository `{}`: reset failed", repo.name))?;

                self.git
                    .clean(&dir)
                    .await
                    .with_context(|| format!("Repository `{}`: clean failed", repo.name))?;
            }
        }

        self.logger
            .info(format!("Repository `{}` ready", repo.name));
        Ok(())
    }

    fn checkout_error(
        &self,
        repo: &RepositoryConfig,
        branch: &str,
        error: crate::infra::command::ProcessError,
    ) -> anyhow::Error {
        let detail = error
            .output()
            .map(|output| output.stderr.join("\n"))
            .unwrap_or_default();
        anyhow!(error).context(format!(
            "Repository `{}`: checkout of `{}` failed{}{}",
            repo.name,
            branch,
            if detail.is_empty() { "" } else { ": " },
            detail
        ))
    }

    /// Clones a repository into the store. A pre-existing directory is
    /// taken as an existing clone.
    pub async fn clone_rep_to_store(&self, repo: &RepositoryConfig) -> Result<()> {
        let dir = self.config.repo_path(repo, &self.store_root);
        if dir.exists() {
            return Ok(());
        }

        let url = self.config.clone_url(repo)?;
        self.logger
            .info(format!("Cloning `{}` from {}", repo.name, url));
        self.git
            .clone_into(&self.store_root, &url, &repo.name)
            .await
            .with_context(|| format!("Repository `{}`: clone failed", repo.name))?;
        Ok(())
    }
}
