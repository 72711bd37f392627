//! # Module Map Engine / 模块映射引擎
//!
//! Discovers modules across the repository store, builds the dependency
//! graph and answers the closure queries that drive repository checkout and
//! test selection.
//!
//! The map is built once per run (scan, bounded-concurrency manifest parse,
//! test-required marking) and is immutable afterwards: every consumer only
//! reads, so no locking is needed beyond the memoized query cache.
//!
//! 在仓库存储中发现模块，构建依赖图，并回答驱动仓库检出和测试选择的闭包查询。
//! 映射在每次运行中只构建一次（扫描、限并发清单解析、测试依赖标记），
//! 此后不可变：所有使用方只读，除记忆化查询缓存外无需加锁。

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use futures::{StreamExt, stream};
use once_cell::sync::OnceCell;

use crate::core::manifest;
use crate::core::models::ModuleDescriptor;
use crate::infra::fs::find_module_manifests;
use crate::infra::logger::Logger;

/// Manifest reads and parses in flight at once. I/O bound.
const PARSE_CONCURRENCY: usize = 4;

/// Reserved repository token meaning "every configured repository".
pub const ALL_REPOSITORIES: &str = "all";

/// A repository available for scanning: its configured name and its on-disk
/// location.
#[derive(Debug, Clone)]
pub struct RepositoryView {
    pub name: String,
    pub path: PathBuf,
}

pub struct ModuleMap {
    /// Registration order is significant: duplicate names are
    /// first-registered-wins and fixed-point expansion scans in this order.
    modules: Vec<ModuleDescriptor>,
    index: HashMap<String, usize>,
    /// Scan order of repositories.
    repositories: Vec<String>,
    test_lists: Mutex<HashMap<String, Vec<String>>>,
    repos_with_tests: OnceCell<Vec<String>>,
}

impl ModuleMap {
    /// Scans every repository tree for module manifests and assembles the
    /// dependency graph.
    ///
    /// Manifests are parsed with bounded concurrency; a single manifest
    /// failure only drops that module from the map. Duplicate module names
    /// across repositories keep the first registration.
    pub async fn build(repos: &[RepositoryView], logger: &Logger) -> Result<ModuleMap> {
        let mut descriptors: Vec<ModuleDescriptor> = Vec::new();

        for repo in repos {
            let manifest_paths = find_module_manifests(&repo.path)?;

            let parsed: Vec<Option<ModuleDescriptor>> = stream::iter(manifest_paths)
                .map(|path| async move {
                    let content = match tokio::fs::read_to_string(&path).await {
                        Ok(content) => content,
                        Err(e) => {
                            logger.warn(format!(
                                "Skipping unreadable manifest {}: {}",
                                path.display(),
                                e
                            ));
                            return None;
                        }
                    };
                    match manifest::parse_manifest(&content) {
                        Ok(parsed) => Some(ModuleDescriptor {
                            name: parsed.name,
                            repository: repo.name.clone(),
                            filesystem_path: path
                                .parent()
                                .map(PathBuf::from)
                                .unwrap_or_else(|| path.clone()),
                            descriptor_path: path,
                            dependencies: parsed.dependencies,
                            has_unit_tests: parsed.has_unit_tests,
                            required_for_tests: false,
                            test_in_browser: parsed.test_in_browser,
                        }),
                        Err(e) => {
                            logger.warn(format!(
                                "Skipping malformed manifest {}: {}",
                                path.display(),
                                e
                            ));
                            None
                        }
                    }
                })
                .buffered(PARSE_CONCURRENCY)
                .collect()
                .await;

            descriptors.extend(parsed.into_iter().flatten());
        }

        let mut map = ModuleMap::from_descriptors_unmarked(descriptors, Some(logger));
        map.repositories = repos.iter().map(|r| r.name.clone()).collect();
        map.mark_required_for_tests();
        Ok(map)
    }

    /// Assembles a map directly from descriptors, applying the same
    /// first-wins registration and test-required marking as a scan.
    pub fn from_descriptors(descriptors: Vec<ModuleDescriptor>) -> ModuleMap {
        let mut map = ModuleMap::from_descriptors_unmarked(descriptors, None);
        map.mark_required_for_tests();
        map
    }

    fn from_descriptors_unmarked(
        descriptors: Vec<ModuleDescriptor>,
        logger: Option<&Logger>,
    ) -> ModuleMap {
        let mut modules: Vec<ModuleDescriptor> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut repositories: Vec<String> = Vec::new();

        for descriptor in descriptors {
            if !repositories.contains(&descriptor.repository) {
                repositories.push(descriptor.repository.clone());
            }
            if let Some(&existing) = index.get(&descriptor.name) {
                if let Some(logger) = logger {
                    logger.warn(format!(
                        "Module name `{}` in `{}` already registered by `{}`; ignoring",
                        descriptor.name, descriptor.repository, modules[existing].repository
                    ));
                }
                continue;
            }
            index.insert(descriptor.name.clone(), modules.len());
            modules.push(descriptor);
        }

        ModuleMap {
            modules,
            index,
            repositories,
            test_lists: Mutex::new(HashMap::new()),
            repos_with_tests: OnceCell::new(),
        }
    }

    /// Second build pass: every module reachable from a test module and
    /// owned by that test module's repository is required for tests.
    fn mark_required_for_tests(&mut self) {
        let mut marked: Vec<(String, Vec<String>)> = Vec::new();
        for module in self.modules.iter().filter(|m| m.has_unit_tests) {
            let closure = self.get_child_modules(std::slice::from_ref(&module.name));
            marked.push((module.repository.clone(), closure));
        }
        for (repository, names) in marked {
            for name in names {
                if let Some(&idx) = self.index.get(&name) {
                    if self.modules[idx].repository == repository {
                        self.modules[idx].required_for_tests = true;
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.index.get(name).map(|&idx| &self.modules[idx])
    }

    /// All modules, in registration order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter()
    }

    /// Test modules owned by a repository, in registration order.
    pub fn test_modules_of(&self, repository: &str) -> Vec<&ModuleDescriptor> {
        self.modules
            .iter()
            .filter(|m| m.has_unit_tests && m.repository == repository)
            .collect()
    }

    /// The requested names plus every module transitively reachable through
    /// `dependencies`. DFS pre-order by input order, each name once;
    /// unregistered names are silently not yielded.
    pub fn get_child_modules(&self, names: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut path: HashSet<String> = HashSet::new();
        for name in names {
            self.expand_children(name, &mut path, &mut seen, &mut out);
        }
        out
    }

    fn expand_children(
        &self,
        name: &str,
        path: &mut HashSet<String>,
        seen: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) {
        // The traversal-path set terminates dependency cycles.
        if path.contains(name) {
            return;
        }
        let Some(&idx) = self.index.get(name) else {
            return;
        };
        if !seen.insert(name.to_string()) {
            return;
        }
        out.push(name.to_string());

        path.insert(name.to_string());
        for dependency in &self.modules[idx].dependencies {
            self.expand_children(dependency, path, seen, out);
        }
        path.remove(name);
    }

    /// Fixed point of "add any test-required module with at least one
    /// dependency already in the set", starting from `seed`. Answers which
    /// test modules must run because they depend, directly or transitively,
    /// on something in `seed`.
    ///
    /// Re-scans the full module list (registration order) each iteration
    /// until a pass adds nothing; the module universe is finite, so the
    /// loop terminates.
    pub fn get_parent_modules(&self, seed: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut set: HashSet<String> = HashSet::new();
        for name in seed {
            if set.insert(name.clone()) {
                out.push(name.clone());
            }
        }

        loop {
            let mut grew = false;
            for module in &self.modules {
                if !module.required_for_tests || set.contains(&module.name) {
                    continue;
                }
                if module.dependencies.iter().any(|dep| set.contains(dep)) {
                    set.insert(module.name.clone());
                    out.push(module.name.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        out
    }

    /// The repositories whose tests must run for a request. Memoized for
    /// the lifetime of the map.
    ///
    /// The `all` token selects every repository owning a test module.
    /// Otherwise each requested repository contributes itself plus the
    /// owners of every test module reachable upward from its own test
    /// modules' dependency closure.
    pub fn get_test_list(&self, requested: &[String]) -> Vec<String> {
        let key = requested.join(",");
        if let Some(cached) = self
            .test_lists
            .lock()
            .expect("test list cache poisoned")
            .get(&key)
        {
            return cached.clone();
        }

        let result = if requested.iter().any(|r| r == ALL_REPOSITORIES) {
            self.repos_with_tests().to_vec()
        } else {
            let mut out: Vec<String> = Vec::new();
            let mut seen: HashSet<String> = HashSet::new();

            for repository in requested {
                if seen.insert(repository.clone()) {
                    out.push(repository.clone());
                }

                let test_modules: Vec<String> = self
                    .test_modules_of(repository)
                    .iter()
                    .map(|m| m.name.clone())
                    .collect();
                let closure = self.get_child_modules(&test_modules);
                let required: Vec<String> = closure
                    .into_iter()
                    .filter(|name| self.get(name).is_some_and(|m| m.required_for_tests))
                    .collect();

                for name in self.get_parent_modules(&required) {
                    if let Some(module) = self.get(&name) {
                        if seen.insert(module.repository.clone()) {
                            out.push(module.repository.clone());
                        }
                    }
                }
            }
            out
        };

        self.test_lists
            .lock()
            .expect("test list cache poisoned")
            .insert(key, result.clone());
        result
    }

    /// Repositories owning at least one test module, in scan order.
    fn repos_with_tests(&self) -> &[String] {
        self.repos_with_tests.get_or_init(|| {
            let mut ordered = self.repositories.clone();
            // Descriptor-built maps record repositories in discovery order.
            ordered.retain(|repo| {
                self.modules
                    .iter()
                    .any(|m| m.has_unit_tests && &m.repository == repo)
            });
            ordered
        })
    }
}
