//! # Module Map Unit Tests / 模块映射单元测试
//!
//! Closure queries, cycle protection, test-required marking and test-list
//! selection over descriptor-built maps, plus a scan over a real manifest
//! tree.
//!
//! 针对基于描述符构建的映射的闭包查询、环保护、测试依赖标记和测试列表选择，
//! 以及对真实清单树的扫描。

mod common;

use common::{descriptor, test_descriptor};
use fleet_runner::core::modmap::{ModuleMap, RepositoryView};
use fleet_runner::infra::logger::Logger;
use std::fs;
use tempfile::TempDir;

#[cfg(test)]
mod child_closure_tests {
    use super::*;

    #[test]
    fn test_child_closure_returns_reachable_set_in_preorder() {
        let map = ModuleMap::from_descriptors(vec![
            descriptor("App", "repo", &["UI", "Core"]),
            descriptor("UI", "repo", &["Core"]),
            descriptor("Core", "repo", &["Env"]),
            descriptor("Env", "repo", &[]),
            descriptor("Unrelated", "repo", &[]),
        ]);

        let closure = map.get_child_modules(&["App".to_string()]);

        // DFS pre-order: App, then UI and its subtree, then Core (already
        // visited through UI).
        assert_eq!(closure, vec!["App", "UI", "Core", "Env"]);
    }

    #[test]
    fn test_child_closure_deduplicates_across_seeds() {
        let map = ModuleMap::from_descriptors(vec![
            descriptor("A", "repo", &["C"]),
            descriptor("B", "repo", &["C"]),
            descriptor("C", "repo", &[]),
        ]);

        let closure = map.get_child_modules(&["A".to_string(), "B".to_string()]);

        assert_eq!(closure, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_child_closure_terminates_on_cycle() {
        // A -> B -> C -> A
        let map = ModuleMap::from_descriptors(vec![
            descriptor("A", "repo", &["B"]),
            descriptor("B", "repo", &["C"]),
            descriptor("C", "repo", &["A"]),
        ]);

        let closure = map.get_child_modules(&["A".to_string()]);

        assert_eq!(closure, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_child_closure_terminates_on_self_reference() {
        let map = ModuleMap::from_descriptors(vec![descriptor("Loop", "repo", &["Loop"])]);

        let closure = map.get_child_modules(&["Loop".to_string()]);

        assert_eq!(closure, vec!["Loop"]);
    }

    #[test]
    fn test_child_closure_ignores_unregistered_names() {
        let map = ModuleMap::from_descriptors(vec![descriptor("A", "repo", &["Ghost"])]);

        let closure = map.get_child_modules(&["A".to_string(), "Phantom".to_string()]);

        // Referencing an unregistered dependency is structurally legal; it
        // is simply never yielded.
        assert_eq!(closure, vec!["A"]);
    }
}

#[cfg(test)]
mod parent_closure_tests {
    use super::*;

    fn sample_map() -> ModuleMap {
        ModuleMap::from_descriptors(vec![
            descriptor("Env", "repo", &[]),
            test_descriptor("Core", "repo", &["Env"]),
            test_descriptor("UI", "repo", &["Core"]),
            descriptor("App", "repo", &["UI"]),
        ])
    }

    #[test]
    fn test_parent_closure_expands_to_fixed_point() {
        let map = sample_map();

        let parents = map.get_parent_modules(&["Env".to_string()]);

        // Core depends on Env, UI depends on Core; App has no tests and is
        // never test-required.
        assert_eq!(parents, vec!["Env", "Core", "UI"]);
    }

    #[test]
    fn test_parent_closure_is_idempotent() {
        let map = sample_map();

        let once = map.get_parent_modules(&["Env".to_string()]);
        let twice = map.get_parent_modules(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_parent_closure_of_empty_seed_is_empty() {
        let map = sample_map();

        assert!(map.get_parent_modules(&[]).is_empty());
    }
}

#[cfg(test)]
mod test_list_tests {
    use super::*;

    #[test]
    fn test_all_token_selects_repositories_with_test_modules() {
        let map = ModuleMap::from_descriptors(vec![
            test_descriptor("Core", "core-repo", &[]),
            descriptor("Theme", "theme-repo", &[]),
            test_descriptor("Shop", "shop-repo", &["Core"]),
        ]);

        let list = map.get_test_list(&["all".to_string()]);

        assert_eq!(list, vec!["core-repo", "shop-repo"]);
    }

    #[test]
    fn test_dependent_repositories_are_pulled_in() {
        // App depends on Core, Core has tests, UI depends on Core and has
        // tests but lives in another repository.
        let map = ModuleMap::from_descriptors(vec![
            descriptor("App", "core-repo", &["Core"]),
            test_descriptor("Core", "core-repo", &[]),
            test_descriptor("UI", "ui-repo", &["Core"]),
        ]);

        let list = map.get_test_list(&["core-repo".to_string()]);

        assert_eq!(list, vec!["core-repo", "ui-repo"]);
    }

    #[test]
    fn test_request_order_is_preserved_and_memoized() {
        let map = ModuleMap::from_descriptors(vec![
            test_descriptor("A", "alpha", &[]),
            test_descriptor("B", "beta", &[]),
        ]);

        let request = vec!["beta".to_string(), "alpha".to_string()];
        let first = map.get_test_list(&request);
        let second = map.get_test_list(&request);

        assert_eq!(first, vec!["beta", "alpha"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_required_marking_stays_inside_the_repository() {
        // Shop's tests depend on Core from another repository: Core must not
        // become test-required through Shop.
        let map = ModuleMap::from_descriptors(vec![
            descriptor("Core", "core-repo", &[]),
            test_descriptor("Shop", "shop-repo", &["Core"]),
        ]);

        assert!(!map.get("Core").unwrap().required_for_tests);
        assert!(map.get("Shop").unwrap().required_for_tests);
    }

    #[test]
    fn test_duplicate_module_names_keep_first_registration() {
        let map = ModuleMap::from_descriptors(vec![
            descriptor("Shared", "first-repo", &[]),
            descriptor("Shared", "second-repo", &["Anything"]),
        ]);

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("Shared").unwrap().repository, "first-repo");
        assert!(map.get("Shared").unwrap().dependencies.is_empty());
    }
}

#[cfg(test)]
mod scan_tests {
    use super::*;

    fn write_manifest(dir: &std::path::Path, xml: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("module.xml"), xml).unwrap();
    }

    #[tokio::test]
    async fn test_scan_round_trip_marks_test_dependencies() {
        let store = TempDir::new().unwrap();
        let repo = store.path().join("core-repo");

        write_manifest(
            &repo.join("Runner"),
            r#"<module name="Runner">
                <depends>
                    <module name="X" />
                    <submodule name="Y" />
                </depends>
                <unit_test />
            </module>"#,
        );
        write_manifest(&repo.join("X"), r#"<module name="X" />"#);
        write_manifest(&repo.join("Y"), r#"<module name="Y" />"#);

        let map = ModuleMap::build(
            &[RepositoryView {
                name: "core-repo".to_string(),
                path: repo.clone(),
            }],
            &Logger::silent(),
        )
        .await
        .unwrap();

        let runner = map.get("Runner").unwrap();
        assert_eq!(runner.dependencies, vec!["X", "Y"]);
        assert!(runner.has_unit_tests);
        assert!(!runner.test_in_browser);
        assert_eq!(runner.filesystem_path, repo.join("Runner"));

        // Same-repository dependencies of a test module become required.
        assert!(map.get("X").unwrap().required_for_tests);
        assert!(map.get("Y").unwrap().required_for_tests);
    }

    #[tokio::test]
    async fn test_scan_skips_hidden_directories_and_broken_manifests() {
        let store = TempDir::new().unwrap();
        let repo = store.path().join("repo");

        write_manifest(&repo.join("Good"), r#"<module name="Good" />"#);
        write_manifest(&repo.join(".hidden").join("Secret"), r#"<module name="Secret" />"#);
        write_manifest(&repo.join("Broken"), "<module name=");

        let map = ModuleMap::build(
            &[RepositoryView {
                name: "repo".to_string(),
                path: repo,
            }],
            &Logger::silent(),
        )
        .await
        .unwrap();

        // A broken manifest only loses that module, never the scan.
        assert_eq!(map.len(), 1);
        assert!(map.get("Good").is_some());
        assert!(map.get("Secret").is_none());
        assert!(map.get("Broken").is_none());
    }
}
