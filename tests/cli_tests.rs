use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

/// This test runs `fleet-runner` end to end against the `demo-repo` fixture
/// with a stand-in test runner that always succeeds. It asserts that the
/// command exits successfully and prints a passing summary.
///
/// 这个测试使用始终成功的替代测试运行器，针对 `demo-repo` 夹具端到端运行
/// `fleet-runner`。它断言命令成功退出并打印通过的摘要。
#[test]
fn test_successful_run() {
    let work = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("fleet-runner").unwrap();
    cmd.arg("--rep=demo-repo")
        .arg("--tasks=test")
        .arg("--config")
        .arg("tests/fixtures/fleet_ok.toml")
        .arg("--workDir")
        .arg(work.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test Summary"))
        .stdout(predicate::str::contains("Passed"));
}

/// This test checks the console-report failure scenario: the stand-in
/// runner crashes with a stack trace, so the run must fail with exit code 2
/// and surface the failure details.
///
/// 这个测试检查控制台报告的失败场景：替代运行器带着堆栈崩溃，
/// 因此运行必须以退出码 2 失败并展示失败详情。
#[test]
fn test_failing_run_in_console_mode() {
    let work = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("fleet-runner").unwrap();
    cmd.arg("--rep=demo-repo")
        .arg("--tasks=test")
        .arg("--report=console")
        .arg("--config")
        .arg("tests/fixtures/fleet_fail.toml")
        .arg("--workDir")
        .arg(work.path());

    cmd.assert()
        .failure()
        .code(2)
        .stdout(predicate::str::contains("Failure Details"))
        .stderr(predicate::str::contains("Unit tests failed"));
}

/// `--rep` is required; usage errors must not exit with 0.
#[test]
fn test_missing_rep_is_a_usage_error() {
    let mut cmd = Command::cargo_bin("fleet-runner").unwrap();
    cmd.arg("--tasks=test");

    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--rep"));
}

/// A missing configuration file is a configuration error with exit code 2.
#[test]
fn test_missing_config_file_fails_with_exit_code_2() {
    let mut cmd = Command::cargo_bin("fleet-runner").unwrap();
    cmd.arg("--rep=demo-repo")
        .arg("--config")
        .arg("does-not-exist.toml");

    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_help_lists_the_contract_flags() {
    let mut cmd = Command::cargo_bin("fleet-runner").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--rep"))
        .stdout(predicate::str::contains("--tasks"))
        .stdout(predicate::str::contains("--rc"))
        .stdout(predicate::str::contains("--diff"))
        .stdout(predicate::str::contains("--only"));
}
