//! # Process Runner Unit Tests / 进程运行模块单元测试
//!
//! Exercises the production [`ProcessRunner`] against real short-lived
//! processes: capture, exit codes, force semantics, error markers, timeout
//! termination and bulk teardown.
//!
//! 针对真实的短生命周期进程测试生产环境的 [`ProcessRunner`]：
//! 捕获、退出码、force 语义、错误标记、超时终止和批量拆除。

use fleet_runner::infra::command::{
    CommandRunner, CommandSpec, ProcessError, ProcessRunner, TERMINATED_MARKER,
};
use fleet_runner::infra::logger::Logger;
use std::sync::Arc;
use std::time::Duration;

fn runner() -> ProcessRunner {
    ProcessRunner::new(Arc::new(Logger::silent()))
}

#[cfg(test)]
mod spec_tests {
    use super::*;

    #[test]
    fn test_shell_parsing_splits_and_keeps_quotes_together() {
        let spec = CommandSpec::shell("node runner.js --flag 'two words'").unwrap();

        assert_eq!(spec.program, "node");
        assert_eq!(spec.args, vec!["runner.js", "--flag", "two words"]);
    }

    #[test]
    fn test_shell_parsing_rejects_empty_command() {
        assert!(CommandSpec::shell("").is_err());
    }

    #[test]
    fn test_command_line_rendering() {
        let spec = CommandSpec::new("git").args(["fetch", "--all"]);
        assert_eq!(spec.command_line(), "git fetch --all");
    }
}

#[cfg(test)]
mod execution_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command_captures_stdout() {
        let spec = CommandSpec::new("echo").arg("Hello, Runner!");

        let output = runner().run(spec).await.unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, vec!["Hello, Runner!"]);
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_stderr_is_captured_separately() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2"]);

        let output = runner().run(spec).await.unwrap();

        assert_eq!(output.stdout, vec!["out"]);
        assert_eq!(output.stderr, vec!["err"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error_with_partial_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo partial; exit 3"]);

        let error = runner().run(spec).await.unwrap_err();

        match error {
            ProcessError::Failed { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(output.stdout, vec!["partial"]);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_force_rewrites_failure_as_success() {
        let spec = CommandSpec::new("sh").args(["-c", "echo kept; exit 1"]).force(true);

        let output = runner().run(spec).await.unwrap();

        assert_eq!(output.exit_code, Some(1));
        assert_eq!(output.stdout, vec!["kept"]);
    }

    #[tokio::test]
    async fn test_error_marker_fails_even_on_zero_exit() {
        let spec = CommandSpec::new("echo")
            .arg("BUILD ERROR: everything is broken")
            .error_marker("BUILD ERROR");

        let error = runner().run(spec).await.unwrap_err();

        assert!(matches!(error, ProcessError::MarkerFound { .. }));
    }

    #[tokio::test]
    async fn test_error_marker_with_force_returns_output() {
        let spec = CommandSpec::new("echo")
            .arg("BUILD ERROR: everything is broken")
            .error_marker("BUILD ERROR")
            .force(true);

        assert!(runner().run(spec).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports_partial_output() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo early; sleep 30"])
            .timeout(Duration::from_millis(300));

        let error = runner().run(spec).await.unwrap_err();

        match error {
            ProcessError::Timeout { output, .. } => {
                assert_eq!(output.stdout, vec!["early"]);
                assert_eq!(output.stderr.last().map(String::as_str), Some(TERMINATED_MARKER));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nonexistent_program_is_an_io_error() {
        let spec = CommandSpec::new("this_command_does_not_exist_12345");

        let error = runner().run(spec).await.unwrap_err();

        assert!(matches!(error, ProcessError::Io { .. }));
    }

    #[tokio::test]
    async fn test_kill_all_terminates_running_processes() {
        let runner = Arc::new(runner());
        let spec = CommandSpec::new("sh").args(["-c", "sleep 30"]);

        let running = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(spec).await })
        };

        // Give the subprocess time to start before the sweep.
        tokio::time::sleep(Duration::from_millis(300)).await;
        runner.kill_all();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(ProcessError::Killed { .. })));
    }
}
