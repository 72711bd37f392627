//! Shared test fixtures: a scripted [`CommandRunner`] and module-descriptor
//! builders.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fleet_runner::core::models::ModuleDescriptor;
use fleet_runner::infra::command::{CommandOutput, CommandRunner, CommandSpec, ProcessError};

/// Scripted response for commands whose haystack (working directory plus
/// command line) contains `needle`.
pub struct Rule {
    pub needle: String,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
    /// How many times the rule may fire; negative means unlimited.
    pub remaining: isize,
}

impl Rule {
    pub fn ok(needle: &str, stdout: &[&str]) -> Rule {
        Rule {
            needle: needle.to_string(),
            stdout: stdout.iter().map(|s| s.to_string()).collect(),
            stderr: Vec::new(),
            exit_code: 0,
            remaining: -1,
        }
    }

    pub fn fail(needle: &str, stderr: &[&str]) -> Rule {
        Rule {
            needle: needle.to_string(),
            stdout: Vec::new(),
            stderr: stderr.iter().map(|s| s.to_string()).collect(),
            exit_code: 1,
            remaining: -1,
        }
    }

    pub fn times(mut self, count: isize) -> Rule {
        self.remaining = count;
        self
    }
}

/// A [`CommandRunner`] that never touches the operating system. It records
/// every invocation and answers from its rule table; unmatched commands
/// succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    pub calls: Mutex<Vec<CommandSpec>>,
    rules: Mutex<Vec<Rule>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> ScriptedRunner {
        ScriptedRunner::default()
    }

    pub fn with_rules(rules: Vec<Rule>) -> ScriptedRunner {
        ScriptedRunner {
            rules: Mutex::new(rules),
            ..ScriptedRunner::default()
        }
    }

    /// Makes every command take a while, so overlap becomes observable.
    pub fn with_delay(mut self, delay: Duration) -> ScriptedRunner {
        self.delay = Some(delay);
        self
    }

    /// Recorded command lines, in invocation order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.command_line())
            .collect()
    }

    /// Command lines whose haystack contains `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| haystack(spec).contains(needle))
            .map(|spec| spec.command_line())
            .collect()
    }
}

fn haystack(spec: &CommandSpec) -> String {
    let dir = spec
        .current_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    format!("{} {}", dir, spec.command_line())
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.calls.lock().unwrap().push(spec.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let haystack = haystack(&spec);
        let matched = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|rule| rule.remaining != 0 && haystack.contains(&rule.needle))
                .map(|rule| {
                    if rule.remaining > 0 {
                        rule.remaining -= 1;
                    }
                    (rule.stdout.clone(), rule.stderr.clone(), rule.exit_code)
                })
        };

        let (stdout, stderr, exit_code) = matched.unwrap_or((Vec::new(), Vec::new(), 0));
        let output = CommandOutput {
            stdout,
            stderr,
            exit_code: Some(exit_code),
        };

        if exit_code == 0 || spec.force {
            Ok(output)
        } else {
            Err(ProcessError::Failed {
                command: spec.command_line(),
                code: Some(exit_code),
                output,
            })
        }
    }
}

/// A module descriptor with everything derivable left to the map.
pub fn descriptor(name: &str, repository: &str, dependencies: &[&str]) -> ModuleDescriptor {
    ModuleDescriptor {
        name: name.to_string(),
        repository: repository.to_string(),
        filesystem_path: format!("store/{repository}/{name}").into(),
        descriptor_path: format!("store/{repository}/{name}/module.xml").into(),
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        has_unit_tests: false,
        required_for_tests: false,
        test_in_browser: false,
    }
}

pub fn test_descriptor(name: &str, repository: &str, dependencies: &[&str]) -> ModuleDescriptor {
    ModuleDescriptor {
        has_unit_tests: true,
        ..descriptor(name, repository, dependencies)
    }
}
