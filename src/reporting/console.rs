//! # Console Reporting Module / 控制台报告模块
//!
//! Colorful, formatted summaries of test outcomes. The summary always goes
//! to the console, even when progress logging is suppressed for console
//! report mode.
//!
//! 彩色格式化的测试结果摘要。即使在控制台报告模式下抑制了进度日志，
//! 摘要也始终输出到控制台。

use colored::*;

use crate::core::models::{ModuleTestOutcome, OutcomeStatus};

/// Prints a formatted summary of all test outcomes.
///
/// # Output Format
/// ```text
/// --- Test Summary ---
///   - Passed               | Core                                | node    |     12.41s
///   - Failed               | UI                                  | browser |     48.02s
///   - Skipped (no changes) | Widgets                             | node    |        N/A
/// ```
pub fn print_summary(outcomes: &[ModuleTestOutcome]) {
    println!("\n{}", "--- Test Summary ---".bold());

    for outcome in outcomes {
        let status_str = outcome.status_str();
        let status_colored = match outcome.status {
            OutcomeStatus::Passed => status_str.green(),
            OutcomeStatus::Failed | OutcomeStatus::Timeout => status_str.red(),
            OutcomeStatus::SkippedNoChanges => status_str.dimmed(),
        };
        let duration_str = if outcome.status == OutcomeStatus::SkippedNoChanges {
            "N/A".to_string()
        } else {
            format!("{:.2?}", outcome.duration)
        };

        println!(
            "  - {:<20} | {:<35} | {:<7} | {:>10}",
            status_colored,
            outcome.target,
            outcome.environment.as_str(),
            duration_str
        );
    }
}

/// Prints the captured error blocks of every failed outcome.
pub fn print_failure_details(outcomes: &[ModuleTestOutcome]) {
    let failures: Vec<&ModuleTestOutcome> = outcomes.iter().filter(|o| o.is_failure()).collect();
    if failures.is_empty() {
        return;
    }

    println!("\n{}", "--- Failure Details ---".red().bold());
    println!("{}", "-".repeat(80));

    for (i, outcome) in failures.iter().enumerate() {
        println!(
            "[{}/{}] {} '{}' ({})",
            i + 1,
            failures.len(),
            "Failed target".red(),
            outcome.target.cyan(),
            outcome.environment
        );

        if outcome.errors.is_empty() {
            println!("\n(no error output captured)");
        } else {
            for error in &outcome.errors {
                println!("\n{}", error);
            }
        }
        println!("\n{}", "-".repeat(80));
    }
}
