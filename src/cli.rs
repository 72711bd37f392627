// src/cli.rs
use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, Command};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::config::{ReportFormat, RunOptions};
use crate::core::models::Task;

pub mod commands;

fn build_cli() -> Command {
    Command::new("fleet-runner")
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-repository unit test orchestrator")
        .arg(
            Arg::new("rep")
                .long("rep")
                .help("Comma-separated repositories to operate on; `all` selects every configured repository")
                .value_name("REPOSITORIES")
                .value_delimiter(',')
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("tasks")
                .long("tasks")
                .help("Comma-separated phases to run: init-store, build, test")
                .value_name("TASKS")
                .value_delimiter(',')
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("rc")
                .long("rc")
                .help("Release-candidate label repositories are checked out against by default")
                .value_name("LABEL")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("branch")
                .long("branch")
                .help("Per-repository branch override, repeatable")
                .value_name("REP=BRANCH")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to the orchestrator configuration file")
                .value_name("CONFIG")
                .default_value("FleetConfig.toml")
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("workDir")
                .long("workDir")
                .help("Directory for run configurations, reports and logs")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("workspace")
                .long("workspace")
                .help("Project/service descriptor driving the build phase")
                .value_name("DESCRIPTOR")
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .help("Directory repositories are cloned into")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("only")
                .long("only")
                .help("Run the first requested repository as a single test target, skipping the per-module partition")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("diff")
                .long("diff")
                .help("Skip modules without changes against the rc branch")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("coverage")
                .long("coverage")
                .help("Collect coverage for the dependency closure of every target")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .help("Report destination")
                .value_name("FORMAT")
                .value_parser(["xml", "console"])
                .default_value("xml")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("node")
                .long("node")
                .help("Run only the Node-side test passes")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("browser")
                .long("browser")
                .help("Run only the browser-side test passes")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("server")
                .long("server")
                .help("Keep test runners alive for interactive debugging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("save-errors")
                .long("save-errors")
                .help("Persist newly observed error signatures into the allowed-errors file")
                .action(ArgAction::SetTrue),
        )
}

/// Parses the command line into run options.
pub fn parse_args() -> Result<RunOptions> {
    let matches = build_cli().get_matches();
    options_from_matches(&matches)
}

fn options_from_matches(matches: &clap::ArgMatches) -> Result<RunOptions> {
    let reps: Vec<String> = matches
        .get_many::<String>("rep")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let tasks = match matches.get_many::<String>("tasks") {
        None => Task::all(),
        Some(values) => values
            .map(|value| {
                Task::parse(value).with_context(|| format!("Unknown task: `{value}`"))
            })
            .collect::<Result<Vec<Task>>>()?,
    };

    let mut branch_overrides = HashMap::new();
    if let Some(values) = matches.get_many::<String>("branch") {
        for value in values {
            let Some((rep, branch)) = value.split_once('=') else {
                bail!("Invalid --branch value `{value}`, expected REP=BRANCH");
            };
            branch_overrides.insert(rep.to_string(), branch.to_string());
        }
    }

    let report = match matches.get_one::<String>("report").map(String::as_str) {
        Some("console") => ReportFormat::Console,
        _ => ReportFormat::Xml,
    };

    Ok(RunOptions {
        reps,
        tasks,
        rc: matches.get_one::<String>("rc").cloned(),
        branch_overrides,
        config_path: matches
            .get_one::<PathBuf>("config")
            .cloned()
            .unwrap_or_else(|| PathBuf::from("FleetConfig.toml")),
        work_dir: matches.get_one::<PathBuf>("workDir").cloned(),
        workspace: matches.get_one::<PathBuf>("workspace").cloned(),
        store: matches.get_one::<PathBuf>("store").cloned(),
        only: matches.get_flag("only"),
        diff: matches.get_flag("diff"),
        coverage: matches.get_flag("coverage"),
        report,
        node: matches.get_flag("node"),
        browser: matches.get_flag("browser"),
        server: matches.get_flag("server"),
        save_errors: matches.get_flag("save-errors"),
    })
}

pub async fn run() -> Result<()> {
    let options = parse_args()?;
    commands::run::execute(options).await
}
