use colored::Colorize;
use solution_check::{solution_check, Report, StageStatus};

pub mod assignment;
pub mod config;
pub mod header;
pub mod lint;
pub mod logging;
pub mod pipeline;
pub mod runner;
pub mod runner_file_utils;
pub mod solution_check;
pub mod tools;

/// Runs the selected command and returns the process exit status.
pub fn run(cli: config::Cli) -> anyhow::Result<i32> {
    match cli.command {
        config::Command::Check(args) => {
            let report = solution_check(&args.options())?;
            print_summary(&report);

            if args.autograder {
                println!("{}", serde_json::to_string(&report)?);
            }

            Ok(report.exit_code())
        }
        config::Command::Lint(args) => lint::lint_files(&args.files, &args.limits()),
    }
}

fn print_summary(report: &Report) {
    println!("{}", report.submitter);
    for stage in &report.stages {
        let line = format!("{}: {}", stage.stage, stage.status);
        match stage.status {
            StageStatus::Passed => println!("{}", line.green()),
            StageStatus::Warned => println!("{}", line.yellow()),
            StageStatus::Failed => println!("{}", line.red()),
            StageStatus::Skipped => println!("{}", line.dimmed()),
        }
    }
    for run in report.runs.iter().filter(|r| !r.passed) {
        if let Some(diagnostic) = &run.diagnostic {
            println!("{}", format!("{}: {diagnostic}", run.case).red());
        }
    }
}
