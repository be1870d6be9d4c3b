use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::assignment::Part;
use crate::solution_check::CheckOptions;
use crate::tools::ToolLimits;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Terminal coloring
    #[arg(short = 'c', long, value_parser = ["on", "off"], global = true)]
    pub color: Option<String>,

    /// Quiet (use -q through -qqq)
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Debug information
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a student's solution to one part of the assignment
    Check(CheckArgs),
    /// Lint C++ files with clang-tidy
    Lint(LintArgs),
}

#[derive(Args)]
pub struct CheckArgs {
    /// Assignment part (part-1, part-2, part-3)
    pub part: Part,

    /// Name of the program to build and run
    #[arg(default_value = "asgt")]
    pub program: String,

    /// Directory with the unmodified starter files, to detect untouched work
    pub base_dir: Option<PathBuf>,

    /// Directory holding the submission (defaults to the part name)
    #[arg(long)]
    pub target_dir: Option<PathBuf>,

    /// Build with the directory's Makefile instead of clang++
    #[arg(long)]
    pub make: bool,

    /// Grade every .cc and .h file under the target directory instead of
    /// the part's own files
    #[arg(long)]
    pub all_files: bool,

    /// Execution time limit per expected output (1 second)
    #[arg(long, value_parser = clap::value_parser!(u64), default_value = "1")]
    pub limit_run: u64,

    /// Compiler time limit (10 seconds)
    #[arg(long, value_parser = clap::value_parser!(u64), default_value = "10")]
    pub limit_compile: u64,

    /// clang-format time limit (10 seconds)
    #[arg(long, value_parser = clap::value_parser!(u64), default_value = "10")]
    pub limit_format: u64,

    /// clang-tidy time limit (60 seconds)
    #[arg(long, value_parser = clap::value_parser!(u64), default_value = "60")]
    pub limit_tidy: u64,

    /// make time limit (15 seconds)
    #[arg(long, value_parser = clap::value_parser!(u64), default_value = "15")]
    pub limit_make: u64,

    /// Comment stripping time limit (10 seconds)
    #[arg(long, value_parser = clap::value_parser!(u64), default_value = "10")]
    pub limit_preprocess: u64,

    /// Produce autograder output
    #[arg(long)]
    pub autograder: bool,
}

impl CheckArgs {
    pub fn limits(&self) -> ToolLimits {
        ToolLimits {
            compile: Duration::from_secs(self.limit_compile),
            format: Duration::from_secs(self.limit_format),
            tidy: Duration::from_secs(self.limit_tidy),
            make: Duration::from_secs(self.limit_make),
            preprocess: Duration::from_secs(self.limit_preprocess),
        }
    }

    pub fn options(&self) -> CheckOptions {
        CheckOptions {
            part: self.part,
            target_dir: self
                .target_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(self.part.to_string())),
            program: self.program.clone(),
            base_dir: self.base_dir.clone(),
            use_make: self.make,
            all_files: self.all_files,
            run_timeout: Duration::from_secs(self.limit_run),
            limits: self.limits(),
        }
    }
}

#[derive(Args)]
pub struct LintArgs {
    /// clang-tidy time limit (60 seconds)
    #[arg(long, value_parser = clap::value_parser!(u64), default_value = "60")]
    pub limit_tidy: u64,

    /// make time limit (15 seconds)
    #[arg(long, value_parser = clap::value_parser!(u64), default_value = "15")]
    pub limit_make: u64,

    /// Files to lint
    pub files: Vec<PathBuf>,
}

impl LintArgs {
    pub fn limits(&self) -> ToolLimits {
        ToolLimits {
            tidy: Duration::from_secs(self.limit_tidy),
            make: Duration::from_secs(self.limit_make),
            ..ToolLimits::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn check(args: &[&str]) -> CheckArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Check(check) => check,
            Command::Lint(_) => panic!("expected check"),
        }
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn check_defaults() {
        let options = check(&["cpp_grader", "check", "part-2"]).options();
        assert_eq!(options.part, Part::Two);
        assert_eq!(options.target_dir, PathBuf::from("part-2"));
        assert_eq!(options.program, "asgt");
        assert_eq!(options.base_dir, None);
        assert_eq!(options.run_timeout, Duration::from_secs(1));
        assert_eq!(options.limits, ToolLimits::default());
        assert!(!options.use_make);
        assert!(!options.all_files);
    }

    #[test]
    fn check_positionals_and_limits() {
        let options = check(&[
            "cpp_grader",
            "check",
            "part-1",
            "convert",
            "../starter",
            "--target-dir",
            "submission/part-1",
            "--limit-run",
            "3",
            "--make",
            "--all-files",
        ])
        .options();
        assert_eq!(options.program, "convert");
        assert_eq!(options.base_dir, Some(PathBuf::from("../starter")));
        assert_eq!(options.target_dir, PathBuf::from("submission/part-1"));
        assert_eq!(options.run_timeout, Duration::from_secs(3));
        assert!(options.use_make);
        assert!(options.all_files);
    }

    #[test]
    fn unknown_part_is_rejected() {
        assert!(Cli::try_parse_from(["cpp_grader", "check", "part-7"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cpp_grader",
            "lint",
            "-qq",
            "-c",
            "off",
            "a.cc",
            "b.cc",
        ])
        .unwrap();
        assert_eq!(cli.quiet, 2);
        assert_eq!(cli.color.as_deref(), Some("off"));
        match cli.command {
            Command::Lint(lint) => {
                assert_eq!(lint.files.len(), 2);
                assert_eq!(lint.limits().tidy, Duration::from_secs(60));
            }
            Command::Check(_) => panic!("expected lint"),
        }
    }
}
