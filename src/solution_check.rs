//! Grades one part of a submission: header, changes against the starter
//! files, formatting, linting, then build and run.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::assignment::{Assignment, Part};
use crate::header::{self, identify, Header};
use crate::pipeline::{Flow, Pipeline};
use crate::runner::{run_cases, Verification, Verifier};
use crate::runner_file_utils::{self, line_diff, process_files_parallel};
use crate::tools::{self, ToolLimits};

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub part: Part,
    pub target_dir: PathBuf,
    pub program: String,
    pub base_dir: Option<PathBuf>,
    pub use_make: bool,
    pub all_files: bool,
    pub run_timeout: Duration,
    pub limits: ToolLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Passed,
    Warned,
    Failed,
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Passed => "passed",
            StageStatus::Warned => "needs improvement",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: &'static str,
    pub status: StageStatus,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub case: String,
    pub passed: bool,
    pub diagnostic: Option<String>,
}

impl From<&Verification> for RunReport {
    fn from(v: &Verification) -> Self {
        Self {
            case: v.case.clone(),
            passed: v.passed(),
            diagnostic: v.diagnostic(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub part: String,
    pub submitter: String,
    pub header: Option<Header>,
    pub files: Vec<PathBuf>,
    pub stages: Vec<StageReport>,
    pub runs: Vec<RunReport>,
    pub passed: bool,
}

impl Report {
    fn new(part: Part) -> Self {
        Self {
            part: part.to_string(),
            submitter: identify(None),
            header: None,
            files: Vec::new(),
            stages: Vec::new(),
            runs: Vec::new(),
            passed: false,
        }
    }

    fn record(&mut self, stage: &'static str, status: StageStatus, details: Vec<String>) {
        self.stages.push(StageReport {
            stage,
            status,
            details,
        });
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }
}

struct Submission<'o> {
    options: &'o CheckOptions,
    assignment: Assignment,
    files: Vec<PathBuf>,
    header: Option<Header>,
    report: Report,
}

pub fn solution_check(options: &CheckOptions) -> Result<Report> {
    let mut submission = Submission {
        options,
        assignment: options.part.assignment(),
        files: Vec::new(),
        header: None,
        report: Report::new(options.part),
    };

    let completion = Pipeline::new()
        .then("files", Submission::resolve_files)
        .then("header", Submission::check_headers)
        .then("changes", Submission::check_changes)
        .then("format", Submission::check_format)
        .then("lint", Submission::check_lint)
        .then("build", Submission::build_and_run)
        .execute(&mut submission)?;

    let report = &mut submission.report;
    report.passed = completion.finished()
        && report
            .stages
            .iter()
            .all(|s| s.status != StageStatus::Failed);

    info!("End {}", identify(submission.header.as_ref()));
    Ok(submission.report)
}

impl Submission<'_> {
    fn resolve_files(&mut self) -> Result<Flow> {
        let dir = &self.options.target_dir;
        self.files = if self.options.all_files {
            runner_file_utils::source_files(dir)?
        } else {
            self.assignment.files.iter().map(|f| dir.join(f)).collect()
        };
        self.report.files = self.files.clone();

        if self.files.is_empty() {
            error!("No files in {}.", dir.display());
            self.report.record("files", StageStatus::Failed, Vec::new());
            return Ok(Flow::Halt);
        }

        let missing: Vec<_> = self
            .files
            .iter()
            .filter(|f| !f.exists())
            .map(|f| f.display().to_string())
            .collect();
        if missing.is_empty() {
            self.report.record("files", StageStatus::Passed, Vec::new());
        } else {
            warn!("Files not found: {}", missing.join(" "));
            self.report.record("files", StageStatus::Warned, missing);
        }

        Ok(Flow::Continue)
    }

    fn check_headers(&mut self) -> Result<Flow> {
        let (with_header, missing): (Vec<&PathBuf>, Vec<&PathBuf>) =
            self.files.iter().partition(|f| header::has_header(f));

        let Some(first) = with_header.first() else {
            error!(
                "No header provided in any file in {}. Exiting.",
                self.options.target_dir.display()
            );
            error!("All files: {}", display_all(&self.files));
            self.report.record("header", StageStatus::Failed, Vec::new());
            return Ok(Flow::Halt);
        };

        self.header = header::read_header(first);
        let submitter = identify(self.header.as_ref());
        info!("Start {submitter}");
        info!("All files: {}", display_all(&self.files));
        self.report.submitter = submitter;
        self.report.header = self.header.clone();

        if missing.is_empty() {
            self.report.record("header", StageStatus::Passed, Vec::new());
        } else {
            warn!("Files missing headers: {}", display_all(&missing));
            let details = missing.iter().map(|f| f.display().to_string()).collect();
            self.report.record("header", StageStatus::Warned, details);
        }

        Ok(Flow::Continue)
    }

    fn check_changes(&mut self) -> Result<Flow> {
        let Some(base_dir) = &self.options.base_dir else {
            debug!("Skipping base file comparison.");
            self.report.record("changes", StageStatus::Skipped, Vec::new());
            return Ok(Flow::Continue);
        };

        let base_part = base_dir.join(self.options.part.to_string());
        let mut unchanged = Vec::new();
        for file in &self.files {
            let relative = file.strip_prefix(&self.options.target_dir).unwrap_or(file);
            let base = base_part.join(relative);
            if is_unchanged(&base, file, self.options.limits.preprocess) {
                error!("No changes made to the file {}.", file.display());
                unchanged.push(file.display().to_string());
            }
        }

        if unchanged.len() == self.files.len() {
            error!("No changes made to any files.");
            self.report.record("changes", StageStatus::Failed, unchanged);
            return Ok(Flow::Halt);
        }

        let status = if unchanged.is_empty() {
            StageStatus::Passed
        } else {
            StageStatus::Warned
        };
        self.report.record("changes", status, unchanged);
        Ok(Flow::Continue)
    }

    fn check_format(&mut self) -> Result<Flow> {
        if !self.assignment.format_check {
            debug!("Skipping format check.");
            self.report.record("format", StageStatus::Skipped, Vec::new());
            return Ok(Flow::Continue);
        }

        let limit = self.options.limits.format;
        let results = process_files_parallel(&self.files, |file| tools::format_check(file, limit));

        let mut flagged = Vec::new();
        for (file, result) in self.files.iter().zip(results) {
            match result {
                Ok(diff) if diff.is_empty() => {
                    info!("Formatting passed on {}", file.display());
                }
                Ok(diff) => {
                    warn!("Formatting needs improvement in {}.", file.display());
                    info!("Please make sure your code conforms to the Google C++ style.");
                    debug!("\n{}", diff.join("\n"));
                    flagged.push(file.display().to_string());
                }
                Err(e) => {
                    warn!("Could not check formatting of {}: {e:#}", file.display());
                    flagged.push(file.display().to_string());
                }
            }
        }

        self.report.record("format", warned_if_any(&flagged), flagged);
        Ok(Flow::Continue)
    }

    fn check_lint(&mut self) -> Result<Flow> {
        if !self.assignment.lint_check {
            debug!("Skipping lint check.");
            self.report.record("lint", StageStatus::Skipped, Vec::new());
            return Ok(Flow::Continue);
        }

        let skip_compile_cmd = self.assignment.skip_compile_cmd;
        if !skip_compile_cmd {
            let existing: Vec<_> = self.files.iter().filter(|f| f.exists()).cloned().collect();
            if let Err(e) = tools::write_compile_db(&existing, self.options.limits.make) {
                warn!("Could not create compile commands: {e:#}");
            }
        }

        let limit = self.options.limits.tidy;
        let tidy = &self.assignment.tidy_options;
        let results = process_files_parallel(&self.files, |file| {
            tools::lint_check(file, tidy, skip_compile_cmd, limit)
        });

        let mut flagged = Vec::new();
        for (file, result) in self.files.iter().zip(results) {
            match result {
                Ok(warnings) if warnings.is_empty() => {
                    info!("Linting passed in {}", file.display());
                }
                Ok(warnings) => {
                    warn!("Linter found improvements in {}.", file.display());
                    debug!("\n{}", warnings.join("\n"));
                    flagged.push(file.display().to_string());
                }
                Err(e) => {
                    warn!("Could not lint {}: {e:#}", file.display());
                    flagged.push(file.display().to_string());
                }
            }
        }

        self.report.record("lint", warned_if_any(&flagged), flagged);
        Ok(Flow::Continue)
    }

    fn build_and_run(&mut self) -> Result<Flow> {
        let options = self.options;

        let cc_files: Vec<_> = self
            .files
            .iter()
            .filter(|f| runner_file_utils::is_cc_file(f))
            .collect();
        if cc_files.len() > 1 {
            info!("Found more than one C++ source file: {}", display_all(&cc_files));
        }

        let mut main_src = None;
        for file in &cc_files {
            match runner_file_utils::has_main_function(file) {
                Ok(true) if main_src.is_none() => {
                    info!("Main function found in {}", file.display());
                    main_src = Some(*file);
                }
                Ok(true) => warn!("Extra main function found in {}", file.display()),
                Ok(false) => {}
                Err(e) => debug!("{e:#}"),
            }
        }

        let program = if options.use_make {
            info!("Checking build with make in {}", options.target_dir.display());
            if !tools::make_build(&options.target_dir, options.limits.make)? {
                return Ok(self.build_failed());
            }
            options.target_dir.join(&options.program)
        } else {
            let Some(main_src) = main_src else {
                error!("No main function found in files: {}", display_all(&cc_files));
                self.report
                    .record("build", StageStatus::Failed, vec!["no main function".into()]);
                return Ok(Flow::Halt);
            };

            info!("Checking build for {}", main_src.display());
            let target = Path::new(".").join(&options.program);
            if !tools::build(main_src, &target, options.limits.compile)? {
                return Ok(self.build_failed());
            }
            target
        };
        info!("Build passed");
        self.report.record("build", StageStatus::Passed, Vec::new());

        let cases = options.part.test_cases(options.run_timeout)?;
        let results = run_cases(&Verifier::new(program), &cases);
        self.report.runs = results.iter().map(RunReport::from).collect();

        let passed = results.len() == cases.len() && results.iter().all(Verification::passed);
        if passed {
            info!("Run passed");
            self.report.record("run", StageStatus::Passed, Vec::new());
            Ok(Flow::Continue)
        } else {
            error!("Run failed");
            let details = results.iter().filter_map(Verification::diagnostic).collect();
            self.report.record("run", StageStatus::Failed, details);
            Ok(Flow::Halt)
        }
    }

    fn build_failed(&mut self) -> Flow {
        error!("Build failed");
        self.report.record("build", StageStatus::Failed, Vec::new());
        Flow::Halt
    }
}

/// Compares with comments stripped, falling back to the raw text when the
/// preprocessor is unavailable.
fn is_unchanged(base: &Path, file: &Path, timeout: Duration) -> bool {
    match tools::strip_and_compare(base, file, timeout) {
        Ok(diff) => diff.is_empty(),
        Err(e) => {
            warn!("Cannot perform contextual diff: {e:#}");
            match (fs::read_to_string(base), fs::read_to_string(file)) {
                (Ok(base), Ok(contents)) => {
                    line_diff(&base, &contents, "Base", "Submission").is_empty()
                }
                _ => false,
            }
        }
    }
}

fn warned_if_any(flagged: &[String]) -> StageStatus {
    if flagged.is_empty() {
        StageStatus::Passed
    } else {
        StageStatus::Warned
    }
}

fn display_all<P: AsRef<Path>>(paths: &[P]) -> String {
    paths
        .iter()
        .map(|p| p.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const HEADER: &str = "// Tuffy Titan\n\
                          // tuffy.titan@csu.fullerton.edu\n\
                          // @tuffytitan\n\n";

    fn options(root: &Path, part: Part) -> CheckOptions {
        CheckOptions {
            part,
            target_dir: root.join(part.to_string()),
            program: "asgt".to_string(),
            base_dir: None,
            use_make: false,
            all_files: false,
            run_timeout: Duration::from_secs(1),
            limits: ToolLimits::default(),
        }
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn stage<'r>(report: &'r Report, name: &str) -> Option<&'r StageReport> {
        report.stages.iter().find(|s| s.stage == name)
    }

    #[test]
    fn missing_header_stops_grading() {
        let root = TempDir::new("grade").unwrap();
        let options = options(root.path(), Part::Three);
        write(&options.target_dir.join("hello.cc"), "int main() { return 0; }\n");

        let report = solution_check(&options).unwrap();
        assert!(!report.passed);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(stage(&report, "header").unwrap().status, StageStatus::Failed);
        assert!(stage(&report, "build").is_none());
        assert_eq!(report.submitter, "(Malformed Header)");
    }

    #[test]
    fn unchanged_submission_stops_grading() {
        let root = TempDir::new("grade").unwrap();
        let base = TempDir::new("base").unwrap();
        let source = format!("{HEADER}int main(int argc, char const *argv[]) {{ return 0; }}\n");

        let mut options = options(root.path(), Part::Three);
        options.base_dir = Some(base.path().to_path_buf());
        write(&options.target_dir.join("hello.cc"), &source);
        write(&base.path().join("part-3").join("hello.cc"), &source);

        let report = solution_check(&options).unwrap();
        assert!(!report.passed);
        assert_eq!(stage(&report, "header").unwrap().status, StageStatus::Passed);
        assert_eq!(stage(&report, "changes").unwrap().status, StageStatus::Failed);
        assert_eq!(
            report.submitter,
            "Grading Tuffy Titan tuffy.titan@csu.fullerton.edu @tuffytitan"
        );
    }

    #[test]
    fn missing_main_fails_the_build() {
        let root = TempDir::new("grade").unwrap();
        let options = options(root.path(), Part::Two);
        write(
            &options.target_dir.join("quadratic_formula.cc"),
            &format!("{HEADER}double Solve(double a) {{ return a; }}\n"),
        );

        let report = solution_check(&options).unwrap();
        assert!(!report.passed);
        assert_eq!(stage(&report, "changes").unwrap().status, StageStatus::Skipped);
        assert_eq!(stage(&report, "format").unwrap().status, StageStatus::Skipped);
        let build = stage(&report, "build").unwrap();
        assert_eq!(build.status, StageStatus::Failed);
        assert_eq!(build.details, vec!["no main function"]);
        assert!(report.runs.is_empty());
    }

    const MAKEFILE: &str = "all:\n\tcp program.sh asgt\n\tchmod +x asgt\n\n\
                            spotless:\n\trm -f asgt\n";

    fn make_submission(root: &Path, script: &str) -> CheckOptions {
        let mut options = options(root, Part::Three);
        options.use_make = true;
        let dir = &options.target_dir;
        write(
            &dir.join("hello.cc"),
            &format!("{HEADER}int main(int argc, char const *argv[]) {{ return 0; }}\n"),
        );
        write(&dir.join("Makefile"), MAKEFILE);
        write(&dir.join("program.sh"), script);
        options
    }

    #[test]
    fn make_build_runs_the_built_program() {
        let root = TempDir::new("grade").unwrap();
        let options = make_submission(root.path(), "#!/bin/sh\nprintf 'Hello World!\\n'\n");

        let report = solution_check(&options).unwrap();
        assert_eq!(stage(&report, "build").unwrap().status, StageStatus::Passed);
        assert_eq!(stage(&report, "run").unwrap().status, StageStatus::Passed);
        assert_eq!(report.runs.len(), 1);
        assert!(report.runs[0].passed);
        assert!(report.passed);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn make_built_program_failing_fails_the_run() {
        let root = TempDir::new("grade").unwrap();
        let script = "#!/bin/sh\necho 'Hello World!'\nexit 2\n";
        let options = make_submission(root.path(), script);

        let report = solution_check(&options).unwrap();
        assert_eq!(stage(&report, "build").unwrap().status, StageStatus::Passed);
        let run = stage(&report, "run").unwrap();
        assert_eq!(run.status, StageStatus::Failed);
        assert_eq!(run.details, vec!["process exited with code 2"]);
        assert!(!report.passed);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn make_without_makefile_fails_the_build() {
        let root = TempDir::new("grade").unwrap();
        let options = make_submission(root.path(), "#!/bin/sh\n");
        fs::remove_file(options.target_dir.join("Makefile")).unwrap();

        let report = solution_check(&options).unwrap();
        assert_eq!(stage(&report, "build").unwrap().status, StageStatus::Failed);
        assert!(stage(&report, "run").is_none());
        assert!(!report.passed);
    }

    #[test]
    fn all_files_grades_every_source() {
        let root = TempDir::new("grade").unwrap();
        let mut options = options(root.path(), Part::One);
        options.all_files = true;
        write(&options.target_dir.join("convert.h"), "double Convert(double f);\n");
        write(&options.target_dir.join("src/convert.cc"), "\n");

        let report = solution_check(&options).unwrap();
        assert_eq!(report.files.len(), 2);
        assert!(report.files[0].ends_with("convert.h"));
        assert!(report.files[1].ends_with("src/convert.cc"));
        assert_eq!(stage(&report, "files").unwrap().status, StageStatus::Passed);
        assert_eq!(stage(&report, "header").unwrap().status, StageStatus::Failed);
    }

    #[test]
    fn report_serializes_for_autograder() {
        let root = TempDir::new("grade").unwrap();
        let options = options(root.path(), Part::One);
        write(&options.target_dir.join("celius_to_fahrenheit.cc"), "\n");

        let report = solution_check(&options).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["part"], "part-1");
        assert_eq!(json["passed"], false);
        assert_eq!(json["stages"][1]["stage"], "header");
        assert_eq!(json["stages"][1]["status"], "failed");
    }
}
