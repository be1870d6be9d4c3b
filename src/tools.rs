use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::{debug, error, info};
use wait_timeout::ChildExt;

use crate::assignment::TidyOptions;
use crate::runner_file_utils::line_diff;

const COMPILER: &str = "clang++";
const COMPILE_DB: &str = "compile_commands.json";

/// Time limits for the external tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolLimits {
    pub compile: Duration,
    pub format: Duration,
    pub tidy: Duration,
    pub make: Duration,
    pub preprocess: Duration,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            compile: Duration::from_secs(10),
            format: Duration::from_secs(10),
            tidy: Duration::from_secs(60),
            make: Duration::from_secs(15),
            preprocess: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs a tool to completion, feeding it `input` on stdin. The tool is killed
/// if it runs longer than `timeout`. Output still held open by something the
/// tool left behind is waited on for at most `timeout` again.
pub fn run_tool(
    mut cmd: Command,
    input: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<ToolOutput> {
    let program = format!("{cmd:?}");
    debug!("{program}");

    let stdin = if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    let mut child = cmd
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start {program}"))?;

    // A tool may exit without reading all of its input, so the writer is
    // never joined.
    if let Some((mut pipe, input)) = child.stdin.take().zip(input) {
        thread::spawn(move || pipe.write_all(&input));
    }
    let stdout = child.stdout.take().map(read_in_background);
    let stderr = child.stderr.take().map(read_in_background);

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            child.kill()?;
            child.wait()?;
            bail!("{program} did not finish within {timeout:?}");
        }
    };

    let deadline = Instant::now() + timeout;
    Ok(ToolOutput {
        status,
        stdout: collect(stdout, deadline, &program)?,
        stderr: collect(stderr, deadline, &program)?,
    })
}

fn read_in_background<R>(mut pipe: R) -> Receiver<io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let result = pipe.read_to_end(&mut bytes).map(|_| bytes);
        let _ = tx.send(result);
    });
    rx
}

fn collect(
    reader: Option<Receiver<io::Result<Vec<u8>>>>,
    deadline: Instant,
    program: &str,
) -> Result<String> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    let bytes = reader
        .recv_timeout(remaining)
        .map_err(|_| anyhow!("{program} exited but its output was not closed"))??;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Removes comments by running the file through the preprocessor. Letters
/// and `#` are escaped first so that includes and macros survive untouched.
pub fn strip_comments(file: &Path, timeout: Duration) -> Result<String> {
    let escaped = fs::read_to_string(file)
        .with_context(|| format!("Cannot remove comments. No such file. {}", file.display()))?
        .replace('a', "aA")
        .replace("__", "aB")
        .replace('#', "aC");

    let mut cmd = Command::new(COMPILER);
    cmd.args(["-E", "-P", "-"]);
    let output = run_tool(cmd, Some(escaped.into_bytes()), timeout)?;
    if !output.success() {
        bail!(
            "Errors encountered removing comments: {}",
            output.stderr.trim_end()
        );
    }

    Ok(output
        .stdout
        .replace("aC", "#")
        .replace("aB", "__")
        .replace("aA", "a"))
}

/// Diff of `base` and `submission` with comments removed from both.
pub fn strip_and_compare(
    base: &Path,
    submission: &Path,
    timeout: Duration,
) -> Result<Vec<String>> {
    let base_contents = strip_comments(base, timeout)?;
    let contents = strip_comments(submission, timeout)?;
    Ok(line_diff(&base_contents, &contents, "Base", "Submission"))
}

/// Diff between the file and what clang-format would make of it.
pub fn format_check(file: &Path, timeout: Duration) -> Result<Vec<String>> {
    let mut cmd = Command::new("clang-format");
    cmd.args(["-style=Google", "--Werror"]).arg(file);
    let output = run_tool(cmd, None, timeout)?;
    if !output.success() && output.stdout.is_empty() {
        bail!("clang-format failed: {}", output.stderr.trim_end());
    }

    let original = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(line_diff(
        &original,
        &output.stdout,
        "Student Submission (Yours)",
        "Correct Format",
    ))
}

/// clang-tidy findings for `file`. Without a compile database the file is
/// checked as C++17.
pub fn lint_check(
    file: &Path,
    options: &TidyOptions,
    skip_compile_cmd: bool,
    timeout: Duration,
) -> Result<Vec<String>> {
    let mut cmd = Command::new("clang-tidy");
    cmd.args(options.to_args()).arg(file);
    if skip_compile_cmd {
        cmd.args(["--", "-std=c++17"]);
    }
    debug!("Tidy command {cmd:?}");

    let output = run_tool(cmd, None, timeout)?;
    Ok(output
        .stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

#[derive(Debug, Serialize)]
struct CompileCommand {
    directory: PathBuf,
    command: String,
    file: PathBuf,
}

/// The compile command printed by a Makefile's `compilecmd` target, if any
/// Makefile in `dir` has one.
pub fn makefile_compile_command(dir: &Path, timeout: Duration) -> Result<Option<String>> {
    let mut makefiles: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("Makefile"))
        })
        .collect();
    makefiles.sort();

    for makefile in makefiles {
        let has_target = fs::read_to_string(&makefile)
            .map(|contents| contents.contains("compilecmd:"))
            .unwrap_or(false);
        if !has_target {
            continue;
        }

        let mut cmd = Command::new("make");
        cmd.arg("-C").arg(dir).arg("compilecmd");
        let output = run_tool(cmd, None, timeout)?;
        return Ok(output
            .stdout
            .lines()
            .find(|line| line.starts_with(COMPILER))
            .map(String::from));
    }

    Ok(None)
}

/// Writes a `compile_commands.json` next to the files so clang-tidy can find
/// it. Each file's Makefile `compilecmd` is used when there is one.
pub fn write_compile_db(files: &[PathBuf], make_timeout: Duration) -> Result<Vec<PathBuf>> {
    let mut by_dir: Vec<(PathBuf, Vec<CompileCommand>)> = Vec::new();

    for file in files {
        let file = fs::canonicalize(file)
            .with_context(|| format!("Failed to resolve {}", file.display()))?;
        let directory = file
            .parent()
            .ok_or(anyhow!("No parent directory for {}", file.display()))?
            .to_path_buf();

        let command = match makefile_compile_command(&directory, make_timeout)? {
            Some(command) => {
                debug!("Using compile command {command}");
                command
            }
            None => {
                debug!("Could not identify compile command; using default.");
                format!("{COMPILER} -Wall -pedantic -std=c++17 -c {}", file.display())
            }
        };

        let entry = CompileCommand {
            directory: directory.clone(),
            command,
            file,
        };
        match by_dir.iter_mut().find(|(dir, _)| *dir == directory) {
            Some((_, entries)) => entries.push(entry),
            None => by_dir.push((directory, vec![entry])),
        }
    }

    let mut written = Vec::with_capacity(by_dir.len());
    for (dir, entries) in by_dir {
        let db = dir.join(COMPILE_DB);
        fs::write(&db, serde_json::to_string_pretty(&entries)?)
            .with_context(|| format!("Failed to write {}", db.display()))?;
        written.push(db);
    }

    Ok(written)
}

/// Builds `file` into `target` with clang++. Any stale `target` is removed
/// first so a failed build never leaves an old binary behind.
pub fn build(file: &Path, target: &Path, timeout: Duration) -> Result<bool> {
    if target.exists() {
        fs::remove_file(target)
            .with_context(|| format!("Failed to remove {}", target.display()))?;
    }

    let mut cmd = Command::new(COMPILER);
    cmd.args(["-Wall", "-pedantic", "-std=c++14", "-o"])
        .arg(target)
        .arg(file);
    let output = run_tool(cmd, None, timeout)?;
    log_tool_output(&output);

    Ok(output.success())
}

/// Runs `make -C dir target`.
pub fn make(dir: &Path, target: &str, timeout: Duration) -> Result<bool> {
    if !dir.join("Makefile").exists() {
        error!("Makefile does not exist in {}", dir.display());
        return Ok(false);
    }

    let mut cmd = Command::new("make");
    cmd.arg("-C").arg(dir).arg(target);
    let output = run_tool(cmd, None, timeout)?;
    if !output.stderr.is_empty() {
        info!("stderr: {}", output.stderr.trim_end());
    }

    Ok(output.success())
}

/// `make spotless` followed by `make all`.
pub fn make_build(dir: &Path, timeout: Duration) -> Result<bool> {
    if !make(dir, "spotless", timeout)? {
        return Ok(false);
    }
    make(dir, "all", timeout)
}

fn log_tool_output(output: &ToolOutput) {
    if !output.stdout.is_empty() {
        info!("stdout: {}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        info!("stderr: {}", output.stderr.trim_end());
    }
}
