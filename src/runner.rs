use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use regex::bytes::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{debug, error, info};
use wait_timeout::ChildExt;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

// Only the tail of unmatched output is searched, so a chatty program cannot
// grow the buffer without bound.
const SEARCH_WINDOW: usize = 64 * 1024;
const CHANNEL_CHUNKS: usize = 16;

/// One expected output pattern, optionally answered with a line of input.
#[derive(Debug, Clone)]
pub struct Step {
    pub expect: Regex,
    pub send: Option<String>,
}

impl Step {
    /// Patterns are always matched case-insensitively.
    pub fn expect(pattern: &str) -> Result<Self, regex::Error> {
        let expect = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { expect, send: None })
    }

    pub fn then_send(mut self, line: impl Into<String>) -> Self {
        self.send = Some(line.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub steps: Vec<Step>,
    pub timeout: Duration,
}

impl TestCase {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    TimedOut(Duration),
    EndOfOutput,
}

impl fmt::Display for Miss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Miss::TimedOut(limit) => write!(f, "timed out after {limit:?}"),
            Miss::EndOfOutput => write!(f, "process closed its output first"),
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifyFailure {
    #[error("could not start process {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("expected output not found at step {step} (/{pattern}/): {cause}")]
    OutputNotFound {
        step: usize,
        pattern: String,
        cause: Miss,
        seen: String,
    },
    #[error("could not send input at step {step}: {source}")]
    Input {
        step: usize,
        #[source]
        source: io::Error,
    },
    #[error("process kept its output open for {0:?} after the last expected output")]
    OutputNotClosed(Duration),
    #[error("process did not exit within {0:?}")]
    ExitTimeout(Duration),
    #[error("process exited with code {0}")]
    NonZeroExit(i32),
    #[error("process terminated by {}", signal_name(.0))]
    Signaled(i32),
    #[error("could not wait for process: {0}")]
    Wait(#[source] io::Error),
}

#[derive(Debug)]
pub struct Verification {
    pub case: String,
    pub outcome: Result<(), VerifyFailure>,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn diagnostic(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }
}

/// The executable under test, plus any arguments it should be started with.
#[derive(Debug, Clone)]
pub struct Verifier {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Verifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Runs `case` once against the program. The child is killed and reaped
    /// before this returns, whatever the outcome.
    pub fn verify(&self, case: &TestCase) -> Verification {
        let outcome = self.drive(case);
        if let Err(VerifyFailure::OutputNotFound { seen, .. }) = &outcome {
            debug!("unmatched output: {seen:?}");
        }

        Verification {
            case: case.name.clone(),
            outcome,
        }
    }

    fn drive(&self, case: &TestCase) -> Result<(), VerifyFailure> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| VerifyFailure::Spawn {
                path: self.program.clone(),
                source,
            })?;
        let mut guard = ChildGuard {
            child,
            reaped: false,
        };
        let mut output = OutputStream::attach(&mut guard.child);
        let mut stdin = guard.child.stdin.take();

        for (index, step) in case.steps.iter().enumerate() {
            let number = index + 1;
            if let Err(cause) = output.expect(&step.expect, case.timeout) {
                return Err(VerifyFailure::OutputNotFound {
                    step: number,
                    pattern: step.expect.as_str().to_string(),
                    cause,
                    seen: output.pending(),
                });
            }

            if let Some(line) = &step.send {
                debug!("step {number}: sending {line:?}");
                send_line(&mut stdin, line)
                    .map_err(|source| VerifyFailure::Input { step: number, source })?;
            }
        }

        // No more input will come; programs reading to EOF can finish.
        drop(stdin);

        output
            .expect_eof(case.timeout)
            .map_err(|_| VerifyFailure::OutputNotClosed(case.timeout))?;

        let status = guard.wait(case.timeout)?;
        exit_outcome(status)
    }
}

/// Runs each case in order, stopping at the first one that fails.
pub fn run_cases(verifier: &Verifier, cases: &[TestCase]) -> Vec<Verification> {
    let mut results = Vec::with_capacity(cases.len());

    for (index, case) in cases.iter().enumerate() {
        info!("Test {} - {}", index + 1, case.name);
        let result = verifier.verify(case);
        let passed = result.passed();
        if let Err(e) = &result.outcome {
            error!("{e}");
        }
        results.push(result);

        if !passed {
            error!("Did not receive expected response. Halting test.");
            break;
        }
    }

    results
}

struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn wait(&mut self, timeout: Duration) -> Result<ExitStatus, VerifyFailure> {
        match self.child.wait_timeout(timeout).map_err(VerifyFailure::Wait)? {
            Some(status) => {
                self.reaped = true;
                Ok(status)
            }
            None => Err(VerifyFailure::ExitTimeout(timeout)),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// stdout and stderr of the child merged into one byte stream.
struct OutputStream {
    rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    closed: bool,
}

impl OutputStream {
    fn attach(child: &mut Child) -> Self {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_CHUNKS);
        if let Some(stdout) = child.stdout.take() {
            pump(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump(stderr, tx);
        }

        Self {
            rx,
            buffer: Vec::new(),
            closed: false,
        }
    }

    /// Waits until `pattern` shows up in the unconsumed output, then consumes
    /// everything up to the end of the match.
    fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<(), Miss> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = pattern.find(&self.buffer) {
                let end = found.end();
                self.buffer.drain(..end);
                return Ok(());
            }
            self.fill(deadline, timeout, true)?;
        }
    }

    fn expect_eof(&mut self, timeout: Duration) -> Result<(), Miss> {
        let deadline = Instant::now() + timeout;
        while !self.closed {
            self.fill(deadline, timeout, false)?;
        }
        Ok(())
    }

    /// Receives one chunk of output. With `keep` unset the chunk is dropped,
    /// which is all waiting for end of output needs.
    fn fill(&mut self, deadline: Instant, timeout: Duration, keep: bool) -> Result<(), Miss> {
        if self.closed {
            return Err(Miss::EndOfOutput);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Miss::TimedOut(timeout));
        }

        match self.rx.recv_timeout(deadline - now) {
            Ok(chunk) => {
                if keep {
                    self.buffer.extend_from_slice(&chunk);
                    if self.buffer.len() > SEARCH_WINDOW {
                        let excess = self.buffer.len() - SEARCH_WINDOW;
                        self.buffer.drain(..excess);
                    }
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(Miss::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Ok(())
            }
        }
    }

    fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

fn pump<R>(mut pipe: R, tx: SyncSender<Vec<u8>>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

fn send_line(stdin: &mut Option<ChildStdin>, line: &str) -> io::Result<()> {
    let pipe = stdin
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin is not open"))?;
    pipe.write_all(line.as_bytes())?;
    pipe.write_all(b"\n")?;
    pipe.flush()
}

fn exit_outcome(status: ExitStatus) -> Result<(), VerifyFailure> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(VerifyFailure::NonZeroExit(code));
    }

    match terminating_signal(&status) {
        Some(signal) => Err(VerifyFailure::Signaled(signal)),
        None => Err(VerifyFailure::NonZeroExit(-1)),
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn terminating_signal(status: &ExitStatus) -> Option<i32> {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        }

        fn signal_name(signal: &i32) -> String {
            let name = match *signal {
                libc::SIGABRT => "SIGABRT",
                libc::SIGFPE => "SIGFPE",
                libc::SIGSEGV => "SIGSEGV",
                libc::SIGBUS => "SIGBUS",
                libc::SIGKILL => "SIGKILL",
                libc::SIGTERM => "SIGTERM",
                libc::SIGUSR2 => "SIGUSR2",
                other => return format!("signal {other}"),
            };
            name.to_string()
        }
    } else {
        fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
            None
        }

        fn signal_name(signal: &i32) -> String {
            format!("signal {signal}")
        }
    }
}
