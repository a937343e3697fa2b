//! Subprocess execution utilities.
//!
//! Every external tool (git helpers, configure scripts, make, cmake, lipo)
//! goes through [`ProcessBuilder`]. The exit code is the only success signal;
//! output is captured and attached to the error on failure, or streamed to
//! the terminal when tool output is requested.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::util::errors::NeedyError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes of tool output kept for error reports.
const OUTPUT_TAIL: usize = 8 * 1024;

/// Coarse cancellation flag shared by every process spawned for one
/// top-level operation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Request cancellation. Running children are killed at their next poll.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`NeedyError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(NeedyError::Cancelled.into());
        }
        Ok(())
    }
}

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    env_remove: Vec<String>,
    path_prepend: Vec<PathBuf>,
    cwd: Option<PathBuf>,
    stream_output: bool,
    cancel: Option<CancellationToken>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
            env_remove: Vec::new(),
            path_prepend: Vec::new(),
            cwd: None,
            stream_output: false,
            cancel: None,
        }
    }

    /// Run a shell command line through the platform shell.
    pub fn shell(command: &str) -> Self {
        if cfg!(windows) {
            ProcessBuilder::new("cmd").arg("/C").arg(command)
        } else {
            ProcessBuilder::new("sh").arg("-c").arg(command)
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Remove an environment variable.
    pub fn env_remove(mut self, key: impl AsRef<str>) -> Self {
        self.env_remove.push(key.as_ref().to_string());
        self
    }

    /// Put directories ahead of the inherited `PATH`.
    pub fn path_prepend<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.path_prepend.extend(dirs.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Stream the tool's output to the terminal instead of capturing it.
    pub fn stream_output(mut self, stream: bool) -> Self {
        self.stream_output = stream;
        self
    }

    /// Kill the child if the token is cancelled.
    pub fn cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn build_command(&self) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        for key in &self.env_remove {
            cmd.env_remove(key);
        }

        if !self.path_prepend.is_empty() {
            let mut paths = self.path_prepend.clone();
            if let Some(existing) = std::env::var_os("PATH") {
                paths.extend(std::env::split_paths(&existing));
            }
            let joined = std::env::join_paths(paths).context("invalid entry in PATH")?;
            cmd.env("PATH", joined);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
            cmd.env("PWD", cwd);
        }

        Ok(cmd)
    }

    /// Execute the command and wait for completion.
    pub fn exec(&self) -> Result<Output> {
        if let Some(ref token) = self.cancel {
            token.check()?;
        }

        tracing::debug!("{}", self.display_command());

        let mut cmd = self.build_command()?;
        cmd.stdin(Stdio::null());
        if self.stream_output {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = self.wait(&mut child)?;

        let stdout = stdout.map(join_drain).unwrap_or_default();
        let stderr = stderr.map(join_drain).unwrap_or_default();

        Ok(Output {
            status,
            stdout,
            stderr,
        })
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        let Some(ref token) = self.cancel else {
            return child
                .wait()
                .with_context(|| format!("failed to wait for `{}`", self.program.display()));
        };

        loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to wait for `{}`", self.program.display()))?
            {
                return Ok(status);
            }
            if token.is_cancelled() {
                tracing::debug!("killing `{}`", self.display_command());
                let _ = child.kill();
                let _ = child.wait();
                return Err(NeedyError::Cancelled.into());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Execute and require success.
    pub fn exec_and_check(&self) -> Result<Output> {
        let output = self.exec()?;
        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(NeedyError::ToolInvocationFailure {
                command: self.display_command(),
                code: output.status.code(),
                output: tail(&combined, OUTPUT_TAIL),
            }
            .into());
        }

        if !self.stream_output && !output.stdout.is_empty() {
            tracing::trace!("{}", String::from_utf8_lossy(&output.stdout));
        }

        Ok(output)
    }

    /// Execute, require success, and return trimmed stdout.
    pub fn exec_stdout(&self) -> Result<String> {
        let output = self.clone().stream_output(false).exec_and_check()?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Return the subset of `tools` that cannot be found in PATH.
pub fn missing_tools<'a>(tools: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    tools
        .into_iter()
        .filter(|tool| find_executable(tool).is_none())
        .map(str::to_string)
        .collect()
}
