//! External engine invocation.
//!
//! The engine is a black box: it takes a command line, writes files into the
//! directory named by its output flag, and exits. Nothing beyond the exit
//! code is reported, so adapters must inspect the output directory
//! themselves.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{PipelineError, PipelineResult};
use crate::obs;

/// Output-directory flag used by the analysis engine.
pub const OUT_DIR_FLAG: &str = "-outDir";
/// Output-directory flag used by the conversion engine.
pub const CONVERSION_OUT_DIR_FLAG: &str = "-oDir";

/// A fully described engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl EngineInvocation {
    /// Start from the launcher program and its fixed prefix arguments.
    pub fn new(program: impl Into<String>, prefix: &[String]) -> Self {
        Self {
            program: program.into(),
            args: prefix.to_vec(),
            working_dir: PathBuf::from("."),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `<flag> <dir>`.
    pub fn out_dir_flag(self, flag: &str, dir: &Path) -> Self {
        self.arg(flag).arg(dir.to_string_lossy())
    }

    /// Append the positional input file; by contract this is the last argument.
    pub fn input(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory following `-outDir` or `-oDir`, if present.
    pub fn out_dir(&self) -> Option<PathBuf> {
        self.args
            .iter()
            .position(|a| a == OUT_DIR_FLAG || a == CONVERSION_OUT_DIR_FLAG)
            .and_then(|i| self.args.get(i + 1))
            .map(PathBuf::from)
    }

    /// The positional input file.
    pub fn input_path(&self) -> Option<PathBuf> {
        self.args.last().map(PathBuf::from)
    }

    /// Human-readable command line, for logs only.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What the engine process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutcome {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl EngineOutcome {
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 0,
        }
    }

    /// Turn a non-zero exit into [`PipelineError::EngineInvocation`].
    ///
    /// A successful exit says nothing about whether the outputs are usable.
    pub fn into_result(self) -> PipelineResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(PipelineError::EngineInvocation {
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Executes engine invocations.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    async fn run(&self, invocation: &EngineInvocation) -> PipelineResult<EngineOutcome>;
}

/// Runs the engine as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl EngineRunner for ProcessRunner {
    async fn run(&self, invocation: &EngineInvocation) -> PipelineResult<EngineOutcome> {
        let start = Instant::now();
        obs::emit_engine_invoked(&invocation.command_line());

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::EngineSpawn {
                program: invocation.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| PipelineError::EngineTimeout {
                    limit_secs: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        obs::emit_engine_exited(exit_code, duration_ms);

        Ok(EngineOutcome {
            exit_code,
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }
}
