//! External command invocation with combined-output capture.
//!
//! An [`Invocation`] is immutable once constructed: program, arguments and
//! working directory. Executing one merges stdout and stderr line-by-line
//! into a single buffer, because every downstream consumer (marker scanning,
//! error extraction, log persistence) works on the combined text.

mod pretty;

pub use pretty::{printable_filtered_cmd, run_filtered, FILTER_PROGRAM};

use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors from spawning or supervising an external command.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: io::Error,
    },

    #[error("I/O error while running command: {0}")]
    Io(#[from] io::Error),
}

/// Terminal status of a finished command.
///
/// A non-zero exit is data, not an `Err`: the invokers need the captured
/// output of a failed run to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit; `exit_code` is None when the process was killed by a
    /// signal.
    Failed { exit_code: Option<i32> },
}

impl ExitOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ExitOutcome::Failed { .. })
    }
}

/// Captured result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Combined stdout/stderr text.
    pub text: String,
    pub outcome: ExitOutcome,
}

/// An external command plus its working directory and argument list.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current_dir: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.current_dir.as_ref()
    }

    /// Human-printable form for logging. Arguments containing whitespace are
    /// quoted. Purely cosmetic, not shell-safe quoting.
    pub fn printable_cmd(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            if arg.chars().any(char::is_whitespace) {
                parts.push(format!("\"{}\"", arg));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }

    /// Run the command, capturing combined stdout/stderr.
    pub fn execute(&self) -> Result<CommandOutput, InvokeError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| InvokeError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let buffer = Arc::new(Mutex::new(String::new()));
        let stdout_handle = pump_lines(child.stdout.take(), Arc::clone(&buffer));
        let stderr_handle = pump_lines(child.stderr.take(), Arc::clone(&buffer));

        let status = child.wait()?;
        let _ = stdout_handle.join();
        let _ = stderr_handle.join();

        let text = match buffer.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => String::new(),
        };

        let outcome = if status.success() {
            ExitOutcome::Success
        } else {
            ExitOutcome::Failed {
                exit_code: status.code(),
            }
        };

        Ok(CommandOutput { text, outcome })
    }
}

/// Stream lines from a child pipe into the shared buffer.
fn pump_lines<P: io::Read + Send + 'static>(
    pipe: Option<P>,
    buffer: Arc<Mutex<String>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Some(pipe) = pipe {
            let reader = BufReader::new(pipe);
            for line in reader.lines().map_while(Result::ok) {
                if let Ok(mut buf) = buffer.lock() {
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }
        }
    })
}

/// Seam between the invokers and process spawning. Tests inject scripted
/// runners; production uses [`ProcessRunner`].
pub trait CommandRunner {
    /// Run the invocation once. With `structured_output` the command is piped
    /// through the xcpretty filter and the filter's failure is
    /// indistinguishable from the command's own.
    fn run(&self, cmd: &Invocation, structured_output: bool)
        -> Result<CommandOutput, InvokeError>;
}

/// Real runner backed by process spawning.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        cmd: &Invocation,
        structured_output: bool,
    ) -> Result<CommandOutput, InvokeError> {
        if structured_output {
            run_filtered(cmd)
        } else {
            cmd.execute()
        }
    }
}
