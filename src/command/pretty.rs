//! xcpretty output filter.
//!
//! Wraps an invocation and pipes its combined output through `xcpretty` for
//! cleaner progress text. Failure-transparent: a non-zero exit from either
//! process yields a failed outcome, with the underlying command's status
//! taking precedence.

use std::io::{BufRead, BufReader, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};

use super::{CommandOutput, ExitOutcome, InvokeError, Invocation};

/// The filter program. Expected on PATH; installation is the caller's
/// concern.
pub const FILTER_PROGRAM: &str = "xcpretty";

/// Printable form of a filtered invocation.
pub fn printable_filtered_cmd(cmd: &Invocation) -> String {
    format!("set -o pipefail && {} | {}", cmd.printable_cmd(), FILTER_PROGRAM)
}

/// Run `cmd` with both output streams piped through `xcpretty`, capturing the
/// filter's combined output.
pub fn run_filtered(cmd: &Invocation) -> Result<CommandOutput, InvokeError> {
    let mut inner_command = Command::new(cmd.program());
    inner_command
        .args(cmd.args())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cmd.working_dir() {
        inner_command.current_dir(dir);
    }

    let mut inner = inner_command.spawn().map_err(|source| InvokeError::Spawn {
        program: cmd.program().to_string(),
        source,
    })?;

    let mut filter = Command::new(FILTER_PROGRAM)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| InvokeError::Spawn {
            program: FILTER_PROGRAM.to_string(),
            source,
        })?;

    // Both of the inner process's streams feed the filter's stdin.
    let filter_stdin: Arc<Mutex<Option<ChildStdin>>> = Arc::new(Mutex::new(filter.stdin.take()));
    let feed_stdout = feed_filter(inner.stdout.take(), Arc::clone(&filter_stdin));
    let feed_stderr = feed_filter(inner.stderr.take(), Arc::clone(&filter_stdin));

    let buffer = Arc::new(Mutex::new(String::new()));
    let capture_stdout = capture(filter.stdout.take(), Arc::clone(&buffer));
    let capture_stderr = capture(filter.stderr.take(), Arc::clone(&buffer));

    let inner_status = inner.wait()?;
    let _ = feed_stdout.join();
    let _ = feed_stderr.join();

    // Close the filter's stdin so it sees EOF and exits.
    if let Ok(mut guard) = filter_stdin.lock() {
        guard.take();
    }

    let filter_status = filter.wait()?;
    let _ = capture_stdout.join();
    let _ = capture_stderr.join();

    let text = match buffer.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => String::new(),
    };

    let outcome = if !inner_status.success() {
        ExitOutcome::Failed {
            exit_code: inner_status.code(),
        }
    } else if !filter_status.success() {
        ExitOutcome::Failed {
            exit_code: filter_status.code(),
        }
    } else {
        ExitOutcome::Success
    };

    Ok(CommandOutput { text, outcome })
}

fn feed_filter<P: std::io::Read + Send + 'static>(
    pipe: Option<P>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Some(pipe) = pipe {
            let reader = BufReader::new(pipe);
            for line in reader.lines().map_while(Result::ok) {
                if let Ok(mut guard) = stdin.lock() {
                    if let Some(w) = guard.as_mut() {
                        if writeln!(w, "{}", line).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    })
}

fn capture<P: std::io::Read + Send + 'static>(
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
