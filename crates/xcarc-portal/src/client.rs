//! Portal client invocation with bounded retry.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

use xcarc_diag::scan;

use crate::response::{extract_payload_line, PayloadLineError, PortalResponse};

/// Upper bound on portal-client attempts per request.
pub const MAX_ATTEMPTS: u32 = 3;

/// Linear backoff step; attempt `i` sleeps `i * BACKOFF_STEP` before the next.
const BACKOFF_STEP: Duration = Duration::from_secs(15);

/// Apple ID credentials for the portal client.
///
/// These are appended to the argv after the printable form is computed, so no
/// secret ever reaches a log line. The session token is base64-encoded before
/// transmission.
#[derive(Debug, Clone)]
pub struct PortalAuth {
    pub username: String,
    pub password: String,
    pub session: String,
    pub team_id: String,
}

/// One fully-built portal-client invocation.
#[derive(Debug, Clone)]
pub struct PortalCommand {
    /// Program to spawn (the bundler entry point).
    pub program: String,
    /// Full argv, including credentials. Never log this.
    pub args: Vec<String>,
    /// Credential-free rendering of the script arguments, safe for logs.
    pub printable_args: String,
    /// Pre-provisioned runtime directory the client runs in.
    pub work_dir: PathBuf,
}

/// Outcome of one portal-client invocation.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Process ran to completion with exit status 0.
    Completed { output: String },
    /// Process exited with a non-zero status, or was killed by a signal
    /// (in which case no exit code is available).
    Failed {
        output: String,
        exit_code: Option<i32>,
    },
    /// Process could not be executed at all.
    NotStarted { error: String },
}

/// Errors from portal operations.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The client process exited non-zero. The message embeds the output,
    /// never the argv, which carries credentials.
    #[error("portal client exited with status {status}, output: {output}")]
    CommandFailed { status: i32, output: String },

    #[error("portal client was terminated before exiting, output: {output}")]
    Terminated { output: String },

    #[error("portal client failed to run: {0}")]
    NotStarted(String),

    #[error("output does not contain a response payload: {output}")]
    MissingPayload { output: String },

    #[error("output contains more than one response payload")]
    AmbiguousPayload,

    #[error("failed to parse response payload: {source} ({payload})")]
    MalformedPayload {
        payload: String,
        source: serde_json::Error,
    },

    /// The portal reported a request failure that retrying will not fix.
    #[error("Developer Portal request failed: {0}")]
    Portal(String),

    /// The portal asked for the request to be retried. Internal to the retry
    /// loop; surfaces as [`PortalError::RetryExhausted`] once the attempt
    /// bound is hit.
    #[error("Developer Portal requested a retry: {0}")]
    RetryRequested(String),

    /// The portal kept asking for a retry through the last allowed attempt.
    #[error("Developer Portal state is inconsistent, retries exhausted: {0}")]
    RetryExhausted(String),
}

impl PortalError {
    /// Whether this attempt may be retried on its own evidence. Failures with
    /// an available process status are never retried: the retry signal can
    /// only be trusted from a structured response. Other failures still get a
    /// second chance when the raw output carries the transient-service marker
    /// (see the caller).
    fn retryable(&self) -> bool {
        matches!(self, PortalError::RetryRequested(_))
    }

    fn process_level(&self) -> bool {
        matches!(
            self,
            PortalError::CommandFailed { .. }
                | PortalError::Terminated { .. }
                | PortalError::NotStarted(_)
        )
    }
}

/// Seam between the retry loop and process spawning.
pub trait PortalRunner {
    /// Run the client once, returning its trimmed combined output.
    fn run(&mut self, cmd: &PortalCommand) -> RunOutcome;
}

/// Real runner: spawns the client in its runtime directory and captures
/// combined output.
pub struct ProcessPortalRunner;

impl PortalRunner for ProcessPortalRunner {
    fn run(&mut self, cmd: &PortalCommand) -> RunOutcome {
        let output = match Command::new(&cmd.program)
            .args(&cmd.args)
            .current_dir(&cmd.work_dir)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                return RunOutcome::NotStarted {
                    error: e.to_string(),
                }
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        let text = text.trim().to_string();

        if output.status.success() {
            RunOutcome::Completed { output: text }
        } else {
            RunOutcome::Failed {
                output: text,
                exit_code: output.status.code(),
            }
        }
    }
}

/// Injectable sleep, so backoff is testable without real waiting.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Real sleeper backed by `std::thread::sleep`.
pub struct SystemSleeper;

impl Sleeper for SystemSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The portal bridge: builds client invocations and retries transient
/// failures with linear backoff.
pub struct PortalClient<R, S = SystemSleeper> {
    work_dir: PathBuf,
    auth: PortalAuth,
    runner: R,
    sleeper: S,
}

impl<R: PortalRunner> PortalClient<R, SystemSleeper> {
    /// Create a client over a pre-provisioned runtime directory.
    pub fn new(work_dir: PathBuf, auth: PortalAuth, runner: R) -> Self {
        Self::with_sleeper(work_dir, auth, runner, SystemSleeper)
    }
}

impl<R: PortalRunner, S: Sleeper> PortalClient<R, S> {
    /// Create a client with an injected sleeper (tests).
    pub fn with_sleeper(work_dir: PathBuf, auth: PortalAuth, runner: R, sleeper: S) -> Self {
        Self {
            work_dir,
            auth,
            runner,
            sleeper,
        }
    }

    /// Run one portal operation, retrying up to [`MAX_ATTEMPTS`] times.
    ///
    /// Returns the matched payload line on success. Two triggers share the
    /// single attempt counter and the `attempt * 15s` backoff schedule: the
    /// structured `retry` flag in the parsed payload, and the
    /// transient-service marker in the raw output of any non-process-level
    /// failure. Everything else returns immediately.
    pub fn run(&mut self, subcommand: &str, opts: &[String]) -> Result<String, PortalError> {
        let cmd = self.build_command(subcommand, opts);

        let mut attempt = 1u32;
        loop {
            eprintln!("[portal] $ {}", cmd.printable_args);

            let outcome = self.runner.run(&cmd);
            let (raw, result) = evaluate_outcome(outcome);
            let err = match result {
                Ok(payload) => return Ok(payload),
                Err(err) => err,
            };

            let retryable = err.retryable()
                || (!err.process_level() && scan::transient_service_error(&raw));
            if !retryable {
                return Err(err);
            }
            if attempt == MAX_ATTEMPTS {
                return Err(match err {
                    PortalError::RetryRequested(reason) => PortalError::RetryExhausted(reason),
                    other => other,
                });
            }

            eprintln!(
                "[portal] command failed with a retryable error, retrying ({}. attempt)...",
                attempt
            );
            self.sleeper.sleep(BACKOFF_STEP * attempt);
            attempt += 1;
        }
    }

    /// Build the client invocation. Credentials go after the printable form
    /// is rendered; the session token is base64-encoded.
    fn build_command(&self, subcommand: &str, opts: &[String]) -> PortalCommand {
        let mut script_args = vec![
            "main.rb".to_string(),
            "--subcommand".to_string(),
            subcommand.to_string(),
        ];
        script_args.extend(opts.iter().cloned());

        let printable_args = script_args.join(" ");

        script_args.extend([
            "--username".to_string(),
            self.auth.username.clone(),
            "--password".to_string(),
            self.auth.password.clone(),
            "--session".to_string(),
            BASE64.encode(self.auth.session.as_bytes()),
            "--team-id".to_string(),
            self.auth.team_id.clone(),
        ]);

        let mut args = vec!["exec".to_string(), "ruby".to_string()];
        args.extend(script_args);

        PortalCommand {
            program: "bundle".to_string(),
            args,
            printable_args,
            work_dir: self.work_dir.clone(),
        }
    }
}

/// Turn one run outcome into either the payload line or a typed error,
/// keeping the raw output available for the transient-marker check.
fn evaluate_outcome(outcome: RunOutcome) -> (String, Result<String, PortalError>) {
    match outcome {
        RunOutcome::NotStarted { error } => (String::new(), Err(PortalError::NotStarted(error))),
        RunOutcome::Failed { output, exit_code } => {
            let err = match exit_code {
                Some(status) => PortalError::CommandFailed {
                    status,
                    output: output.clone(),
                },
                None => PortalError::Terminated {
                    output: output.clone(),
                },
            };
            (output, Err(err))
        }
        RunOutcome::Completed { output } => {
            let result = parse_response(&output);
            (output, result)
        }
    }
}

/// Extract and interpret the structured payload from successful output.
fn parse_response(output: &str) -> Result<String, PortalError> {
    let payload = match extract_payload_line(output) {
        Ok(payload) => payload,
        Err(PayloadLineError::Missing) => {
            return Err(PortalError::MissingPayload {
                output: output.to_string(),
            })
        }
        Err(PayloadLineError::Ambiguous(_)) => return Err(PortalError::AmbiguousPayload),
    };

    let response: PortalResponse =
        serde_json::from_str(payload).map_err(|source| PortalError::MalformedPayload {
            payload: payload.to_string(),
            source,
        })?;

    if response.should_retry {
        return Err(PortalError::RetryRequested(response.error));
    }
    if !response.error.is_empty() {
        return Err(PortalError::Portal(response.error));
    }

    Ok(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct RecordingSleeper {
        slept: Rc<RefCell<Vec<Duration>>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedRunner {
        outcomes: Rc<RefCell<VecDeque<RunOutcome>>>,
        calls: Rc<RefCell<u32>>,
    }

    impl ScriptedRunner {
        fn new(outcomes: Vec<RunOutcome>) -> Self {
            Self {
                outcomes: Rc::new(RefCell::new(outcomes.into())),
                calls: Rc::new(RefCell::new(0)),
            }
        }

        fn call_count(&self) -> u32 {
            *self.calls.borrow()
        }
    }

    impl PortalRunner for ScriptedRunner {
        fn run(&mut self, _cmd: &PortalCommand) -> RunOutcome {
            *self.calls.borrow_mut() += 1;
            self.outcomes
                .borrow_mut()
                .pop_front()
                .expect("scripted runner ran out of outcomes")
        }
    }

    fn test_auth() -> PortalAuth {
        PortalAuth {
            username: "dev@example.com".to_string(),
            password: "hunter2".to_string(),
            session: "raw-session-cookie".to_string(),
            team_id: "TEAM123".to_string(),
        }
    }

    fn client(
        outcomes: Vec<RunOutcome>,
    ) -> (
        PortalClient<ScriptedRunner, RecordingSleeper>,
        ScriptedRunner,
        RecordingSleeper,
    ) {
        let runner = ScriptedRunner::new(outcomes);
        let sleeper = RecordingSleeper::default();
        let client = PortalClient::with_sleeper(
            PathBuf::from("/tmp/portal-runtime"),
            test_auth(),
            runner.clone(),
            sleeper.clone(),
        );
        (client, runner, sleeper)
    }

    fn completed(output: &str) -> RunOutcome {
        RunOutcome::Completed {
            output: output.to_string(),
        }
    }

    #[test]
    fn test_success_first_attempt() {
        let (mut client, runner, sleeper) = client(vec![completed(
            "Fetching profiles\n{\"error\":\"\",\"retry\":false}",
        )]);
        let payload = client.run("list_profiles", &[]).unwrap();
        assert_eq!(payload, "{\"error\":\"\",\"retry\":false}");
        assert_eq!(runner.call_count(), 1);
        assert!(sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn test_retry_requested_then_success_with_linear_backoff() {
        let (mut client, runner, sleeper) = client(vec![
            completed("{\"error\":\"x\",\"retry\":true}"),
            completed("{\"error\":\"x\",\"retry\":true}"),
            completed("{\"error\":\"\",\"retry\":false}"),
        ]);
        let payload = client.run("create_profile", &[]).unwrap();
        assert_eq!(payload, "{\"error\":\"\",\"retry\":false}");
        assert_eq!(runner.call_count(), 3);
        assert_eq!(
            *sleeper.slept.borrow(),
            vec![Duration::from_secs(15), Duration::from_secs(30)]
        );
    }

    #[test]
    fn test_retry_requested_exhausted_wraps_portal_error() {
        let (mut client, runner, _sleeper) = client(vec![
            completed("{\"error\":\"x\",\"retry\":true}"),
            completed("{\"error\":\"x\",\"retry\":true}"),
            completed("{\"error\":\"x\",\"retry\":true}"),
        ]);
        let err = client.run("create_profile", &[]).unwrap_err();
        assert!(matches!(err, PortalError::RetryExhausted(ref reason) if reason == "x"));
        assert_eq!(runner.call_count(), 3);
    }

    #[test]
    fn test_missing_payload_is_format_error_without_retry() {
        let (mut client, runner, sleeper) =
            client(vec![completed("no structured response in here")]);
        let err = client.run("list_certificates", &[]).unwrap_err();
        assert!(matches!(err, PortalError::MissingPayload { .. }));
        assert_eq!(runner.call_count(), 1);
        assert!(sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn test_ambiguous_payload_is_format_error() {
        let (mut client, _runner, _sleeper) =
            client(vec![completed("{\"error\":\"\"}\n{\"error\":\"\"}")]);
        let err = client.run("list_certificates", &[]).unwrap_err();
        assert!(matches!(err, PortalError::AmbiguousPayload));
    }

    #[test]
    fn test_portal_error_not_retried() {
        let (mut client, runner, _sleeper) = client(vec![completed(
            "{\"error\":\"no such team\",\"retry\":false}",
        )]);
        let err = client.run("list_devices", &[]).unwrap_err();
        assert!(matches!(err, PortalError::Portal(ref msg) if msg == "no such team"));
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn test_transient_marker_triggers_retry_on_missing_payload() {
        let (mut client, runner, sleeper) = client(vec![
            completed("upstream said: 503 Service Temporarily Unavailable"),
            completed("upstream said: 503 Service Temporarily Unavailable"),
            completed("{\"error\":\"\",\"retry\":false}"),
        ]);
        let payload = client.run("list_profiles", &[]).unwrap();
        assert_eq!(payload, "{\"error\":\"\",\"retry\":false}");
        assert_eq!(runner.call_count(), 3);
        assert_eq!(
            *sleeper.slept.borrow(),
            vec![Duration::from_secs(15), Duration::from_secs(30)]
        );
    }

    #[test]
    fn test_transient_marker_shares_attempt_counter() {
        let (mut client, runner, _sleeper) = client(vec![
            completed("503 Service Temporarily Unavailable"),
            completed("{\"error\":\"x\",\"retry\":true}"),
            completed("503 Service Temporarily Unavailable"),
        ]);
        let err = client.run("list_profiles", &[]).unwrap_err();
        // Third attempt failed with the marker path, not the retry flag.
        assert!(matches!(err, PortalError::MissingPayload { .. }));
        assert_eq!(runner.call_count(), 3);
    }

    #[test]
    fn test_exit_status_failure_never_retried() {
        let (mut client, runner, sleeper) = client(vec![RunOutcome::Failed {
            output: "boom: 503 Service Temporarily Unavailable".to_string(),
            exit_code: Some(1),
        }]);
        let err = client.run("list_profiles", &[]).unwrap_err();
        assert!(matches!(err, PortalError::CommandFailed { status: 1, .. }));
        assert_eq!(runner.call_count(), 1);
        assert!(sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn test_spawn_failure_never_retried() {
        let (mut client, runner, _sleeper) = client(vec![RunOutcome::NotStarted {
            error: "No such file or directory".to_string(),
        }]);
        let err = client.run("list_profiles", &[]).unwrap_err();
        assert!(matches!(err, PortalError::NotStarted(_)));
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn test_command_failure_message_omits_credentials() {
        let (mut client, _runner, _sleeper) = client(vec![RunOutcome::Failed {
            output: "authentication rejected".to_string(),
            exit_code: Some(2),
        }]);
        let err = client.run("list_profiles", &[]).unwrap_err();
        let rendered = err.to_string();
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("raw-session-cookie"));
        assert!(rendered.contains("authentication rejected"));
    }

    #[test]
    fn test_build_command_shape_and_secret_handling() {
        let (client, _runner, _sleeper) = client(vec![]);
        let cmd = client.build_command("create_profile", &["--bundle-id".to_string(), "com.example.app".to_string()]);

        assert_eq!(cmd.program, "bundle");
        assert_eq!(cmd.args[..3], ["exec", "ruby", "main.rb"]);
        assert_eq!(
            cmd.printable_args,
            "main.rb --subcommand create_profile --bundle-id com.example.app"
        );
        assert!(!cmd.printable_args.contains("hunter2"));

        // Session token travels base64-encoded, never raw.
        let session_index = cmd.args.iter().position(|a| a == "--session").unwrap();
        assert_eq!(cmd.args[session_index + 1], BASE64.encode("raw-session-cookie"));
        assert!(!cmd.args.contains(&"raw-session-cookie".to_string()));
    }

    #[test]
    fn test_malformed_payload_is_non_retryable() {
        let (mut client, runner, _sleeper) =
            client(vec![completed("{\"error\": not json}")]);
        let err = client.run("list_profiles", &[]).unwrap_err();
        assert!(matches!(err, PortalError::MalformedPayload { .. }));
        assert_eq!(runner.call_count(), 1);
    }
}
