//! Export invocation and IDEDistribution log-bundle discovery.

use std::fs;
use std::path::PathBuf;

use xcarc_diag::scan;

use crate::command::{
    printable_filtered_cmd, CommandRunner, ExitOutcome, InvokeError, Invocation, ProcessRunner,
};

/// Result of one export run.
#[derive(Debug, Clone)]
pub struct ExportRun {
    /// Combined export log.
    pub log: String,
    pub outcome: ExitOutcome,
    /// Diagnostic bundle directory referenced in the log of a failed export.
    /// Discovery only: the caller decides whether to archive or delete it.
    pub distribution_logs: Option<PathBuf>,
}

impl ExportRun {
    /// Read `IDEDistribution.critical.log` out of a discovered bundle.
    /// Read failure yields None; discovery stays read-only.
    pub fn critical_log(&self) -> Option<String> {
        let dir = self.distribution_logs.as_ref()?;
        fs::read_to_string(dir.join("IDEDistribution.critical.log")).ok()
    }
}

/// Runs the export command. No retry: export failures are caller-visible
/// immediately; only the archive step has a known independently-recoverable
/// failure mode.
pub struct Exporter<R = ProcessRunner> {
    runner: R,
    use_xcpretty: bool,
}

impl Exporter<ProcessRunner> {
    pub fn new(use_xcpretty: bool) -> Self {
        Self::with_runner(ProcessRunner, use_xcpretty)
    }
}

impl<R: CommandRunner> Exporter<R> {
    pub fn with_runner(runner: R, use_xcpretty: bool) -> Self {
        Self {
            runner,
            use_xcpretty,
        }
    }

    /// Run the export command once. On failure, scan the log for the
    /// IDEDistribution bundle reference; absence is a warning, never an
    /// error.
    pub fn run(&self, cmd: &Invocation) -> Result<ExportRun, InvokeError> {
        let printable = if self.use_xcpretty {
            printable_filtered_cmd(cmd)
        } else {
            cmd.printable_cmd()
        };
        eprintln!(
            "[export] [{}] $ {}",
            chrono::Local::now().format("%H:%M:%S"),
            printable
        );

        let output = self.runner.run(cmd, self.use_xcpretty)?;

        let distribution_logs = if output.outcome.is_failed() {
            match scan::find_distribution_logs_path(&output.text) {
                Some(path) => Some(PathBuf::from(path)),
                None => {
                    eprintln!("[export] no IDEDistribution logs referenced in the output");
                    None
                }
            }
        } else {
            None
        };

        Ok(ExportRun {
            log: output.text,
            outcome: output.outcome,
            distribution_logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use std::cell::RefCell;

    struct OneShotRunner {
        output: CommandOutput,
        calls: RefCell<u32>,
    }

    impl CommandRunner for &OneShotRunner {
        fn run(
            &self,
            _cmd: &Invocation,
            _structured_output: bool,
        ) -> Result<CommandOutput, InvokeError> {
            *self.calls.borrow_mut() += 1;
            Ok(self.output.clone())
        }
    }

    fn export_cmd() -> Invocation {
        Invocation::new("xcodebuild", vec!["-exportArchive".to_string()])
    }

    fn runner(text: &str, outcome: ExitOutcome) -> OneShotRunner {
        OneShotRunner {
            output: CommandOutput {
                text: text.to_string(),
                outcome,
            },
            calls: RefCell::new(0),
        }
    }

    const FAILED: ExitOutcome = ExitOutcome::Failed { exit_code: Some(70) };

    #[test]
    fn test_success_skips_log_discovery() {
        // Even with the marker present, a successful export has no bundle to
        // report.
        let r = runner(
            "IDEDistribution: -[IDEDistributionLogging _createLoggingBundleAtPath:]: Created bundle at path '/tmp/logs/xyz'.\n** EXPORT SUCCEEDED **\n",
            ExitOutcome::Success,
        );
        let run = Exporter::with_runner(&r, false).run(&export_cmd()).unwrap();
        assert_eq!(run.outcome, ExitOutcome::Success);
        assert_eq!(run.distribution_logs, None);
        assert_eq!(*r.calls.borrow(), 1);
    }

    #[test]
    fn test_failure_discovers_log_bundle() {
        let r = runner(
            "error: exportArchive failed\nIDEDistribution: -[IDEDistributionLogging _createLoggingBundleAtPath:]: Created bundle at path '/tmp/logs/xyz'.\n",
            FAILED,
        );
        let run = Exporter::with_runner(&r, false).run(&export_cmd()).unwrap();
        assert!(run.outcome.is_failed());
        assert_eq!(run.distribution_logs, Some(PathBuf::from("/tmp/logs/xyz")));
    }

    #[test]
    fn test_failure_without_bundle_reference_is_not_an_error() {
        let r = runner("** EXPORT FAILED **\n", FAILED);
        let run = Exporter::with_runner(&r, false).run(&export_cmd()).unwrap();
        assert!(run.outcome.is_failed());
        assert_eq!(run.distribution_logs, None);
        assert_eq!(*r.calls.borrow(), 1);
    }

    #[test]
    fn test_no_retry_on_failure() {
        let r = runner("** EXPORT FAILED **\n", FAILED);
        let _ = Exporter::with_runner(&r, false).run(&export_cmd()).unwrap();
        assert_eq!(*r.calls.borrow(), 1);
    }

    #[test]
    fn test_critical_log_read() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("IDEDistribution.critical.log"),
            "signing identity mismatch\n",
        )
        .unwrap();

        let run = ExportRun {
            log: String::new(),
            outcome: FAILED,
            distribution_logs: Some(dir.path().to_path_buf()),
        };
        assert_eq!(
            run.critical_log().as_deref(),
            Some("signing identity mismatch\n")
        );
    }

    #[test]
    fn test_critical_log_missing_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let run = ExportRun {
            log: String::new(),
            outcome: FAILED,
            distribution_logs: Some(dir.path().to_path_buf()),
        };
        assert_eq!(run.critical_log(), None);
    }
}
