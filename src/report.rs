//! Human-facing failure reporting for build/export runs.

use crate::command::ExitOutcome;

/// Describe a failed command for a user, citing the extracted error reasons
/// when the log yields any.
///
/// Returns None for a successful outcome.
pub fn describe_failure(printable_cmd: &str, log: &str, outcome: &ExitOutcome) -> Option<String> {
    let exit_code = match outcome {
        ExitOutcome::Success => return None,
        ExitOutcome::Failed { exit_code } => *exit_code,
    };

    let reasons = xcarc_diag::error_reasons(log);
    Some(match (exit_code, reasons.is_empty()) {
        (Some(code), false) => format!(
            "command failed with exit status {} ({}): {}",
            code,
            printable_cmd,
            reasons.join("\n")
        ),
        (Some(code), true) => {
            format!("command failed with exit status {} ({})", code, printable_cmd)
        }
        (None, _) => format!("executing command failed ({})", printable_cmd),
    })
}

/// Last `n` lines of a log, for the quick on-terminal hint before pointing at
/// the full artifact.
pub fn tail(log: &str, n: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
