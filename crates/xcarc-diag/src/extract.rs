//! Error-record extraction from captured build/export output.

use crate::records::{ErrorRecord, StructuredError};

/// Extract the failure records from raw xcodebuild output.
///
/// Two passes over the same text:
/// 1. Collect every line starting with `error: ` as a plain record, and every
///    `Error ...` line that parses as a structured record.
/// 2. Select: when the structured count equals the plain count, report only
///    the structured records; otherwise report the plain lines untouched.
///
/// Equal counts is the only evidence that every plain failure also produced a
/// structured counterpart, so substitution is safe only then. Any other ratio
/// (including more structured records than plain lines) keeps the plain set
/// unchanged, because dropping a plain error without a structured counterpart
/// would lose information.
///
/// An empty result is valid: absence of recognizable error lines is not an
/// error.
pub fn extract_errors(output: &str) -> Vec<ErrorRecord> {
    let mut plain = Vec::new();
    let mut structured = Vec::new();

    for line in output.lines() {
        if line.starts_with("error: ") {
            plain.push(ErrorRecord::Plain {
                line: line.to_string(),
            });
        } else if line.starts_with("Error ") {
            if let Some(record) = StructuredError::parse(line) {
                structured.push(record);
            }
        }
    }

    if structured.len() == plain.len() {
        structured.into_iter().map(ErrorRecord::Structured).collect()
    } else {
        plain
    }
}

/// Rendered form of [`extract_errors`], one message per record.
pub fn error_reasons(output: &str) -> Vec<String> {
    extract_errors(output)
        .iter()
        .map(ErrorRecord::message)
        .collect()
}
