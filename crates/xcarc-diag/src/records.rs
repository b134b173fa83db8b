//! Error records extracted from xcodebuild output.

use regex_lite::Regex;
use serde::Serialize;

/// One diagnosed failure from a build or export log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ErrorRecord {
    /// A free-text `error: ...` line, kept verbatim.
    Plain { line: String },
    /// An NSError-shaped record with a description and optional suggestion.
    Structured(StructuredError),
}

impl ErrorRecord {
    /// Render the record the way it should be surfaced to a user.
    pub fn message(&self) -> String {
        match self {
            ErrorRecord::Plain { line } => line.clone(),
            ErrorRecord::Structured(e) => e.message(),
        }
    }
}

/// A structured error parsed from an `Error Domain=... Code=... UserInfo={...}`
/// line. Strictly more informative than a plain error line because it can
/// carry an actionable recovery suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredError {
    pub description: String,
    /// Empty when the record carried no recovery suggestion.
    pub suggestion: String,
}

impl StructuredError {
    /// Parse a single log line into a structured error.
    ///
    /// The line must carry all three of the domain, code and user-info
    /// markers; anything less is not a structured record and yields None
    /// (the line is ignored, not downgraded to a plain error). A record
    /// without a readable description also yields None. A missing suggestion
    /// is legal.
    ///
    /// Example input:
    /// `Error Domain=IDEProvisioningErrorDomain Code=9 ""app" requires a
    /// provisioning profile." UserInfo={IDEDistributionIssueSeverity=3,
    /// NSLocalizedDescription="app" requires a provisioning profile.,
    /// NSLocalizedRecoverySuggestion=Add a profile to the
    /// "provisioningProfiles" dictionary in your Export Options property list.}`
    pub fn parse(line: &str) -> Option<StructuredError> {
        if !is_structured_error_line(line) {
            return None;
        }

        let description = find_first_submatch(
            line,
            r"NSLocalizedDescription=(.+?),|NSLocalizedDescription=(.+?)}",
        );
        if description.is_empty() {
            return None;
        }

        let suggestion = find_first_submatch(
            line,
            r"NSLocalizedRecoverySuggestion=(.+?),|NSLocalizedRecoverySuggestion=(.+?)}",
        );

        Some(StructuredError {
            description,
            suggestion,
        })
    }

    /// Render as `description`, or `description + " " + suggestion` when a
    /// suggestion is present.
    pub fn message(&self) -> String {
        if self.suggestion.is_empty() {
            self.description.clone()
        } else {
            format!("{} {}", self.description, self.suggestion)
        }
    }
}

fn is_structured_error_line(line: &str) -> bool {
    line.contains("Error ")
        && line.contains("Domain=")
        && line.contains("Code=")
        && line.contains("UserInfo=")
}

/// First non-empty capture group of the first match, or empty string.
///
/// The patterns above are alternatives: a field either runs up to the next
/// comma inside the UserInfo block, or up to the closing brace.
fn find_first_submatch(line: &str, pattern: &str) -> String {
    let re = Regex::new(pattern).unwrap();
    if let Some(captures) = re.captures(line) {
        for group in captures.iter().skip(1).flatten() {
            if !group.as_str().is_empty() {
                return group.as_str().to_string();
            }
        }
    }
    String::new()
}
