//! Structured payload parsing out of combined portal-client output.

use regex_lite::Regex;
use serde::Deserialize;
use thiserror::Error;

/// The structured response embedded in portal-client output.
///
/// The client prints progress and warnings as free text and exactly one
/// brace-delimited JSON line carrying the request result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortalResponse {
    /// Error message reported by the portal, empty on success.
    #[serde(default)]
    pub error: String,
    /// Request-level "please retry" signal from the portal.
    #[serde(default, rename = "retry")]
    pub should_retry: bool,
}

/// Failure to locate the payload line in combined output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadLineError {
    /// No line of the output had the brace-delimited JSON shape.
    #[error("output does not contain a response payload")]
    Missing,
    /// More than one line had the payload shape; the response is ambiguous.
    #[error("output contains {0} response payloads, expected exactly one")]
    Ambiguous(usize),
}

/// Locate the single payload line in combined output.
///
/// Exactly one line matching `^{.*}$` is expected per invocation; zero or
/// several is a format error, never something to retry.
pub fn extract_payload_line(output: &str) -> Result<&str, PayloadLineError> {
    let re = Regex::new(r"^\{.*\}$").unwrap();
    let mut matches = output.lines().filter(|line| re.is_match(line));

    let first = matches.next().ok_or(PayloadLineError::Missing)?;
    let extra = matches.count();
    if extra > 0 {
        return Err(PayloadLineError::Ambiguous(extra + 1));
    }
    Ok(first)
}
