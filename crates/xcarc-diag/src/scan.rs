//! Fixed-marker scanning over raw tool output.
//!
//! The archive invoker, the export invoker, and the portal bridge all branch
//! on "does the captured output contain this marker". Those checks live here
//! as pure functions so the retry/branch logic can be tested without spawning
//! a single process.

use regex_lite::Regex;

/// Substring xcodebuild prints when the resolved Swift package cache is in a
/// corrupted state. A failed archive whose log contains this marker is
/// recoverable by deleting the cache and re-running once.
pub const SWIFT_PACKAGE_CACHE_INVALID: &str = "Could not resolve package dependencies";

/// Substring the Developer Portal returns during a transient outage.
/// A portal call whose output contains this marker is worth retrying.
pub const TRANSIENT_SERVICE_ERROR: &str = "503 Service Temporarily Unavailable";

/// Line pattern xcodebuild prints when `-exportArchive` writes its
/// IDEDistribution diagnostic bundle. The single capture group is the bundle
/// directory path.
const DISTRIBUTION_LOGS_PATTERN: &str =
    r"IDEDistribution: -\[IDEDistributionLogging _createLoggingBundleAtPath:\]: Created bundle at path '(.*)'";

/// Whether archive output indicates a corrupted Swift package cache.
pub fn swift_package_cache_invalid(output: &str) -> bool {
    output.contains(SWIFT_PACKAGE_CACHE_INVALID)
}

/// Whether portal output indicates a transient service outage.
pub fn transient_service_error(output: &str) -> bool {
    !output.is_empty() && output.contains(TRANSIENT_SERVICE_ERROR)
}

/// Find the IDEDistribution logs bundle path referenced in export output.
///
/// Scans line by line and returns the first match; a failed export writes the
/// bundle at most once in practice, later occurrences are ignored. Absence of
/// the marker is not an error, the caller downgrades it to a warning.
pub fn find_distribution_logs_path(output: &str) -> Option<String> {
    let re = Regex::new(DISTRIBUTION_LOGS_PATTERN).unwrap();
    for line in output.lines() {
        if let Some(captures) = re.captures(line) {
            if let Some(path) = captures.get(1) {
                return Some(path.as_str().to_string());
            }
        }
    }
    None
}
