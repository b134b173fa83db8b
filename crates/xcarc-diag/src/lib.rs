//! Log diagnostics for xcodebuild output.
//!
//! Everything in this crate is pure text analysis over immutable strings:
//! fixed-marker detection (`scan`) and error-record extraction (`extract`).
//! No process-spawning code lives here, so every branch is testable on
//! fixture text alone.

mod extract;
mod records;
pub mod scan;

pub use extract::{error_reasons, extract_errors};
pub use records::{ErrorRecord, StructuredError};
