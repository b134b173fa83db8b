//! xcarc - Xcode archive/export pipeline
//!
//! This crate drives xcodebuild through an archive step and an export step,
//! classifies failures out of the captured output, and retries the failure
//! modes known to be recoverable. Portal operations go through the retrying
//! bridge in `xcarc-portal`; log diagnostics live in `xcarc-diag`.

pub mod archive;
pub mod command;
pub mod config;
pub mod export;
pub mod report;

pub use archive::{ArchiveError, ArchiveRun, Archiver};
pub use command::{
    CommandOutput, CommandRunner, ExitOutcome, InvokeError, Invocation, ProcessRunner,
};
pub use config::PipelineConfig;
pub use export::{ExportRun, Exporter};
pub use xcarc_diag::{error_reasons, extract_errors, ErrorRecord, StructuredError};
