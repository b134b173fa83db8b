//! Retrying bridge to the privileged Developer Portal client process.
//!
//! Portal operations (profile and certificate management) are performed by an
//! external bundler-managed client script living in a pre-provisioned runtime
//! directory. The bridge's job is invocation, extraction of the single
//! structured payload line out of mixed human/structured output, and bounded
//! retry of transient failures. Preparing the runtime directory is the
//! caller's concern.

mod client;
mod response;

pub use client::{
    PortalAuth, PortalClient, PortalCommand, PortalError, ProcessPortalRunner, PortalRunner,
    RunOutcome, Sleeper, SystemSleeper, MAX_ATTEMPTS,
};
pub use response::{extract_payload_line, PayloadLineError, PortalResponse};
