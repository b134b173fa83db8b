//! Archive invocation with single-shot Swift package cache recovery.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use xcarc_diag::scan;

use crate::command::{
    printable_filtered_cmd, CommandRunner, ExitOutcome, InvokeError, Invocation, ProcessRunner,
};

/// Errors from running the archive step.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// The invalid cache could not be deleted. Fatal: retrying the archive
    /// against a cache known to be corrupted would fail the same way.
    #[error("failed to remove invalid Swift package cache at {}: {source}", path.display())]
    CacheReset {
        path: PathBuf,
        source: io::Error,
    },
}

/// Result of one archive run: the combined log plus the terminal status.
#[derive(Debug, Clone)]
pub struct ArchiveRun {
    pub log: String,
    pub outcome: ExitOutcome,
}

/// Runs the archive command, recovering once from a corrupted Swift package
/// cache.
pub struct Archiver<R = ProcessRunner> {
    runner: R,
    use_xcpretty: bool,
    swift_packages_cache: Option<PathBuf>,
}

impl Archiver<ProcessRunner> {
    pub fn new(use_xcpretty: bool, swift_packages_cache: Option<PathBuf>) -> Self {
        Self::with_runner(ProcessRunner, use_xcpretty, swift_packages_cache)
    }
}

impl<R: CommandRunner> Archiver<R> {
    pub fn with_runner(
        runner: R,
        use_xcpretty: bool,
        swift_packages_cache: Option<PathBuf>,
    ) -> Self {
        Self {
            runner,
            use_xcpretty,
            swift_packages_cache,
        }
    }

    /// Run the archive command.
    ///
    /// When the run fails, a cache path is configured, and the log carries
    /// the cache-invalidity marker: delete the cache and re-run exactly once,
    /// returning the second result unconditionally. One cache-clear cycle per
    /// call, no matter how often the marker reappears.
    pub fn run(&self, cmd: &Invocation) -> Result<ArchiveRun, ArchiveError> {
        let first = self.run_once(cmd)?;

        if first.outcome.is_failed() {
            if let Some(cache) = &self.swift_packages_cache {
                if scan::swift_package_cache_invalid(&first.log) {
                    eprintln!(
                        "[archive] archive failed, Swift package cache is in an invalid state; clearing {}",
                        cache.display()
                    );
                    match fs::remove_dir_all(cache) {
                        Ok(()) => {}
                        // Already gone counts as cleared.
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(source) => {
                            return Err(ArchiveError::CacheReset {
                                path: cache.clone(),
                                source,
                            })
                        }
                    }
                    return self.run_once(cmd);
                }
            }
        }

        Ok(first)
    }

    fn run_once(&self, cmd: &Invocation) -> Result<ArchiveRun, ArchiveError> {
        let printable = if self.use_xcpretty {
            printable_filtered_cmd(cmd)
        } else {
            cmd.printable_cmd()
        };
        eprintln!(
            "[archive] [{}] $ {}",
            chrono::Local::now().format("%H:%M:%S"),
            printable
        );

        let output = self.runner.run(cmd, self.use_xcpretty)?;
        Ok(ArchiveRun {
            log: output.text,
            outcome: output.outcome,
        })
    }
}
