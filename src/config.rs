//! Pipeline configuration, read from `.xcarc/pipeline.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default repo-relative config location.
pub const DEFAULT_CONFIG_PATH: &str = ".xcarc/pipeline.toml";

/// Errors from loading the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Pipeline configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pipe xcodebuild output through xcpretty.
    pub use_xcpretty: bool,
    /// Swift package cache eligible for the invalid-state recovery. Unset
    /// disables cache recovery entirely.
    pub swift_packages_cache: Option<PathBuf>,
    /// How many trailing log lines to print on failure before pointing at
    /// the full log artifact.
    pub log_tail_lines: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_xcpretty: true,
            swift_packages_cache: None,
            log_tail_lines: 20,
        }
    }
}

impl PipelineConfig {
    /// Load from `path`. A missing file yields the defaults; a present but
    /// unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
