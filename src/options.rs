use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::primitives::page::DEFAULT_PAGE_SIZE;

/// Smallest supported relation page size.
pub const MIN_PAGE_SIZE: usize = 1024;

/// Largest supported relation page size.
pub const MAX_PAGE_SIZE: usize = 32 * 1024;

/// Longest accepted WAL wait, one day.
pub const MAX_WAL_WAIT_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// Default WAL segment size (16 MiB).
pub const DEFAULT_WAL_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

/// Configuration for a redo environment and its sessions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedoOptions {
    /// Directory holding relation fork files.
    pub data_dir: PathBuf,
    /// Directory holding WAL segment files.
    pub wal_dir: PathBuf,
    /// Relation page size in bytes.
    pub page_size: usize,
    /// WAL page size in bytes.
    pub wal_page_size: usize,
    /// WAL segment size in bytes; a power of two and a multiple of `wal_page_size`.
    pub wal_segment_size: u64,
    /// Pages in the shared buffer pool.
    pub shared_buffers: usize,
    /// Pages in each worker's local buffer cache.
    pub local_buffers: usize,
    /// Verify page checksums when reading from disk.
    pub verify_checksums: bool,
    /// Check page LSNs against the prior-LSN hint of each record.
    pub strict_lsn_check: bool,
    /// Downgrade unresolved invalid pages at end of recovery to warnings.
    pub ignore_invalid_pages: bool,
    /// Upper bound for waiting on WAL to become available.
    pub wal_wait_timeout_ms: u64,
}

impl Default for RedoOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            wal_dir: PathBuf::from("pg_xlog"),
            page_size: DEFAULT_PAGE_SIZE,
            wal_page_size: DEFAULT_PAGE_SIZE,
            wal_segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            shared_buffers: 1024,
            local_buffers: 64,
            verify_checksums: true,
            strict_lsn_check: false,
            ignore_invalid_pages: false,
            wal_wait_timeout_ms: 30_000,
        }
    }
}

/// Errors raised while loading [`RedoOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read redo config {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// OS error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`RedoOptions`].
    #[error("failed to parse redo config {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Parser error.
        source: toml::de::Error,
    },
    /// A value failed validation.
    #[error("invalid redo config value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Constraint it broke.
        reason: &'static str,
    },
}

impl RedoOptions {
    /// Options rooted at `data_dir`, with WAL in `data_dir/pg_xlog`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            wal_dir: data_dir.join("pg_xlog"),
            data_dir,
            ..Self::default()
        }
    }

    /// Parses and validates options from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file. A relative `data_dir` resolves against
    /// the file's parent, a relative `wal_dir` against `data_dir`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut options: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            if options.data_dir.is_relative() {
                options.data_dir = base.join(&options.data_dir);
            }
        }
        if options.wal_dir.is_relative() {
            options.wal_dir = options.data_dir.join(&options.wal_dir);
        }
        options.validate()?;
        Ok(options)
    }

    /// Rejects inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be between 1 KiB and 32 KiB",
            });
        }
        if !self.page_size.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be a power of two",
            });
        }
        if self.wal_page_size == 0 || !self.wal_page_size.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "wal_page_size",
                reason: "must be a non-zero power of two",
            });
        }
        if !self.wal_segment_size.is_power_of_two()
            || self.wal_segment_size % self.wal_page_size as u64 != 0
        {
            return Err(ConfigError::Invalid {
                field: "wal_segment_size",
                reason: "must be a power of two and a multiple of wal_page_size",
            });
        }
        if self.shared_buffers == 0 {
            return Err(ConfigError::Invalid {
                field: "shared_buffers",
                reason: "must be at least one page",
            });
        }
        if self.local_buffers == 0 {
            return Err(ConfigError::Invalid {
                field: "local_buffers",
                reason: "must be at least one page",
            });
        }
        if self.wal_wait_timeout_ms > MAX_WAL_WAIT_TIMEOUT_MS {
            return Err(ConfigError::Invalid {
                field: "wal_wait_timeout_ms",
                reason: "must be at most one day",
            });
        }
        Ok(())
    }

    /// Bound for waiting on WAL availability.
    pub fn wal_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wal_wait_timeout_ms)
    }
}
