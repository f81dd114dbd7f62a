// SPDX-License-Identifier: Apache-2.0

//! Configuration for the stateful tailer.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between file polls.
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of leading bytes hashed into the file's identity
/// fingerprint.
pub const DEFAULT_FINGERPRINT_BYTES: u64 = 512;

/// Smallest fingerprint prefix that still distinguishes log files usefully.
pub const MIN_FINGERPRINT_BYTES: u64 = 16;

/// Default capacity of the read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 65_536;

/// Where to seat the read position when no checkpoint matches the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPosition {
    /// Read from the beginning of the file.
    #[default]
    Start,
    /// Read only content appended after the file was opened.
    End,
}

impl InitialPosition {
    /// Resolve to a byte offset for an open file.
    pub(crate) fn offset(&self, file: &File) -> io::Result<u64> {
        match self {
            InitialPosition::Start => Ok(0),
            InitialPosition::End => Ok(file.metadata()?.len()),
        }
    }
}

/// Configuration for a [`StatefulTailer`](crate::tailer::StatefulTailer).
///
/// `file` is required; everything else has a working default.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Path of the file to tail.
    pub file: PathBuf,
    /// Interval between file polls.
    pub read_interval: Duration,
    /// Where to start when no checkpoint matches the file.
    pub initial_position: InitialPosition,
    /// Number of leading bytes hashed into the identity fingerprint.
    /// Files shorter than this have no fingerprint and are not
    /// checkpointed until they grow past it.
    pub fingerprint_bytes: u64,
    /// Capacity of the read buffer.
    pub read_buffer_size: usize,
    /// Pause granted to a rotated file before its final drain. When unset,
    /// the drain waits one read interval.
    pub rotate_grace: Option<Duration>,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            read_interval: DEFAULT_READ_INTERVAL,
            initial_position: InitialPosition::default(),
            fingerprint_bytes: DEFAULT_FINGERPRINT_BYTES,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            rotate_grace: None,
        }
    }
}

impl TailerConfig {
    /// Validate the configuration, naming every missing or invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        let mut invalid = Vec::new();

        if self.file.as_os_str().is_empty() {
            missing.push("file");
        }
        if self.read_interval.is_zero() {
            invalid.push("read_interval");
        }
        if self.fingerprint_bytes < MIN_FINGERPRINT_BYTES {
            invalid.push("fingerprint_bytes");
        }
        if self.read_buffer_size == 0 {
            invalid.push("read_buffer_size");
        }
        if self.rotate_grace.is_some_and(|grace| grace.is_zero()) {
            invalid.push("rotate_grace");
        }

        if missing.is_empty() && invalid.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { missing, invalid })
        }
    }
}

/// Construction failure enumerating the offending configuration fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// Required fields that were not provided.
    pub missing: Vec<&'static str>,
    /// Fields whose values are out of range.
    pub invalid: Vec<&'static str>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tailer configuration")?;
        if !self.missing.is_empty() {
            write!(f, "; missing: {}", self.missing.join(", "))?;
        }
        if !self.invalid.is_empty() {
            write!(f, "; invalid: {}", self.invalid.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}
