use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use tracing::{trace, warn};

/// Snapshot of the on-disk attributes of the tailed path.
///
/// `newer` records whether the file was modified strictly after the
/// caller-supplied last-checked timestamp. Immutable once constructed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Attributes {
    length: u64,
    last_modified_ms: u64,
    newer: bool,
}

impl Attributes {
    /// Read a fresh snapshot of `path`.
    pub fn from_path(path: &Path, last_checked_ms: Option<u64>) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let last_modified_ms = system_time_ms(metadata.modified()?);
        trace!(
            file = %path.display(),
            last_modified_ms,
            size = metadata.len(),
            "file attributes"
        );

        Ok(Self {
            length: metadata.len(),
            last_modified_ms,
            newer: last_checked_ms.is_some_and(|checked| last_modified_ms > checked),
        })
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_newer(&self) -> bool {
        self.newer
    }
}

/// Modification time of `path` in milliseconds since the epoch, or 0 when
/// the path cannot be inspected.
pub(crate) fn mtime_ms(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map(system_time_ms)
        .unwrap_or(0)
}

fn system_time_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Lowercase hex MD5 digest of the first `hash_size` bytes of `file`.
///
/// Returns `None` when `hash_size` is zero or the file holds fewer than
/// `hash_size` bytes, including the case where the file is truncated
/// concurrently with the read. The file's position is restored before
/// returning.
pub(crate) fn prefix_hash(file: &mut File, hash_size: u64) -> io::Result<Option<String>> {
    if hash_size == 0 {
        return Ok(None);
    }

    let old_position = file.stream_position()?;
    file.seek(SeekFrom::Start(0))?;

    let len = file.metadata()?.len();
    if len < hash_size {
        file.seek(SeekFrom::Start(old_position))?;
        trace!(hash_size, len, "file too short to compute prefix hash");
        return Ok(None);
    }

    let mut buf = vec![0u8; hash_size as usize];
    let mut total = 0usize;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            // Shrank underneath us between the length check and the read.
            warn!(total, hash_size, "unexpected end of file while hashing prefix");
            file.seek(SeekFrom::Start(old_position))?;
            return Ok(None);
        }
        total += n;
    }

    file.seek(SeekFrom::Start(old_position))?;

    let mut hasher = Md5::new();
    hasher.update(&buf);
    let hash = format!("{:x}", hasher.finalize());
    trace!(%hash, hash_size, "computed prefix hash");
    Ok(Some(hash))
}
