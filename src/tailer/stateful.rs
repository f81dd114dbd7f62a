// SPDX-License-Identifier: Apache-2.0

//! The stateful tailer: file loop, read loop, and rotation detection.
//!
//! The tailer follows one file by name. Each poll it compares a fresh
//! attribute snapshot of the path against the file handle it holds and
//! decides between reading more lines, waiting, or concluding that the
//! path now names a different file (rotation). Progress is checkpointed
//! into a [`PositionStore`] under a fingerprint of the file's leading
//! bytes, so a restarted process resumes where the previous one stopped.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::tailer::attributes::{self, Attributes};
use crate::tailer::config::{ConfigError, InitialPosition, TailerConfig};
use crate::tailer::error::{Error, Result};
use crate::tailer::framer::LineFramer;
use crate::tailer::listener::{TailerHandle, TailerListener};
use crate::tailer::position::PositionStore;
use crate::tailer::trigger::{sleep_observing, TimerTrigger, Trigger, Wait};

/// Three-way result of comparing the held file's prefix hash with the
/// prefix hash of whatever is at the path now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashComparison {
    Equal,
    Differs,
    Undecided,
}

/// A file tailer that survives rotations and process restarts.
///
/// Run it on a dedicated thread with [`run`](StatefulTailer::run); stop it
/// from anywhere through a [`TailerHandle`]. Lines reach the listener in
/// strict file order, with a [`file_rotated`] notification separating the
/// old file's lines from the replacement's.
///
/// [`file_rotated`]: TailerListener::file_rotated
pub struct StatefulTailer<S, L> {
    path: PathBuf,
    position_store: S,
    listener: L,
    trigger: Box<dyn Trigger>,
    cancel: CancellationToken,
    framer: LineFramer,
    /// Identity fingerprint of the currently open file, once it is long
    /// enough to have one. Cleared on rotation.
    hash: Option<String>,
    fingerprint_bytes: u64,
    initial_position: InitialPosition,
    rotate_grace: Option<Duration>,
}

impl<S, L> StatefulTailer<S, L>
where
    S: PositionStore,
    L: TailerListener,
{
    /// Build a tailer polled by the default fixed-interval timer.
    ///
    /// Construction reports a [`ConfigError`]; everything after
    /// construction reports through the listener.
    pub fn new(
        config: TailerConfig,
        position_store: S,
        listener: L,
    ) -> std::result::Result<Self, ConfigError> {
        let cancel = CancellationToken::new();
        let trigger = TimerTrigger::new(config.read_interval, cancel.clone());
        Self::with_trigger(config, position_store, listener, Box::new(trigger), cancel)
    }

    /// Build a tailer polled by a caller-supplied trigger.
    ///
    /// The trigger should observe `cancel` so that a stop request cuts its
    /// waits short; the read loops check the token between waits either
    /// way.
    pub fn with_trigger(
        config: TailerConfig,
        position_store: S,
        mut listener: L,
        trigger: Box<dyn Trigger>,
        cancel: CancellationToken,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        listener.initialize(&TailerHandle::new(cancel.clone()));

        Ok(Self {
            path: config.file,
            position_store,
            listener,
            trigger,
            cancel,
            framer: LineFramer::new(config.read_buffer_size),
            hash: None,
            fingerprint_bytes: config.fingerprint_bytes,
            initial_position: config.initial_position,
            rotate_grace: config.rotate_grace,
        })
    }

    /// Handle for stopping the tailer from another thread.
    pub fn handle(&self) -> TailerHandle {
        TailerHandle::new(self.cancel.clone())
    }

    /// Ask the tailer to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Run until stopped or until a fatal error has been delivered to the
    /// listener. Consumes the tailer; resources are released on the way
    /// out.
    pub fn run(mut self) {
        if let Err(error) = self.file_loop() {
            self.listener.handle_error(&error);
            self.cancel.cancel();
        }
        self.hash = None;
        if let Err(error) = self.position_store.close() {
            warn!(%error, "failed to close position store");
        }
    }

    /// Outer state machine: open the file by name, seat the read position,
    /// hand off to the read loop, and start over after each rotation.
    fn file_loop(&mut self) -> Result<()> {
        let mut next_initial_position = self.initial_position;

        while self.is_running() {
            let mut file = match File::open(&self.path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.listener.file_not_found();
                    if self.trigger.wait() == Wait::Cancelled {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            trace!(file = %self.path.display(), "opened file");

            // Seat the read position: the checkpoint when the fingerprint
            // is known, the initial position otherwise. Reopens later in
            // the session always begin at the start.
            let mut position = next_initial_position.offset(&file)?;
            next_initial_position = InitialPosition::Start;

            self.hash = attributes::prefix_hash(&mut file, self.fingerprint_bytes)?;
            if let Some(hash) = &self.hash {
                if let Some(checkpointed) = self.position_store.get_position(hash)? {
                    position = checkpointed;
                }
            }
            trace!(file = %self.path.display(), position, "starting tail");
            file.seek(SeekFrom::Start(position))?;

            self.read_loop(&mut file)?;

            // Per-file state resets before the next open.
            self.hash = None;
        }

        Ok(())
    }

    /// Inner loop: poll the path, decide between reading, waiting, and
    /// rotating. Returns when a rotation hands control back to the file
    /// loop or the tailer is stopped.
    fn read_loop(&mut self, file: &mut File) -> Result<()> {
        let mut last_checked_ms: Option<u64> = None;
        // Prefix hash captured from the held file while it is still too
        // short for a full identity fingerprint.
        let mut reader_prefix_hash: Option<String> = None;
        let mut reader_prefix_len: u64 = 0;

        while self.is_running() {
            let attrs = match Attributes::from_path(&self.path, last_checked_ms) {
                Ok(attrs) => attrs,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(
                        file = %self.path.display(),
                        "rotation detected: attributes unavailable"
                    );
                    return self.rotate(Some(file));
                }
                Err(e) => return Err(e.into()),
            };

            let position = file.stream_position()?;
            let size = file.metadata()?.len();

            if attrs.length() < position {
                // The path's file is shorter than our progress; whatever
                // is on disk cannot be the file we hold.
                debug!(
                    file = %self.path.display(),
                    length = attrs.length(),
                    position,
                    size,
                    "rotation detected: length below read position"
                );
                return self.rotate(Some(file));
            } else if size > position {
                // Unread data in the file we hold.
                if !self.read_lines(file)? {
                    // The length belonged to a longer replacement file;
                    // the held one has nothing left to give.
                    debug!(
                        file = %self.path.display(),
                        length = attrs.length(),
                        position,
                        "rotation detected: no data despite length"
                    );
                    return self.rotate(None);
                }
                last_checked_ms = Some(attributes::mtime_ms(&self.path));
            } else if attrs.is_newer() {
                // Same length as our position but touched since the last
                // read: replaced by a file of identical size. Periodic
                // writers that rewrite the same content each cycle hit
                // this.
                debug!(
                    file = %self.path.display(),
                    length = attrs.length(),
                    position,
                    "rotation detected: same length but newer"
                );
                return self.rotate(None);
            } else {
                // Size and timestamp both agree, which is common given how
                // coarse modification timestamps are on many filesystems.
                // Hash the path's prefix against ours to tell "unchanged"
                // apart from "replaced with equal length".
                match self.compare_by_hash(reader_prefix_hash.as_deref(), reader_prefix_len) {
                    HashComparison::Differs => {
                        debug!(file = %self.path.display(), "rotation detected: prefix hash changed");
                        return self.rotate(None);
                    }
                    HashComparison::Equal | HashComparison::Undecided => {
                        // Not enough signal either way; wait for the size
                        // and timestamp to diverge.
                    }
                }
            }

            if self.hash.is_none() {
                reader_prefix_len = size.min(self.fingerprint_bytes);
                reader_prefix_hash = attributes::prefix_hash(file, reader_prefix_len)?;
            }

            if self.trigger.wait() == Wait::Cancelled {
                return Ok(());
            }

            self.update_checkpoint(file.stream_position()?)?;
        }

        Ok(())
    }

    /// Read available lines from the current position, adopting the
    /// identity fingerprint as soon as the file is long enough. Returns
    /// whether any byte was read.
    fn read_lines(&mut self, file: &mut File) -> Result<bool> {
        if self.hash.is_none() && file.metadata()?.len() >= self.fingerprint_bytes {
            self.hash = attributes::prefix_hash(file, self.fingerprint_bytes)?;
        }

        let framer = &mut self.framer;
        let listener = &mut self.listener;
        let store = &self.position_store;
        let hash = self.hash.as_deref();

        framer.read_lines(file, &self.cancel, |line, next_read_position| {
            trace!(bytes = line.len(), next_read_position, "handling line");
            listener.handle_line(line).map_err(Error::Listener)?;
            if let Some(fingerprint) = hash {
                store.set_position(fingerprint, next_read_position)?;
            }
            Ok(())
        })
    }

    /// Compare the prefix of whatever is at the path against the held
    /// file's identity: the full fingerprint when we have one, the
    /// shorter captured prefix hash otherwise.
    fn compare_by_hash(
        &self,
        reader_prefix_hash: Option<&str>,
        reader_prefix_len: u64,
    ) -> HashComparison {
        let applied_len = if self.hash.is_some() {
            self.fingerprint_bytes
        } else {
            reader_prefix_len
        };
        let expected = self.hash.as_deref().or(reader_prefix_hash);

        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(_) => return HashComparison::Undecided,
        };
        let on_disk = match attributes::prefix_hash(&mut file, applied_len) {
            Ok(hash) => hash,
            Err(_) => return HashComparison::Undecided,
        };
        trace!(
            expected = ?expected,
            on_disk = ?on_disk,
            size = applied_len,
            "comparing prefix hashes"
        );

        match (expected, on_disk.as_deref()) {
            (Some(ours), Some(theirs)) if ours == theirs => HashComparison::Equal,
            (Some(_), Some(_)) => HashComparison::Differs,
            _ => HashComparison::Undecided,
        }
    }

    /// Hand the path back to the file loop after a detected rotation. A
    /// still-held reader gets one grace period to absorb late writes and a
    /// final drain before the listener is told.
    fn rotate(&mut self, reader: Option<&mut File>) -> Result<()> {
        if let Some(file) = reader {
            let grace = match self.rotate_grace {
                Some(duration) => sleep_observing(&self.cancel, duration),
                None => self.trigger.wait(),
            };
            if grace == Wait::Cancelled {
                return Ok(());
            }
            self.read_lines(file)?;
        }

        self.listener.file_rotated();
        Ok(())
    }

    fn update_checkpoint(&self, position: u64) -> Result<()> {
        if let Some(fingerprint) = &self.hash {
            self.position_store.set_position(fingerprint, position)?;
        }
        Ok(())
    }
}
