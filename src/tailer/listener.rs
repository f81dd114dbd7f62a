// SPDX-License-Identifier: Apache-2.0

use tokio_util::sync::CancellationToken;
use tower::BoxError;

use crate::tailer::error::Error;

/// Handle for interacting with a running tailer from another thread.
///
/// Cloning is cheap; all clones refer to the same tailer.
#[derive(Debug, Clone)]
pub struct TailerHandle {
    cancel: CancellationToken,
}

impl TailerHandle {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Ask the tailer to stop. Observed at the next loop check or inside
    /// the current trigger wait.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the tailer has not yet been asked to stop.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Sink for lines and lifecycle events produced by a tailer.
///
/// All callbacks run on the tailer's own thread, strictly in file order;
/// implementations never see concurrent calls. Lines from before a
/// rotation are always delivered before [`file_rotated`], which in turn
/// precedes any line from the replacement file.
///
/// [`file_rotated`]: TailerListener::file_rotated
pub trait TailerListener: Send {
    /// Called once while the tailer is constructed.
    fn initialize(&mut self, _tailer: &TailerHandle) {}

    /// One call per completed line, terminator excluded. Bytes are passed
    /// through unmodified; decode them as UTF-8 (or anything else) here.
    /// Returning an error stops the tailer.
    fn handle_line(&mut self, line: &[u8]) -> Result<(), BoxError>;

    /// The tailed path could not be opened because it does not exist.
    fn file_not_found(&mut self) {}

    /// The file at the tailed path was replaced. Emitted after the old
    /// file is drained and before the replacement is opened.
    fn file_rotated(&mut self) {}

    /// The tailer hit an unrecoverable error and is shutting down.
    fn handle_error(&mut self, error: &Error);
}
