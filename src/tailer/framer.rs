// SPDX-License-Identifier: Apache-2.0

//! Cuts a byte stream into lines at `\n`, `\r`, and `\r\n` boundaries.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tokio_util::sync::CancellationToken;

use crate::tailer::error::Result;

/// Frames newline-terminated lines out of successive reads of an open file.
///
/// A bare `\r` may either terminate a line on its own or introduce a `\r\n`
/// pair, so the decision is deferred until the following byte. The framer
/// never leaves the file positioned mid-line: after each call the handle is
/// rewound to the first byte past the last terminator crossed, and a partial
/// trailing line is re-read in full on the next call.
pub(crate) struct LineFramer {
    read_buffer: Vec<u8>,
    line_buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new(read_buffer_size: usize) -> Self {
        Self {
            read_buffer: vec![0u8; read_buffer_size],
            line_buffer: Vec::with_capacity(1024),
        }
    }

    /// Read from the file's current position until EOF, invoking `on_line`
    /// with each completed line (terminator excluded) and the offset of the
    /// first byte of the successor line. Returns whether any byte was read.
    pub fn read_lines<F>(
        &mut self,
        file: &mut File,
        cancel: &CancellationToken,
        mut on_line: F,
    ) -> Result<bool>
    where
        F: FnMut(&[u8], u64) -> Result<()>,
    {
        let mut position = file.stream_position()?;
        let mut next_read_position = position;
        self.line_buffer.clear();
        let mut has_cr = false;
        let mut has_data = false;

        while !cancel.is_cancelled() {
            let n = file.read(&mut self.read_buffer)?;
            if n == 0 {
                break;
            }
            has_data = true;

            for i in 0..n {
                let byte = self.read_buffer[i];
                match byte {
                    b'\n' => {
                        has_cr = false;
                        next_read_position = position + i as u64 + 1;
                        on_line(&self.line_buffer, next_read_position)?;
                        self.line_buffer.clear();
                    }
                    b'\r' => {
                        if has_cr {
                            self.line_buffer.push(b'\r');
                        }
                        has_cr = true;
                    }
                    _ => {
                        if has_cr {
                            has_cr = false;
                            // This byte opens the successor line; the
                            // checkpoint lands on it, not past it.
                            next_read_position = position + i as u64;
                            on_line(&self.line_buffer, next_read_position)?;
                            self.line_buffer.clear();
                        }
                        self.line_buffer.push(byte);
                    }
                }
            }

            position = file.stream_position()?;
        }

        file.seek(SeekFrom::Start(next_read_position))?;
        Ok(has_data)
    }
}
