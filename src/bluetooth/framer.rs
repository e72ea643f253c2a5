// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Line framing for the scanner byte stream.

use tracing::{debug, warn};

/// Default accumulator limit before a partial line is discarded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// One complete line read from the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    /// Line content with terminators and surrounding whitespace removed.
    pub code: String,
    /// Arrival order within the read loop, starting at 1.
    pub sequence: u64,
}

/// Accumulates raw chunks and cuts them into lines on CR or LF.
///
/// Terminator detection looks only at the newly arrived chunk. When it holds a
/// terminator the whole accumulator is trimmed, emitted and cleared.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_len: usize,
    emitted: u64,
}

impl LineFramer {
    /// Create a new framer with the default line limit.
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a framer that drops partial lines longer than `max_len` bytes.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            max_len: max_len.max(1),
            emitted: 0,
        }
    }

    /// Process one chunk read from the stream.
    ///
    /// Returns `Some(event)` when the chunk completed a non-empty line.
    pub fn push(&mut self, chunk: &[u8]) -> Option<ScanEvent> {
        if chunk.is_empty() {
            return None;
        }

        self.buffer.extend_from_slice(chunk);

        if !chunk.iter().any(|b| is_terminator(*b)) {
            if self.buffer.len() > self.max_len {
                warn!(
                    "Discarding {} bytes without a line terminator",
                    self.buffer.len()
                );
                self.buffer.clear();
            }
            return None;
        }

        let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();

        if line.is_empty() {
            debug!("Terminator without content");
            return None;
        }

        self.emitted += 1;
        Some(ScanEvent {
            code: line,
            sequence: self.emitted,
        })
    }

    /// Discard any partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of lines emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}
