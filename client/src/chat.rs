//! Chat-style presentation: buffer output, scrub it, and emit messages
//! sized for chat transports.

use std::time::Duration;

use pocketclaude_core::output::{chunk_text, scrub_control_sequences, OutputCoalescer};

/// Byte threshold that forces a flush.
pub const FLUSH_BYTES: usize = 8192;

/// How long output may sit buffered before the adapter should call
/// [`ChatBuffer::flush`].
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum characters per emitted message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Buffers PTY output into chat messages: flush on 8 KiB or on the
/// caller's 500 ms timer, scrub control sequences, chunk at 4096 chars.
#[derive(Debug)]
pub struct ChatBuffer {
    coalescer: OutputCoalescer,
}

impl Default for ChatBuffer {
    fn default() -> Self {
        Self {
            coalescer: OutputCoalescer::new(FLUSH_BYTES),
        }
    }
}

impl ChatBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an output chunk. Returns ready messages when the byte
    /// threshold tripped, empty otherwise.
    pub fn push(&mut self, data: &str) -> Vec<String> {
        if self.coalescer.push(data) {
            self.flush()
        } else {
            Vec::new()
        }
    }

    /// Drain everything buffered into ready messages. Called by the
    /// adapter's flush timer.
    pub fn flush(&mut self) -> Vec<String> {
        let Some(raw) = self.coalescer.flush() else {
            return Vec::new();
        };
        let clean = scrub_control_sequences(&raw);
        if clean.trim().is_empty() {
            return Vec::new();
        }
        chunk_text(&clean, MAX_MESSAGE_CHARS)
    }

    pub fn pending_len(&self) -> usize {
        self.coalescer.pending_len()
    }
}
