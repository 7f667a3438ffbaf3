//! Terminal-style presentation: a local buffer that replaces itself on
//! screen frames instead of appending forever.

use pocketclaude_core::output::{is_screen_frame, scrub_control_sequences};

/// Mirror of the remote terminal's visible content.
#[derive(Debug, Default)]
pub struct TerminalScreen {
    buffer: String,
}

impl TerminalScreen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an output chunk. A chunk that begins a fresh screen frame
    /// replaces the buffer; anything else appends.
    pub fn push(&mut self, chunk: &str) {
        if is_screen_frame(chunk.as_bytes()) {
            self.buffer.clear();
        }
        self.buffer.push_str(chunk);
    }

    /// The raw buffered bytes, escape sequences included.
    pub fn raw(&self) -> &str {
        &self.buffer
    }

    /// The buffer with control sequences stripped, for plain-text display.
    pub fn rendered(&self) -> String {
        scrub_control_sequences(&self.buffer)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
