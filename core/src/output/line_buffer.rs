use std::collections::VecDeque;

/// Bounded buffer of the most recent complete output lines.
///
/// Lines are defined by `\n` splits of the raw byte stream; bytes after the
/// last `\n` are carried forward until the line completes. When the buffer
/// is full the oldest line is evicted.
#[derive(Debug)]
pub struct LineRingBuffer {
    lines: VecDeque<String>,
    partial: Vec<u8>,
    capacity: usize,
}

impl LineRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            partial: Vec::new(),
            capacity,
        }
    }

    /// Feed a raw output chunk, completing lines on `\n`.
    pub fn push_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            if byte == b'\n' {
                let mut line = String::from_utf8_lossy(&self.partial).into_owned();
                if line.ends_with('\r') {
                    line.pop();
                }
                self.partial.clear();
                if self.lines.len() == self.capacity {
                    self.lines.pop_front();
                }
                self.lines.push_back(line);
            } else {
                self.partial.push(byte);
            }
        }
    }

    /// Snapshot the buffered lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
