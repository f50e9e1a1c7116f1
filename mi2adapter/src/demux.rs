/// Line demultiplexer
///
/// GDB output arrives in arbitrary chunks. The demultiplexer holds on to a
/// trailing partial line until its newline shows up, so the parser only
/// ever sees complete records, in arrival order.

pub struct LineDemultiplexer {
    pending: Vec<u8>,
}

impl LineDemultiplexer {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Feed a chunk and collect every line it completes
    ///
    /// Lines are returned without their `\n` / `\r\n` terminator; blank
    /// lines are skipped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut start = 0;

        for (offset, byte) in chunk.iter().enumerate() {
            if *byte != b'\n' {
                continue;
            }
            self.pending.extend_from_slice(&chunk[start..offset]);
            start = offset + 1;
            if let Some(line) = self.take_line() {
                lines.push(line);
            }
        }
        self.pending.extend_from_slice(&chunk[start..]);

        lines
    }

    /// Flush whatever is left once the stream has closed
    pub fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    /// Bytes buffered waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn take_line(&mut self) -> Option<String> {
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

impl Default for LineDemultiplexer {
    fn default() -> Self {
        Self::new()
    }
}
