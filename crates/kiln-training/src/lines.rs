//! Splitting raw script output into log lines.
//!
//! Lines end at `\n`, `\r` or `\r\n`, so carriage-return progress bars
//! produce one line per redraw. A line longer than [`MAX_LINE_BYTES`] is
//! flushed as is and the remainder starts a new line.

/// Longest line kept in one piece.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
    after_cr: bool,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `chunk`, appending every completed line to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\n' | b'\r' => {
                    self.after_cr = byte == b'\r';
                    out.push(self.take());
                }
                _ => {
                    self.after_cr = false;
                    self.pending.push(byte);
                    if self.pending.len() >= MAX_LINE_BYTES {
                        out.push(self.take());
                    }
                }
            }
        }
    }

    /// The unterminated tail, if any, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| self.take())
    }

    fn take(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
