//! Chunk -> line splitting with carry-over of partial lines

/// Splits a byte stream delivered in arbitrary chunks into lines.
///
/// A line cut by a chunk boundary is buffered and completed by the next
/// chunk, so every line is emitted exactly once.
#[derive(Debug, Default)]
pub struct LineSplitter {
    remainder: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, calling `emit` for every completed line
    /// (without the line terminator).
    pub fn push(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8])) {
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(pos);
            if self.remainder.is_empty() {
                emit(trim_cr(line));
            } else {
                self.remainder.extend_from_slice(line);
                emit(trim_cr(&self.remainder));
                self.remainder.clear();
            }
            rest = &tail[1..];
        }

        self.remainder.extend_from_slice(rest);
    }

    /// End of stream: a final line without terminator is still a line
    pub fn finish(self, mut emit: impl FnMut(&[u8])) {
        if !self.remainder.is_empty() {
            emit(trim_cr(&self.remainder));
        }
    }

    /// Bytes of an incomplete line waiting for the next chunk
    pub fn pending(&self) -> usize {
        self.remainder.len()
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}
