use std::io::{self, Write};

/// Byte-capped sink for child process output.
///
/// Stores at most `remaining` bytes; once the budget is spent, writes fail
/// with `WriteZero` so callers can observe the truncation. A `None` budget
/// is unlimited. The supervisor keeps draining the pipe either way, so a
/// runaway child fills neither memory nor its stdout buffer.
#[derive(Debug)]
pub struct LimitedWriter {
    buf: Vec<u8>,
    remaining: Option<u64>,
}

impl LimitedWriter {
    pub fn new(limit: u64) -> Self {
        Self {
            buf: Vec::new(),
            remaining: if limit == 0 { None } else { Some(limit) },
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Write for LimitedWriter {
    fn write(&mut self, chunk: &[u8]) -> io::Result<usize> {
        let Some(remaining) = self.remaining else {
            self.buf.extend_from_slice(chunk);
            return Ok(chunk.len());
        };

        if remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "output limit reached"));
        }

        let take = chunk.len().min(remaining as usize);
        self.buf.extend_from_slice(&chunk[..take]);
        self.remaining = Some(remaining - take as u64);
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
