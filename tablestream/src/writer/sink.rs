use std::fs::File;
use std::io::Write;
use std::path::Path;

use common::{TsError, TsResult};

/// Where the writer's bytes go. Implementations only need ordered
/// delivery; buffering is their own business.
pub trait ByteSink {
    fn write_all(&mut self, data: &[u8]) -> TsResult<()>;

    fn flush(&mut self) -> TsResult<()>;
}

/// Growable in-memory sink, mostly for tests and for piping a finished
/// stream somewhere else.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl ByteSink for MemorySink {
    fn write_all(&mut self, data: &[u8]) -> TsResult<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> TsResult<()> {
        Ok(())
    }
}

const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Buffered sink over any `io::Write`, flushed when the buffer fills and
/// on demand (the writer flushes on end-stream).
#[derive(Debug)]
pub struct BufferedSink<W: Write> {
    out: W,
    buffer: Vec<u8>,
    capacity: usize,
}

impl BufferedSink<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> TsResult<Self> {
        let file = File::create(path).map_err(TsError::from)?;
        Ok(BufferedSink::new(file, DEFAULT_BUFFER_SIZE))
    }
}

impl<W: Write> BufferedSink<W> {
    pub fn new(out: W, capacity: usize) -> Self {
        BufferedSink {
            out,
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn into_inner(mut self) -> TsResult<W> {
        self.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> ByteSink for BufferedSink<W> {
    fn write_all(&mut self, data: &[u8]) -> TsResult<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let avail = self.capacity - self.buffer.len();
            if avail == 0 {
                self.flush()?;
                continue;
            }
            let take = rest.len().min(avail);
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        Ok(())
    }

    fn flush(&mut self) -> TsResult<()> {
        if !self.buffer.is_empty() {
            self.out.write_all(&self.buffer).map_err(TsError::from)?;
            self.buffer.clear();
        }
        self.out.flush().map_err(TsError::from)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn buffered_sink_flushes_on_size() {
        let mut sink = BufferedSink::new(Vec::<u8>::new(), 4);
        sink.write_all(&[1, 2, 3, 4, 5, 6]).unwrap();
        // first four bytes crossed the buffer boundary already
        assert!(sink.out.len() >= 4);
        sink.flush().unwrap();
        assert_eq!(sink.out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn memory_sink_collects() {
        let mut sink = MemorySink::new();
        sink.write_all(b"ab").unwrap();
        sink.write_all(b"cd").unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.as_bytes(), b"abcd");
    }

    #[test]
    fn file_sink_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");

        let mut sink = BufferedSink::create(&path).unwrap();
        sink.write_all(b"stream bytes").unwrap();
        sink.flush().unwrap();
        drop(sink);

        assert_eq!(std::fs::read(&path).unwrap(), b"stream bytes");
    }
}
