#![forbid(unsafe_code)]

use std::io::{self, Write};

/// Bounded-memory writer that groups whole records into chunks.
///
/// Records accumulate in a buffer of fixed capacity, which is written out
/// whenever the next record would overflow it. A record is never split
/// across two chunks unless it alone exceeds the capacity, in which case it
/// is written straight through.
#[derive(Debug)]
pub struct ChunkedWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    capacity: usize,
    chunks: u64,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            buf: Vec::with_capacity(capacity),
            capacity,
            chunks: 0,
        }
    }

    /// Append one record made of `parts`.
    pub fn write_record(&mut self, parts: &[&[u8]]) -> io::Result<()> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        if self.buf.len() + len > self.capacity {
            self.flush_chunk()?;
        }
        if len > self.capacity {
            for part in parts {
                self.inner.write_all(part)?;
            }
            self.chunks += 1;
            return Ok(());
        }
        for part in parts {
            self.buf.extend_from_slice(part);
        }
        Ok(())
    }

    /// Number of chunks handed to the inner writer so far.
    pub fn chunks_written(&self) -> u64 {
        self.chunks
    }

    /// Write out the last partial chunk and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_chunk()?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn flush_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.inner.write_all(&self.buf)?;
        self.buf.clear();
        self.chunks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Records the size of every `write` call.
    #[derive(Default)]
    struct Recorder {
        data: Vec<u8>,
        writes: Vec<usize>,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            self.writes.push(buf.len());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn chunks_never_exceed_capacity() {
        let mut writer = ChunkedWriter::new(Recorder::default(), 10);
        for record in ["abcd", "efgh", "ijkl", "mn"] {
            writer.write_record(&[record.as_bytes(), b"\n"]).unwrap();
        }
        assert_eq!(writer.chunks_written(), 1);
        let recorder = writer.finish().unwrap();

        assert_eq!(recorder.data, b"abcd\nefgh\nijkl\nmn\n".to_vec());
        assert_eq!(recorder.writes, vec![10, 8]);
    }

    #[test]
    fn oversized_record_is_written_through() {
        let mut writer = ChunkedWriter::new(Recorder::default(), 4);
        writer.write_record(&[b"ab", b"\n"]).unwrap();
        writer.write_record(&[b"long record", b"\n"]).unwrap();
        writer.write_record(&[b"c", b"\n"]).unwrap();
        let recorder = writer.finish().unwrap();

        assert_eq!(recorder.data, b"ab\nlong record\nc\n".to_vec());
        assert_eq!(recorder.writes, vec![3, 11, 1, 2]);
    }

    #[test]
    fn empty_writer_writes_nothing() {
        let writer = ChunkedWriter::new(Recorder::default(), 16);
        let recorder = writer.finish().unwrap();
        assert!(recorder.writes.is_empty());
    }

    #[test]
    fn inner_errors_propagate() {
        let mut writer = ChunkedWriter::new(Broken, 4);
        writer.write_record(&[b"abc"]).unwrap();
        assert!(writer.write_record(&[b"def"]).is_err());
    }
}
