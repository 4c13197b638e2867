//! Line-prefixing relay for diagnostics.
//!
//! Many templates are evaluated at once and all of them write diagnostics to
//! the same stream. Every relayed line is tagged with the package name, and
//! whole lines are written under a single lock so output from concurrent
//! evaluations never interleaves inside a line.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Cloneable handle to a writer shared between evaluations.
///
/// Each `write` call holds the lock for the whole buffer.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Shared handle to the process stderr.
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Writer that drops everything.
    pub fn sink() -> Self {
        Self::new(io::sink())
    }
}

impl std::fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedWriter").finish_non_exhaustive()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().map_err(|_| io::Error::other("shared writer poisoned"))?;
        inner.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().map_err(|_| io::Error::other("shared writer poisoned"))?.flush()
    }
}

/// Writer that prepends `prefix` to every line.
///
/// Complete lines are forwarded in one `write` call per chunk. A trailing
/// partial line is held back until more input completes it or
/// [`finish`](Self::finish) terminates it with a newline.
pub struct PrefixWriter<W: Write> {
    prefix: Vec<u8>,
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> PrefixWriter<W> {
    pub fn new(inner: W, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().into_bytes(),
            inner,
            pending: Vec::new(),
        }
    }

    /// Emit any held-back partial line and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.pending.is_empty() {
            let mut line = Vec::with_capacity(self.prefix.len() + self.pending.len() + 1);
            line.extend_from_slice(&self.prefix);
            line.append(&mut self.pending);
            line.push(b'\n');
            self.inner.write_all(&line)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for PrefixWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        let Some(end) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Ok(buf.len());
        };
        let complete: Vec<u8> = self.pending.drain(..=end).collect();
        let mut out = Vec::with_capacity(complete.len() + self.prefix.len() * 4);
        for line in complete.split_inclusive(|&b| b == b'\n') {
            out.extend_from_slice(&self.prefix);
            out.extend_from_slice(line);
        }
        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CaptureBuffer;

    #[test]
    fn test_every_line_prefixed() {
        let mut writer = PrefixWriter::new(Vec::new(), "foo: ");
        writer.write_all(b"one\ntwo\n").unwrap();
        assert_eq!(writer.finish().unwrap(), b"foo: one\nfoo: two\n");
    }

    #[test]
    fn test_partial_line_held_until_complete() {
        let mut writer = PrefixWriter::new(Vec::new(), "foo: ");
        writer.write_all(b"hel").unwrap();
        writer.write_all(b"lo\nwor").unwrap();
        writer.write_all(b"ld").unwrap();
        assert_eq!(writer.finish().unwrap(), b"foo: hello\nfoo: world\n");
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let writer = PrefixWriter::new(Vec::new(), "foo: ");
        assert!(writer.finish().unwrap().is_empty());
    }

    #[test]
    fn test_shared_writer_lines_do_not_interleave() {
        let capture = CaptureBuffer::default();
        let shared = SharedWriter::new(capture.clone());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let mut writer = PrefixWriter::new(shared, format!("pkg{i}: "));
                    for _ in 0..50 {
                        writer.write_all(b"a fairly long diagnostic line\n").unwrap();
                    }
                    writer.finish().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = capture.contents();
        assert_eq!(text.lines().count(), 400);
        for line in text.lines() {
            let (prefix, rest) = line.split_once(": ").unwrap();
            assert!(prefix.starts_with("pkg"));
            assert_eq!(rest, "a fairly long diagnostic line");
        }
    }
}
