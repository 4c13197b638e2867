//! File access capability handed to template evaluation.
//!
//! Every redirection and `source` in a template opens files through a
//! [`FileAccess`]. The sandbox always uses [`InertFileAccess`]: writes vanish,
//! reads see an empty file and nothing on disk is created or touched.
//! [`HostFileAccess`] exists for library callers that evaluate trusted
//! templates against a real tree.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::shell::{FileHandle, OpenMode};

/// Opens files on behalf of a running template.
pub trait FileAccess: Send + Sync {
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FileHandle>>;
}

/// Handle that accepts and discards writes and is always at end of input.
#[derive(Debug, Default, Clone, Copy)]
pub struct InertHandle;

impl Read for InertHandle {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for InertHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// File access that never reaches the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct InertFileAccess;

impl FileAccess for InertFileAccess {
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FileHandle>> {
        tracing::trace!("Inert open of {path:?} ({mode:?})");
        Ok(Box::new(InertHandle))
    }
}

/// File access backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFileAccess;

impl FileAccess for HostFileAccess {
    fn open(&self, path: &str, mode: OpenMode) -> io::Result<Box<dyn FileHandle>> {
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write { append: true } => options.append(true).create(true),
            OpenMode::Write { append: false } => options.write(true).create(true).truncate(true),
            OpenMode::ReadWrite => options.read(true).write(true).create(true),
        };
        tracing::debug!("Opening host file {path:?} ({mode:?})");
        Ok(Box::new(options.open(path)?))
    }
}

/// Which [`FileAccess`] an evaluation gets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FileAccessMode {
    #[default]
    Inert,
    Host,
}

impl FileAccessMode {
    #[must_use]
    pub fn access(self) -> Arc<dyn FileAccess> {
        match self {
            FileAccessMode::Inert => Arc::new(InertFileAccess),
            FileAccessMode::Host => Arc::new(HostFileAccess),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_inert_handle_reads_nothing() {
        let mut handle = InertFileAccess.open("/etc/passwd", OpenMode::Read).unwrap();
        let mut text = String::new();
        assert_eq!(handle.read_to_string(&mut text).unwrap(), 0);
        assert!(text.is_empty());
    }

    #[test]
    fn test_inert_writes_leave_no_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("created");
        let target = path.to_string_lossy();

        for mode in [
            OpenMode::Write { append: false },
            OpenMode::Write { append: true },
            OpenMode::ReadWrite,
        ] {
            let mut handle = InertFileAccess.open(&target, mode).unwrap();
            handle.write_all(b"payload").unwrap();
            handle.flush().unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_host_access_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("notes");
        let target = path.to_string_lossy();
        let access = FileAccessMode::Host.access();

        access.open(&target, OpenMode::Write { append: false }).unwrap().write_all(b"a\n").unwrap();
        access.open(&target, OpenMode::Write { append: true }).unwrap().write_all(b"b\n").unwrap();

        let mut text = String::new();
        access.open(&target, OpenMode::Read).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "a\nb\n");
    }
}
