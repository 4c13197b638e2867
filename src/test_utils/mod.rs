//! Test utilities for xdeps
//!
//! Helpers shared by unit tests and the integration suite:
//!
//! - [`init_test_logging`] - one-time tracing setup that plays well with the
//!   test harness output capture
//! - [`CaptureBuffer`] - cloneable in-memory writer for inspecting what a
//!   sandbox wrote to its diagnostic or output stream
//! - [`TemplateTree`] - a temporary `srcpkgs/` layout with template files
//!
//! # Example
//!
//! ```rust,no_run
//! use xdeps_cli::test_utils::TemplateTree;
//!
//! let tree = TemplateTree::new().unwrap();
//! let path = tree.add("foo", "pkgname=foo\ndepends=\"libc\"\n").unwrap();
//! assert!(path.ends_with("srcpkgs/foo/template"));
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; does nothing when neither
/// is set.
///
/// ```bash
/// RUST_LOG=xdeps_cli=trace cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// In-memory writer whose clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .map_err(|_| io::Error::other("capture buffer poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Temporary `srcpkgs/<name>/template` tree.
///
/// The directory is removed when the tree is dropped.
pub struct TemplateTree {
    root: TempDir,
}

impl TemplateTree {
    pub fn new() -> Result<Self> {
        let root = TempDir::new().context("failed to create temporary template tree")?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Write `srcpkgs/<name>/template` and return its path.
    pub fn add(&self, name: &str, source: &str) -> Result<PathBuf> {
        let dir = self.root.path().join("srcpkgs").join(name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join("template");
        std::fs::write(&path, source).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
