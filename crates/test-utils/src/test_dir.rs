//! Temporary directories holding monitor manifests.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] and knows how to write the JSON
//! manifest format read by the file-based monitor source.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A managed temporary directory for tests.
///
/// The directory is removed when this struct is dropped.
///
/// # Example
///
/// ```
/// use inferadb_ledger_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let path = dir.write_manifest("monitors.json", &[("10.0.0.1", 26379)]);
/// assert!(path.exists());
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Joins a relative path onto the temporary directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Writes a monitor manifest (`{"monitors": [{"host", "port"}, ...]}`)
    /// and returns its path. Rewriting the same name replaces the file.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_manifest(&self, name: &str, monitors: &[(&str, u16)]) -> PathBuf {
        let monitors: Vec<serde_json::Value> = monitors
            .iter()
            .map(|(host, port)| serde_json::json!({ "host": host, "port": port }))
            .collect();
        let body = serde_json::json!({ "monitors": monitors });
        self.write_raw(name, &body.to_string())
    }

    /// Writes arbitrary text and returns the file's path.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_raw(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        std::fs::write(&path, contents).expect("failed to write test file");
        path
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
