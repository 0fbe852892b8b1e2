//! Filesystem abstractions used for report and scanner output.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Abstraction over filesystem writes for testability.
#[cfg_attr(test, mockall::automock)]
pub trait FileSystem {
    /// Create or truncate `path` and write `contents`.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    /// Append `contents` to an existing file.
    fn append(&self, path: &Path, contents: &[u8]) -> Result<()>;
    /// Remove `path` if it exists, then create it as an empty directory.
    fn reset_dir(&self, path: &Path) -> Result<()>;
}

/// Default filesystem implementation backed by `std::fs`.
#[derive(Debug, Default, Clone)]
pub struct StdFileSystem;

impl StdFileSystem {
    /// Create a new standard filesystem adapter.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for StdFileSystem {
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(contents)?;
        Ok(())
    }

    fn reset_dir(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        std::fs::create_dir_all(path)?;
        Ok(())
    }
}
