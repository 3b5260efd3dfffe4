//! Temporary backing files for sorted runs.

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Default temporary file name prefix.
pub const DEFAULT_PREFIX: &str = "ext-merge-sort-";
/// Default temporary file name suffix.
pub const DEFAULT_SUFFIX: &str = ".tmp";

/// Creates empty temporary files. A returned file is removed when its handle
/// (or the [`tempfile::TempPath`] it is turned into) is dropped.
pub trait TempResourceProvider: Debug + Send + Sync {
    fn provide(&self) -> io::Result<NamedTempFile>;
}

/// Provider backed by the [`tempfile`] crate.
#[derive(Debug, Clone)]
pub struct StdTempFileProvider {
    prefix: String,
    suffix: String,
    dir: Option<PathBuf>,
}

impl StdTempFileProvider {
    /// Creates a provider using the OS temporary directory and default file naming.
    pub fn new() -> Self {
        StdTempFileProvider::with_naming(DEFAULT_PREFIX, DEFAULT_SUFFIX)
    }

    pub fn with_naming(prefix: &str, suffix: &str) -> Self {
        StdTempFileProvider {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            dir: None,
        }
    }

    /// Places temporary files into `dir` instead of the OS temporary directory.
    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        return self;
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

impl Default for StdTempFileProvider {
    fn default() -> Self {
        StdTempFileProvider::new()
    }
}

impl TempResourceProvider for StdTempFileProvider {
    fn provide(&self) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix).suffix(&self.suffix);

        match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{StdTempFileProvider, TempResourceProvider};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_std_provider(tmp_dir: tempfile::TempDir) {
        let provider = StdTempFileProvider::with_naming("run-", ".bin").in_dir(tmp_dir.path());

        let file = provider.provide().unwrap();
        let path = file.path().to_path_buf();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();

        assert_eq!(provider.dir(), Some(tmp_dir.path()));
        assert!(path.starts_with(tmp_dir.path()));
        assert!(name.starts_with("run-") && name.ends_with(".bin"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_default_provider() {
        let provider = StdTempFileProvider::default();
        assert_eq!(provider.dir(), None);

        let file = provider.provide().unwrap();
        let name = file.path().file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("ext-merge-sort-") && name.ends_with(".tmp"));
    }
}
