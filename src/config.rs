//! Sorter configuration.

use std::path::Path;
use std::sync::Arc;

use crate::sort::SortError;
use crate::temp::{StdTempFileProvider, TempResourceProvider};

/// Default presort memory budget: 40 MiB.
pub const DEFAULT_MAX_MEMORY: u64 = 40 * 1024 * 1024;

/// Default number of sorted runs merged at once.
pub const DEFAULT_MERGE_FACTOR: usize = 16;

/// Upper presort memory bound used by the command line sorter.
pub const MAX_PRESORT_MEMORY: u64 = 256 * 1024 * 1024;

/// Lower presort memory bound used by the command line sorter.
pub const MIN_PRESORT_MEMORY: u64 = 10 * 1024 * 1024;

/// Immutable sorter configuration. The `with_*` methods return an adjusted copy and leave `self` untouched,
/// so one configuration can be shared by any number of sorters.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Maximum number of sorted runs read simultaneously by one merge.
    merge_factor: usize,
    /// Budget for the estimated size of records buffered during presorting.
    max_memory: u64,
    /// Sorted run file read/write buffer size.
    io_buffer_size: Option<usize>,
    /// Source of temporary files for sorted runs.
    temp_provider: Arc<dyn TempResourceProvider>,
}

impl SortConfig {
    /// Creates a configuration with default parameters.
    pub fn new() -> Self {
        SortConfig::default()
    }

    pub fn with_merge_factor(&self, merge_factor: usize) -> SortConfig {
        SortConfig {
            merge_factor,
            ..self.clone()
        }
    }

    pub fn with_max_memory(&self, max_memory: u64) -> SortConfig {
        SortConfig {
            max_memory,
            ..self.clone()
        }
    }

    pub fn with_io_buffer_size(&self, buf_size: usize) -> SortConfig {
        SortConfig {
            io_buffer_size: Some(buf_size),
            ..self.clone()
        }
    }

    pub fn with_temp_provider(&self, provider: impl TempResourceProvider + 'static) -> SortConfig {
        SortConfig {
            temp_provider: Arc::new(provider),
            ..self.clone()
        }
    }

    /// Stores sorted runs in `path` using default file naming.
    pub fn with_tmp_dir(&self, path: &Path) -> SortConfig {
        self.with_temp_provider(StdTempFileProvider::new().in_dir(path))
    }

    pub fn merge_factor(&self) -> usize {
        self.merge_factor
    }

    pub fn max_memory(&self) -> u64 {
        self.max_memory
    }

    pub fn io_buffer_size(&self) -> Option<usize> {
        self.io_buffer_size
    }

    pub fn temp_provider(&self) -> &dyn TempResourceProvider {
        self.temp_provider.as_ref()
    }

    pub(crate) fn validate(&self) -> Result<(), SortError> {
        if self.merge_factor < 2 {
            return Err(SortError::InvalidConfig(format!(
                "merge factor must be greater than 1, got {}",
                self.merge_factor
            )));
        }
        if self.io_buffer_size == Some(0) {
            return Err(SortError::InvalidConfig("I/O buffer size must not be zero".to_string()));
        }

        return Ok(());
    }
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            merge_factor: DEFAULT_MERGE_FACTOR,
            max_memory: DEFAULT_MAX_MEMORY,
            io_buffer_size: None,
            temp_provider: Arc::new(StdTempFileProvider::new()),
        }
    }
}
