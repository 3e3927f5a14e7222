//! Execution configuration.
//!
//! Everything a computation needs to know besides the plan itself. Values
//! are fixed when the computation is prepared.

use crate::backend::{get_backend, Backend};

/// Knobs for building and running a computation.
///
/// # Example
/// ```
/// use stencil_engine::backend::Backend;
/// use stencil_engine::config::ExecConfig;
///
/// let cfg = ExecConfig::default()
///     .with_backend(Backend::Host)
///     .with_block_size(4, 4)
///     .with_checked(true);
/// assert_eq!(cfg.block_size, (4, 4));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Backend selected at build time.
    pub backend: Backend,
    /// Block tile size along (i, j).
    pub block_size: (usize, usize),
    /// Number of worker threads; `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Run the blocks of one group concurrently.
    pub parallel_blocks: bool,
    /// Report out-of-range and extent violations as errors instead of panicking.
    pub checked: bool,
    /// Track which memory side was written last and reject stale reads.
    pub track_sync: bool,
    /// Record which execution unit wrote every field element.
    pub record_writes: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            backend: get_backend(),
            block_size: (8, 8),
            threads: None,
            parallel_blocks: true,
            checked: cfg!(debug_assertions),
            track_sync: false,
            record_writes: false,
        }
    }
}

impl ExecConfig {
    /// Sets the backend.
    #[must_use]
    pub const fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the (i, j) block size.
    #[must_use]
    pub const fn with_block_size(mut self, bi: usize, bj: usize) -> Self {
        self.block_size = (bi, bj);
        self
    }

    /// Uses a dedicated pool of `n` worker threads.
    #[must_use]
    pub const fn with_threads(mut self, n: usize) -> Self {
        self.threads = Some(n);
        self
    }

    /// Enables or disables concurrent block execution.
    #[must_use]
    pub const fn with_parallel_blocks(mut self, on: bool) -> Self {
        self.parallel_blocks = on;
        self
    }

    /// Enables or disables checked resolution.
    #[must_use]
    pub const fn with_checked(mut self, on: bool) -> Self {
        self.checked = on;
        self
    }

    /// Enables or disables host/device staleness tracking.
    #[must_use]
    pub const fn with_sync_tracking(mut self, on: bool) -> Self {
        self.track_sync = on;
        self
    }

    /// Enables or disables the write log.
    #[must_use]
    pub const fn with_write_log(mut self, on: bool) -> Self {
        self.record_writes = on;
        self
    }
}
