//! Engine configuration (spec.md §6).

use std::path::PathBuf;

/// Tunables for a single [`crate::engine::Engine`] instance.
///
/// There is no config file format or environment variable parsing in scope —
/// construct this directly or via [`Default::default`] and override fields.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of frames in the buffer pool. Affects memory footprint and
    /// eviction frequency.
    pub buffer_pool_size: usize,

    /// Max rows per page. Affects index density.
    pub page_capacity: usize,

    /// B+Tree minimum degree. Affects tree fanout.
    pub bplustree_t: usize,

    /// Maximum wait for a row lock before `LOCK_TIMEOUT`.
    pub lock_timeout_ms: u64,

    /// Disk Store root. No default — must be supplied.
    pub data_dir: PathBuf,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default_without_dir()
        }
    }

    fn default_without_dir() -> Self {
        Self {
            buffer_pool_size: 64,
            page_capacity: 16,
            bplustree_t: 3,
            lock_timeout_ms: 5000,
            data_dir: PathBuf::new(),
        }
    }
}

impl Default for EngineConfig {
    /// Defaults per spec.md §6. `data_dir` defaults to the empty path, which
    /// is not a usable engine root — callers should use [`EngineConfig::new`]
    /// or set `data_dir` explicitly.
    fn default() -> Self {
        Self::default_without_dir()
    }
}
