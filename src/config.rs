//! Process-wide runtime configuration.
//!
//! This module holds the settings that shape how the runtime builds its
//! default intra-op thread pool.
//!
//! # Settings
//!
//! - Intra-op thread count: number of workers in [`crate::pool::default_pool`].
//!   `0` (the default) lets rayon pick one worker per logical CPU.
//!
//! The value is stored globally in an `AtomicUsize`, so it can be set from
//! anywhere before the default pool is first used. Changing it afterwards has
//! no effect on the already-built pool; build a [`PoolConfig`] for that.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Internal global intra-op thread count.
///
/// Relaxed ordering is enough: the value is read once, when the default pool
/// is constructed.
static GLOBAL_INTRA_OP_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Sets the number of workers used by the default intra-op pool.
///
/// # Example
///
/// ```
/// use briny_rt::config::{intra_op_threads, set_intra_op_threads};
/// set_intra_op_threads(4);
/// assert_eq!(intra_op_threads(), 4);
/// ```
pub fn set_intra_op_threads(threads: usize) {
    GLOBAL_INTRA_OP_THREADS.store(threads, Ordering::Relaxed);
}

/// Returns the configured intra-op thread count (`0` means automatic).
pub fn intra_op_threads() -> usize {
    GLOBAL_INTRA_OP_THREADS.load(Ordering::Relaxed)
}

/// Settings for building a [`RayonPool`](crate::pool::RayonPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Worker count, `0` for automatic.
    pub num_threads: usize,
    /// Prefix of worker thread names; the worker index is appended.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: intra_op_threads(),
            thread_name_prefix: String::from("briny-intra-op"),
        }
    }
}

impl PoolConfig {
    /// Overrides the worker count.
    #[must_use]
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Overrides the worker name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}
