//! Thread pools that execute submitted work.
//!
//! The runtime only needs one capability from a pool: accept a unit of work
//! and run it at some point on some thread. [`ThreadPool`] captures exactly
//! that. Submission is fire-and-forget; completion is reported by the work
//! itself, usually by counting down a [`CountDown`](crate::future::CountDown).
//!
//! [`RayonPool`] is the default implementation, and `rayon::ThreadPool`
//! implements the trait directly so an existing pool can be passed as is.

use crate::config::PoolConfig;
use crate::error::{Result, RuntimeError};

/// A unit of work submitted to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes submitted work on worker threads.
pub trait ThreadPool: Send + Sync {
    /// Schedules `task` to run. Must not block on the task's completion.
    fn submit(&self, task: Task);

    /// Number of workers, if known.
    fn num_threads(&self) -> Option<usize> {
        None
    }
}

impl ThreadPool for rayon::ThreadPool {
    fn submit(&self, task: Task) {
        self.spawn(task);
    }

    fn num_threads(&self) -> Option<usize> {
        Some(self.current_num_threads())
    }
}

/// A rayon-backed pool built from a [`PoolConfig`].
#[derive(Debug)]
pub struct RayonPool {
    inner: rayon::ThreadPool,
}

impl RayonPool {
    /// Builds a pool.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Internal`] if the worker threads cannot be spawned.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let prefix = config.thread_name_prefix.clone();
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(move |index| format!("{prefix}-{index}"))
            .build()
            .map_err(|err| RuntimeError::internal(format!("failed to build thread pool: {err}")))?;
        log::debug!(
            "built intra-op pool with {} threads",
            inner.current_num_threads()
        );
        Ok(Self { inner })
    }

    /// The underlying rayon pool.
    #[must_use]
    pub fn rayon(&self) -> &rayon::ThreadPool {
        &self.inner
    }
}

impl ThreadPool for RayonPool {
    fn submit(&self, task: Task) {
        self.inner.spawn(task);
    }

    fn num_threads(&self) -> Option<usize> {
        Some(self.inner.current_num_threads())
    }
}

lazy_static::lazy_static! {
    static ref DEFAULT_POOL: Result<RayonPool> = RayonPool::new(&PoolConfig::default());
}

/// The process-wide intra-op pool, built on first use from
/// [`crate::config::intra_op_threads`].
///
/// # Errors
///
/// Returns the build error if the pool could not be created; the failure is
/// sticky for the lifetime of the process.
pub fn default_pool() -> Result<&'static RayonPool> {
    DEFAULT_POOL.as_ref().map_err(Clone::clone)
}
