//! Communicators for collective operations.
//!
//! Only the control surface is modeled here: a communicator can be checked
//! for health, asked for its size, and aborted. Collective algorithms
//! themselves live behind implementations of [`Communicator`].

use crate::error::{Result, RuntimeError};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

/// A group of ranks taking part in collective operations.
pub trait Communicator: fmt::Display + Send + Sync {
    /// Aborts all pending collectives. Aborting twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the abort could not be delivered.
    fn abort(&self) -> Result<()>;

    /// Checks that the communicator can still be used.
    ///
    /// # Errors
    ///
    /// Returns an error describing why the communicator is unusable.
    fn health_check(&self) -> Result<()>;

    /// Number of ranks in the group.
    ///
    /// # Errors
    ///
    /// Returns an error if the communicator is unusable.
    fn num_ranks(&self) -> Result<usize>;
}

/// A single-process communicator with one rank.
#[derive(Debug, Default)]
pub struct LocalCommunicator {
    aborted: AtomicBool,
}

impl LocalCommunicator {
    /// A healthy communicator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            aborted: AtomicBool::new(false),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.aborted.load(Ordering::Acquire) {
            Err(RuntimeError::internal(format!("{self} was aborted")))
        } else {
            Ok(())
        }
    }
}

impl Communicator for LocalCommunicator {
    fn abort(&self) -> Result<()> {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            log::warn!("{self} aborted");
        }
        Ok(())
    }

    fn health_check(&self) -> Result<()> {
        self.ensure_live()
    }

    fn num_ranks(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(1)
    }
}

impl fmt::Display for LocalCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalCommunicator(rank 0 of 1)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_until_aborted() {
        let comm = LocalCommunicator::new();
        assert_eq!(comm.health_check(), Ok(()));
        assert_eq!(comm.num_ranks(), Ok(1));

        assert_eq!(comm.abort(), Ok(()));
        assert_eq!(comm.abort(), Ok(()));
        assert_eq!(
            comm.health_check(),
            Err(RuntimeError::internal("LocalCommunicator(rank 0 of 1) was aborted"))
        );
        assert!(comm.num_ranks().is_err());
    }

    #[test]
    fn usable_as_trait_object() {
        let comm: Box<dyn Communicator> = Box::new(LocalCommunicator::default());
        assert_eq!(comm.to_string(), "LocalCommunicator(rank 0 of 1)");
    }
}
