//! Error taxonomy shared by thunks and completion signals.
//!
//! Recoverable failures are values of [`RuntimeError`]. They are cheap to
//! clone because a failed [`Future`](crate::future::Future) hands the same
//! error to every waiter.
//!
//! Contract violations (setting a promise twice, counting down past zero,
//! malformed descriptors that upstream validation should have rejected) are
//! not represented here: they panic with a message prefixed by
//! `contract violation:`.

use crate::buffer::BufferSlice;

/// Errors reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// A caller supplied an argument the operation cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The requested combination (usually an element type) is not supported.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    /// A buffer slice could not be mapped to memory.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// Failure reported by an external collaborator.
    #[error("internal: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Builds an [`RuntimeError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Builds an [`RuntimeError::Unimplemented`].
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::Unimplemented(message.into())
    }

    /// Builds an [`RuntimeError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Errors produced while mapping a [`BufferSlice`] to an address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// The slice names an allocation the resolver does not own.
    #[error("buffer allocation {index} is out of range ({count} allocations)")]
    UnknownAllocation {
        /// Requested allocation index.
        index: usize,
        /// Number of allocations known to the resolver.
        count: usize,
    },
    /// The slice does not fit inside its allocation.
    #[error("slice {slice} exceeds allocation of {size} bytes")]
    OutOfBounds {
        /// The offending slice.
        slice: BufferSlice,
        /// Size of the backing allocation in bytes.
        size: usize,
    },
}

/// Convenience alias used across the crate.
pub type Result<T, E = RuntimeError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_errors_convert_verbatim() {
        let inner = ResolutionError::UnknownAllocation { index: 3, count: 1 };
        let err: RuntimeError = inner.clone().into();
        assert_eq!(err, RuntimeError::Resolution(inner.clone()));
        assert_eq!(err.to_string(), inner.to_string());
    }

    #[test]
    fn messages_carry_their_category() {
        assert_eq!(
            RuntimeError::invalid_argument("no pool").to_string(),
            "invalid argument: no pool"
        );
        assert!(RuntimeError::unimplemented("s8").to_string().starts_with("unimplemented"));
    }
}
