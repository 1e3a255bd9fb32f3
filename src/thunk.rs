//! The unit of execution.
//!
//! A [`Thunk`] is an operation with all static decisions already made: its
//! shapes are known and validated, and only the buffer addresses and the
//! thread pool are supplied per execution through [`ExecuteParams`].
//!
//! Executing a thunk never blocks on its own work. It returns a
//! [`Future<ExecuteEvent>`] that becomes ready once everything the thunk
//! scheduled has finished. The returned signal does not borrow the buffers,
//! so [`Thunk::execute`] is `unsafe`: the caller keeps the memory alive and
//! untouched until the signal is ready.

use crate::buffer::{BufferResolver, BufferSlice};
use crate::error::Result;
use crate::future::Future;
use crate::pool::ThreadPool;
use core::fmt;

/// Payload of the signal returned by [`Thunk::execute`].
pub type ExecuteEvent = ();

/// What kind of operation a thunk performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ThunkKind {
    /// A (possibly batched) matrix multiply.
    Dot,
}

impl fmt::Display for ThunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dot => f.write_str("dot"),
        }
    }
}

/// Metadata identifying the operation a thunk was built for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThunkInfo {
    /// Name of the originating operation, used in logs.
    pub op_name: String,
}

impl ThunkInfo {
    /// Info for the operation named `op_name`.
    pub fn new(op_name: impl Into<String>) -> Self {
        Self {
            op_name: op_name.into(),
        }
    }
}

/// How a thunk touches one of its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryAccess {
    /// Only read.
    Read,
    /// Written, possibly also read.
    Write,
}

/// A buffer slice together with how a thunk accesses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUse {
    /// The slice.
    pub slice: BufferSlice,
    /// Access mode.
    pub access: MemoryAccess,
}

impl BufferUse {
    /// A read-only use of `slice`.
    #[must_use]
    pub const fn read(slice: BufferSlice) -> Self {
        Self {
            slice,
            access: MemoryAccess::Read,
        }
    }

    /// A writing use of `slice`.
    #[must_use]
    pub const fn write(slice: BufferSlice) -> Self {
        Self {
            slice,
            access: MemoryAccess::Write,
        }
    }
}

/// Per-execution inputs of a thunk.
#[derive(Clone, Copy)]
pub struct ExecuteParams<'a> {
    /// Maps the thunk's buffer slices to memory.
    pub buffer_allocations: &'a dyn BufferResolver,
    /// Pool for work parallelized inside one operation.
    pub intra_op_threadpool: Option<&'a dyn ThreadPool>,
}

impl<'a> ExecuteParams<'a> {
    /// Params with no thread pool.
    pub fn new(buffer_allocations: &'a dyn BufferResolver) -> Self {
        Self {
            buffer_allocations,
            intra_op_threadpool: None,
        }
    }

    /// Attaches an intra-op thread pool.
    #[must_use]
    pub fn with_threadpool(mut self, pool: &'a dyn ThreadPool) -> Self {
        self.intra_op_threadpool = Some(pool);
        self
    }
}

impl fmt::Debug for ExecuteParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteParams")
            .field("has_threadpool", &self.intra_op_threadpool.is_some())
            .finish_non_exhaustive()
    }
}

/// An executable operation.
pub trait Thunk: Send + Sync {
    /// The kind of operation.
    fn kind(&self) -> ThunkKind;

    /// Metadata given at construction.
    fn info(&self) -> &ThunkInfo;

    /// Every buffer the thunk reads or writes.
    fn buffer_uses(&self) -> Vec<BufferUse>;

    /// Starts the operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be started. Nothing has been
    /// scheduled in that case. Failures of scheduled work are reported
    /// through the returned signal instead.
    ///
    /// # Safety
    ///
    /// Scheduled work keeps raw pointers into the memory resolved through
    /// `params.buffer_allocations`. Until the returned signal is ready, that
    /// memory must stay allocated, and no other code may write to any of the
    /// thunk's buffers or read the buffers it writes.
    unsafe fn execute(&self, params: &ExecuteParams<'_>) -> Result<Future<ExecuteEvent>>;
}
