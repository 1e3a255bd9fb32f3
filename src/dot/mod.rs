//! Dot (batched matrix multiply) execution.
//!
//! # Overview
//!
//! A dot is described by a [`DotDimensionNumbers`](crate::shape::DotDimensionNumbers)
//! and three shapes. Execution goes through three layers:
//!
//! - [`DotShape`] strips the leading batch dimensions once, at creation,
//!   leaving at most rank-2 per-batch shapes
//! - [`matmul_dims`] turns the per-batch shapes into `m`, `k`, `n` and the
//!   layout/transpose decisions of a [`MatMulDims`]
//! - [`DotThunk`] resolves buffers and submits one kernel call per batch
//!   element, aggregating them into one completion signal
//!
//! # Layouts
//!
//! Kernels are column-major. Both operands must share one layout; when they
//! are row-major the thunk swaps the operands, their transposes and `m`/`n`
//! so that the column-major product lands in memory as the row-major result.
//!
//! # Example
//!
//! ```rust
//! use briny_rt::buffer::BufferAllocations;
//! use briny_rt::dot::{DotOperand, DotThunk};
//! use briny_rt::pool::default_pool;
//! use briny_rt::shape::{DotDimensionNumbers, PrimitiveType, Shape};
//! use briny_rt::thunk::{ExecuteParams, ThunkInfo};
//!
//! let mut allocations = BufferAllocations::new();
//! let lhs = allocations.upload(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! let rhs = allocations.upload(&[7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]);
//! let out = allocations.allocate(4 * 4);
//!
//! let thunk = DotThunk::create(
//!     ThunkInfo::new("dot"),
//!     DotDimensionNumbers::matmul(1, 0),
//!     DotOperand::new(lhs, Shape::row_major(PrimitiveType::F32, [2, 3])),
//!     DotOperand::new(rhs, Shape::row_major(PrimitiveType::F32, [3, 2])),
//!     DotOperand::new(out, Shape::row_major(PrimitiveType::F32, [2, 2])),
//! )?;
//!
//! let pool = default_pool()?;
//! let params = ExecuteParams::new(&allocations).with_threadpool(pool);
//! // SAFETY: nothing touches `allocations` until the event is ready.
//! let event = unsafe { thunk.execute(&params)? };
//! event.wait()?;
//!
//! assert_eq!(allocations.download::<f32>(&out), vec![58.0, 64.0, 139.0, 154.0]);
//! # Ok::<(), briny_rt::error::RuntimeError>(())
//! ```

mod dims;
mod shape;
mod thunk;

pub use self::dims::{MatMulDims, matmul_dims};
pub use self::shape::DotShape;
pub use self::thunk::{DotOperand, DotThunk};
