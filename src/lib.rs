//! # `briny_rt`
//!
//! The asynchronous execution core of a numeric compute runtime: batched
//! matrix multiplies fanned out over a thread pool, and the single-assignment
//! completion signals used to observe them.
//!
//! # Features
//!
//! - **Dot thunk**: derives matmul dimensions and layout decisions from a
//!   contraction descriptor, then submits one typed kernel call per batch
//!   element to an intra-op pool
//! - **Completion signals**: `Future`/`Promise` pairs with blocking waits,
//!   callbacks, `.await` support, joins and count-down aggregation
//! - **Dependency tracking**: lets another subsystem hold off its own
//!   completion until a signal resolves
//! - **Reference kernel**: a rayon-parallel column-major GEMM for `f16`,
//!   `f32`, `f64`, `i32` and complex types
//!
//! # Modules
//!
//! - [`dot`]: dimension resolution and the dot thunk
//! - [`future`]: completion signals, count-down and dependency tracking
//! - [`shape`]: element types, shapes and contraction descriptors
//! - [`buffer`], [`pool`], [`kernel`]: the collaborators a thunk executes with
//! - [`thunk`]: the common thunk interface
//! - [`collectives`]: communicator control surface
//! - [`config`], [`error`], [`approx`]: configuration, errors and numeric
//!   comparison
//!
//! # Example
//!
//! ```rust
//! use briny_rt::future::{CountDown, join_futures};
//!
//! let count = CountDown::<()>::new(2);
//! let joined = join_futures(&[count.as_future()]);
//!
//! count.count_down();
//! assert!(!joined.is_known_ready());
//! count.count_down();
//! assert_eq!(joined.wait(), Ok(()));
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::many_single_char_names,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::similar_names,
    clippy::module_name_repetitions
)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]

pub mod approx;
pub mod buffer;
pub mod collectives;
pub mod config;
pub mod dot;
pub mod error;
pub mod future;
pub mod kernel;
pub mod pool;
pub mod shape;
pub mod thunk;

pub use self::dot::{DotOperand, DotThunk, MatMulDims};
pub use self::error::{Result, RuntimeError};
pub use self::future::{Future, Promise};
