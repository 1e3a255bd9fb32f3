//! The dot thunk: a batched matrix multiply fanned out over a thread pool.

use super::dims::MatMulDims;
use super::shape::DotShape;
use crate::buffer::{BufferSlice, DeviceMemory};
use crate::error::{Result, RuntimeError};
use crate::future::{CountDown, Future};
use crate::kernel::{CpuMatMul, Element, MatMulArgs, MatMulKernel};
use crate::pool::ThreadPool;
use crate::shape::{DotDimensionNumbers, PrimitiveType, Shape};
use crate::thunk::{BufferUse, ExecuteEvent, ExecuteParams, Thunk, ThunkInfo, ThunkKind};
use core::fmt;
use half::f16;
use num_complex::Complex;
use std::sync::Arc;

/// One dot operand or result: where it lives and what it looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotOperand {
    /// Slice holding the array.
    pub buffer: BufferSlice,
    /// Shape and layout of the array.
    pub shape: Shape,
}

impl DotOperand {
    /// Pairs a slice with its shape.
    #[must_use]
    pub const fn new(buffer: BufferSlice, shape: Shape) -> Self {
        Self { buffer, shape }
    }
}

/// Base addresses and sizes of one execution, after the row-major swap.
struct MatMulPlan {
    out: *mut u8,
    lhs: *const u8,
    rhs: *const u8,
    m: usize,
    n: usize,
    k: usize,
    transpose_lhs: bool,
    transpose_rhs: bool,
    batch_size: usize,
}

/// A batched matrix multiply.
///
/// Each batch element is an independent `[m×k] · [k×n]` multiply submitted
/// to the intra-op pool as its own task. The kernel only understands
/// column-major data; row-major operands are handled by computing
/// `outᵀ = rhsᵀ · lhsᵀ`, which in memory is the same column-major product
/// with the operands and `m`/`n` swapped.
pub struct DotThunk<K = CpuMatMul> {
    info: ThunkInfo,
    dot_dimensions: DotDimensionNumbers,
    lhs: DotOperand,
    rhs: DotOperand,
    out: DotOperand,
    dot_shape: DotShape,
    kernel: Arc<K>,
}

impl DotThunk<CpuMatMul> {
    /// Creates a dot thunk using the reference CPU kernel.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidArgument`] if the descriptor is not a
    /// valid (batched) matmul, see [`DotShape::new`], or if a buffer slice is
    /// smaller than its shape.
    pub fn create(
        info: ThunkInfo,
        dot_dimensions: DotDimensionNumbers,
        lhs: DotOperand,
        rhs: DotOperand,
        out: DotOperand,
    ) -> Result<Self> {
        Self::with_kernel(info, dot_dimensions, lhs, rhs, out, CpuMatMul)
    }
}

impl<K: MatMulKernel> DotThunk<K> {
    /// Creates a dot thunk running on `kernel`.
    ///
    /// # Errors
    ///
    /// Same as [`DotThunk::create`].
    pub fn with_kernel(
        info: ThunkInfo,
        dot_dimensions: DotDimensionNumbers,
        lhs: DotOperand,
        rhs: DotOperand,
        out: DotOperand,
        kernel: K,
    ) -> Result<Self> {
        let dot_shape = DotShape::new(&dot_dimensions, &lhs.shape, &rhs.shape, &out.shape)?;

        for (name, operand) in [("lhs", &lhs), ("rhs", &rhs), ("out", &out)] {
            let needed = required_bytes(name, operand)?;
            if operand.buffer.size() < needed {
                return Err(RuntimeError::invalid_argument(format!(
                    "{name} slice {} is smaller than shape {} ({needed} bytes)",
                    operand.buffer, operand.shape,
                )));
            }
        }

        Ok(Self {
            info,
            dot_dimensions,
            lhs,
            rhs,
            out,
            dot_shape,
            kernel: Arc::new(kernel),
        })
    }

    /// The contraction descriptor.
    #[must_use]
    pub const fn dot_dimensions(&self) -> &DotDimensionNumbers {
        &self.dot_dimensions
    }

    /// The per-batch decomposition derived at creation.
    #[must_use]
    pub const fn dot_shape(&self) -> &DotShape {
        &self.dot_shape
    }

    /// Starts the multiply.
    ///
    /// Resolves the three buffers, then submits one task per batch element to
    /// the intra-op pool and returns a signal that becomes ready when the
    /// last of them finishes. A batch size of zero returns a ready signal.
    ///
    /// # Errors
    ///
    /// Nothing is submitted when an error is returned:
    ///
    /// - a buffer fails to resolve: the resolver's error
    /// - no intra-op pool is given: [`RuntimeError::InvalidArgument`]
    /// - the element type has no kernel: [`RuntimeError::Unimplemented`]
    ///
    /// # Panics
    ///
    /// Panics with a contract violation if the operands disagree on
    /// column-major layout, which creation already rules out.
    ///
    /// # Safety
    ///
    /// The submitted tasks write through raw pointers into the resolved
    /// memory. Until the returned signal is ready the caller must keep that
    /// memory allocated, must not write to any of the three buffers, and must
    /// not read the output buffer. Waiting on the signal before touching the
    /// allocations again satisfies this.
    ///
    /// Dropping or reading the allocations without waiting first requires
    /// stepping outside safe code, so this does not compile:
    ///
    /// ```compile_fail,E0133
    /// # use briny_rt::buffer::BufferAllocations;
    /// # use briny_rt::pool::default_pool;
    /// # use briny_rt::shape::{DotDimensionNumbers, PrimitiveType, Shape};
    /// # use briny_rt::thunk::{ExecuteParams, ThunkInfo};
    /// # use briny_rt::{DotOperand, DotThunk};
    /// # let shape = Shape::row_major(PrimitiveType::F32, [2, 2]);
    /// # let mut allocations = BufferAllocations::new();
    /// # let operands = [0, 1, 2].map(|_| DotOperand::new(allocations.allocate(16), shape.clone()));
    /// # let [lhs, rhs, out] = operands;
    /// # let thunk = DotThunk::create(ThunkInfo::default(), DotDimensionNumbers::matmul(1, 0), lhs, rhs, out)?;
    /// let params = ExecuteParams::new(&allocations).with_threadpool(default_pool()?);
    /// let event = thunk.execute(&params)?;
    /// drop(allocations);
    /// # Ok::<(), briny_rt::RuntimeError>(())
    /// ```
    ///
    /// # Example
    ///
    /// ```rust
    /// use briny_rt::buffer::BufferAllocations;
    /// use briny_rt::pool::default_pool;
    /// use briny_rt::shape::{DotDimensionNumbers, PrimitiveType, Shape};
    /// use briny_rt::thunk::{ExecuteParams, ThunkInfo};
    /// use briny_rt::{DotOperand, DotThunk};
    ///
    /// let shape = Shape::row_major(PrimitiveType::F32, [2, 2]);
    /// let mut allocations = BufferAllocations::new();
    /// let lhs = allocations.upload(&[1.0f32, 2.0, 3.0, 4.0]);
    /// let rhs = allocations.upload(&[0.0f32, 1.0, 1.0, 0.0]);
    /// let out = allocations.allocate(16);
    /// let thunk = DotThunk::create(
    ///     ThunkInfo::new("swap_columns"),
    ///     DotDimensionNumbers::matmul(1, 0),
    ///     DotOperand::new(lhs, shape.clone()),
    ///     DotOperand::new(rhs, shape.clone()),
    ///     DotOperand::new(out, shape),
    /// )?;
    ///
    /// let params = ExecuteParams::new(&allocations).with_threadpool(default_pool()?);
    /// // SAFETY: `allocations` is read again only after the event is ready.
    /// let event = unsafe { thunk.execute(&params)? };
    /// event.wait()?;
    /// assert_eq!(allocations.download::<f32>(&out), vec![2.0, 1.0, 4.0, 3.0]);
    /// # Ok::<(), briny_rt::RuntimeError>(())
    /// ```
    pub unsafe fn execute(&self, params: &ExecuteParams<'_>) -> Result<Future<ExecuteEvent>> {
        let lhs_data = resolve(params, "lhs", &self.lhs)?;
        let rhs_data = resolve(params, "rhs", &self.rhs)?;
        let out_data = resolve(params, "out", &self.out)?;

        log::debug!(
            "{}: dot dimensions {:?}; lhs {} at {}; rhs {} at {}; out {} at {}",
            self.info.op_name,
            self.dot_dimensions,
            self.lhs.shape,
            self.lhs.buffer,
            self.rhs.shape,
            self.rhs.buffer,
            self.out.shape,
            self.out.buffer,
        );

        let dims = self.dot_shape.matmul_dims();
        log::debug!(
            "{}: batch size {}; lhs matmul {}; rhs matmul {}; out matmul {}; {dims}",
            self.info.op_name,
            self.dot_shape.batch_size,
            self.dot_shape.lhs_matmul_shape,
            self.dot_shape.rhs_matmul_shape,
            self.dot_shape.out_matmul_shape,
        );

        let Some(pool) = params.intra_op_threadpool else {
            log::warn!("{}: rejected, no intra-op thread pool", self.info.op_name);
            return Err(RuntimeError::invalid_argument(
                "Intra-op threadpool must be provided for DotThunk",
            ));
        };

        let plan = self.plan(&dims, &lhs_data, &rhs_data, &out_data)?;

        match self.lhs.shape.element_type() {
            PrimitiveType::F16 => self.dispatch::<f16>(pool, &plan),
            PrimitiveType::F32 => self.dispatch::<f32>(pool, &plan),
            PrimitiveType::F64 => self.dispatch::<f64>(pool, &plan),
            PrimitiveType::S32 => self.dispatch::<i32>(pool, &plan),
            PrimitiveType::C64 => self.dispatch::<Complex<f32>>(pool, &plan),
            PrimitiveType::C128 => self.dispatch::<Complex<f64>>(pool, &plan),
            other => {
                log::warn!("{}: rejected, no kernel for {other}", self.info.op_name);
                Err(RuntimeError::unimplemented(format!(
                    "Unsupported element type for DotThunk::execute: {other}"
                )))
            }
        }
    }

    fn plan(
        &self,
        dims: &MatMulDims,
        lhs: &DeviceMemory,
        rhs: &DeviceMemory,
        out: &DeviceMemory,
    ) -> Result<MatMulPlan> {
        assert_eq!(
            dims.lhs_column_major, dims.rhs_column_major,
            "contract violation: dot operands must share one layout"
        );

        let to_usize = |value: i64| {
            usize::try_from(value)
                .map_err(|_| RuntimeError::internal(format!("negative matmul dimension {value}")))
        };

        let mut plan = MatMulPlan {
            out: out.opaque(),
            lhs: lhs.opaque().cast_const(),
            rhs: rhs.opaque().cast_const(),
            m: to_usize(dims.m)?,
            n: to_usize(dims.n)?,
            k: to_usize(dims.k)?,
            transpose_lhs: !dims.lhs_canonical,
            transpose_rhs: !dims.rhs_canonical,
            batch_size: self.dot_shape.batch_size,
        };

        if !dims.lhs_column_major {
            core::mem::swap(&mut plan.m, &mut plan.n);
            core::mem::swap(&mut plan.lhs, &mut plan.rhs);
            core::mem::swap(&mut plan.transpose_lhs, &mut plan.transpose_rhs);
        }
        Ok(plan)
    }

    fn dispatch<T: Element>(
        &self,
        pool: &dyn ThreadPool,
        plan: &MatMulPlan,
    ) -> Result<Future<ExecuteEvent>> {
        let byte_width = T::TYPE.byte_width();
        debug_assert_eq!(byte_width, size_of::<T>());

        let align = align_of::<T>();
        for (name, ptr) in [("lhs", plan.lhs), ("rhs", plan.rhs), ("out", plan.out.cast_const())] {
            if ptr.align_offset(align) != 0 {
                return Err(RuntimeError::invalid_argument(format!(
                    "{name} buffer is not aligned to {align} bytes for {}",
                    T::TYPE
                )));
            }
        }

        let lhs_stride = plan.m * plan.k * byte_width;
        let rhs_stride = plan.k * plan.n * byte_width;
        let out_stride = plan.m * plan.n * byte_width;

        let counter = CountDown::<ExecuteEvent>::new(plan.batch_size);
        let event = counter.as_future();

        log::trace!(
            "{}: submitting {} {} matmul tasks (m={}, n={}, k={}, transpose_lhs={}, transpose_rhs={})",
            self.info.op_name,
            plan.batch_size,
            T::TYPE,
            plan.m,
            plan.n,
            plan.k,
            plan.transpose_lhs,
            plan.transpose_rhs,
        );

        for i in 0..plan.batch_size {
            // SAFETY: each resolved buffer was checked to hold its full shape,
            // which is `batch_size` consecutive matrices of the stride's size,
            // and the caller keeps the allocations alive until `event` is ready.
            let args = unsafe {
                MatMulArgs::new(
                    plan.out.add(i * out_stride).cast::<T>(),
                    plan.lhs.add(i * lhs_stride).cast::<T>(),
                    plan.rhs.add(i * rhs_stride).cast::<T>(),
                    plan.m,
                    plan.n,
                    plan.k,
                    plan.transpose_lhs,
                    plan.transpose_rhs,
                )
            };
            let kernel = Arc::clone(&self.kernel);
            let counter = counter.clone();
            pool.submit(Box::new(move || {
                kernel.matmul(
                    args,
                    Box::new(move || {
                        counter.count_down();
                    }),
                );
            }));
        }

        Ok(event)
    }
}

fn required_bytes(name: &str, operand: &DotOperand) -> Result<usize> {
    operand.shape.byte_size().ok_or_else(|| {
        RuntimeError::invalid_argument(format!(
            "{name} shape {} is too large to address",
            operand.shape
        ))
    })
}

fn resolve(params: &ExecuteParams<'_>, name: &str, operand: &DotOperand) -> Result<DeviceMemory> {
    let memory = params.buffer_allocations.resolve(&operand.buffer)?;
    let needed = required_bytes(name, operand)?;
    if memory.size() < needed {
        return Err(RuntimeError::internal(format!(
            "{name} slice {} resolved to {} bytes but shape {} needs {needed}",
            operand.buffer,
            memory.size(),
            operand.shape
        )));
    }
    Ok(memory)
}

impl<K: MatMulKernel> Thunk for DotThunk<K> {
    fn kind(&self) -> ThunkKind {
        ThunkKind::Dot
    }

    fn info(&self) -> &ThunkInfo {
        &self.info
    }

    fn buffer_uses(&self) -> Vec<BufferUse> {
        vec![
            BufferUse::read(self.lhs.buffer),
            BufferUse::read(self.rhs.buffer),
            BufferUse::write(self.out.buffer),
        ]
    }

    unsafe fn execute(&self, params: &ExecuteParams<'_>) -> Result<Future<ExecuteEvent>> {
        // SAFETY: the caller upholds the same contract.
        unsafe { Self::execute(self, params) }
    }
}

impl<K> fmt::Debug for DotThunk<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DotThunk")
            .field("info", &self.info)
            .field("dot_dimensions", &self.dot_dimensions)
            .field("lhs", &self.lhs)
            .field("rhs", &self.rhs)
            .field("out", &self.out)
            .field("batch_size", &self.dot_shape.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferAllocations;
    use crate::pool::Task;
    use crate::shape::PrimitiveType::{F32, S8};
    use parking_lot::Mutex;

    /// Runs every task inline and counts submissions.
    #[derive(Default)]
    struct InlinePool {
        submitted: Mutex<usize>,
    }

    impl ThreadPool for InlinePool {
        fn submit(&self, task: Task) {
            *self.submitted.lock() += 1;
            task();
        }
    }

    fn square(allocations: &mut BufferAllocations, ty: PrimitiveType) -> DotOperand {
        let shape = Shape::row_major(ty, [2, 2]);
        DotOperand::new(allocations.allocate(16), shape)
    }

    #[test]
    fn inline_execution_is_ready_on_return() {
        let mut allocations = BufferAllocations::new();
        let lhs = allocations.upload(&[1.0f32, 2.0, 3.0, 4.0]);
        let rhs = allocations.upload(&[5.0f32, 6.0, 7.0, 8.0]);
        let out = square(&mut allocations, F32);
        let shape = Shape::row_major(F32, [2, 2]);

        let thunk = DotThunk::create(
            ThunkInfo::new("dot.1"),
            DotDimensionNumbers::matmul(1, 0),
            DotOperand::new(lhs, shape.clone()),
            DotOperand::new(rhs, shape),
            out.clone(),
        )
        .unwrap();

        let pool = InlinePool::default();
        let params = ExecuteParams::new(&allocations).with_threadpool(&pool);
        // SAFETY: the inline pool has finished every task on return.
        let event = unsafe { thunk.execute(&params) }.unwrap();

        assert!(event.is_known_ready());
        assert_eq!(*pool.submitted.lock(), 1);
        assert_eq!(allocations.download::<f32>(&out.buffer), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn missing_pool_is_rejected() {
        let mut allocations = BufferAllocations::new();
        let lhs = square(&mut allocations, F32);
        let rhs = square(&mut allocations, F32);
        let out = square(&mut allocations, F32);
        let thunk =
            DotThunk::create(ThunkInfo::default(), DotDimensionNumbers::matmul(1, 0), lhs, rhs, out)
                .unwrap();

        // SAFETY: rejected before anything is scheduled.
        let err = unsafe { thunk.execute(&ExecuteParams::new(&allocations)) }.unwrap_err();
        assert_eq!(
            err,
            RuntimeError::invalid_argument("Intra-op threadpool must be provided for DotThunk")
        );
    }

    #[test]
    fn unsupported_element_type_submits_nothing() {
        let mut allocations = BufferAllocations::new();
        let lhs = square(&mut allocations, S8);
        let rhs = square(&mut allocations, S8);
        let out = square(&mut allocations, S8);
        let thunk =
            DotThunk::create(ThunkInfo::default(), DotDimensionNumbers::matmul(1, 0), lhs, rhs, out)
                .unwrap();

        let pool = InlinePool::default();
        let params = ExecuteParams::new(&allocations).with_threadpool(&pool);
        // SAFETY: rejected before anything is scheduled.
        let err = unsafe { thunk.execute(&params) }.unwrap_err();
        assert_eq!(
            err,
            RuntimeError::unimplemented("Unsupported element type for DotThunk::execute: s8")
        );
        assert_eq!(*pool.submitted.lock(), 0);
    }

    #[test]
    fn undersized_slices_are_rejected_at_creation() {
        let mut allocations = BufferAllocations::new();
        let lhs = square(&mut allocations, F32);
        let rhs = square(&mut allocations, F32);
        let out = DotOperand::new(allocations.allocate(4), Shape::row_major(F32, [2, 2]));
        let result =
            DotThunk::create(ThunkInfo::default(), DotDimensionNumbers::matmul(1, 0), lhs, rhs, out);
        assert!(matches!(result, Err(RuntimeError::InvalidArgument(_))));
    }

    #[test]
    fn unaddressable_shapes_are_rejected_at_creation() {
        let mut allocations = BufferAllocations::new();
        let slice = allocations.allocate(16);
        let result = DotThunk::create(
            ThunkInfo::new("dot.huge"),
            DotDimensionNumbers::matmul(1, 0),
            DotOperand::new(slice, Shape::row_major(F32, [1 << 62, 1])),
            DotOperand::new(slice, Shape::row_major(F32, [1, 4])),
            DotOperand::new(slice, Shape::row_major(F32, [1 << 62, 4])),
        );
        assert!(matches!(result, Err(RuntimeError::InvalidArgument(_))));
    }

    #[test]
    fn reports_kind_and_buffer_uses() {
        let mut allocations = BufferAllocations::new();
        let lhs = square(&mut allocations, F32);
        let rhs = square(&mut allocations, F32);
        let out = square(&mut allocations, F32);
        let thunk = DotThunk::create(
            ThunkInfo::new("dot.7"),
            DotDimensionNumbers::matmul(1, 0),
            lhs.clone(),
            rhs,
            out.clone(),
        )
        .unwrap();
        let thunk: &dyn Thunk = &thunk;

        assert_eq!(thunk.kind(), ThunkKind::Dot);
        assert_eq!(thunk.info().op_name, "dot.7");
        let uses = thunk.buffer_uses();
        assert_eq!(uses[0], BufferUse::read(lhs.buffer));
        assert_eq!(uses[2], BufferUse::write(out.buffer));
    }
}
