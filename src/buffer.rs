//! Buffer slices and their resolution to memory.
//!
//! Thunks never own memory. They hold [`BufferSlice`]s (an allocation index
//! plus a byte range) and ask a [`BufferResolver`] for the address at
//! execution time.
//!
//! [`BufferAllocations`] is the host implementation: it owns a list of
//! zero-initialized, 8-byte aligned allocations. Every element type the dot
//! thunk supports has an alignment of at most 8, so any slice whose offset is
//! a multiple of the element width is correctly aligned.
//!
//! # Safety
//!
//! A resolved [`DeviceMemory`] is a raw pointer. The allocations must outlive
//! every piece of work that still writes through it, which for asynchronous
//! thunks means until the returned completion signal is ready.

use crate::error::ResolutionError;
use core::fmt;
use core::ptr::NonNull;

/// A byte range inside one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSlice {
    index: usize,
    offset: usize,
    size: usize,
}

impl BufferSlice {
    /// Creates a slice of `size` bytes starting at `offset` in allocation `index`.
    #[must_use]
    pub const fn new(index: usize, offset: usize, size: usize) -> Self {
        Self {
            index,
            offset,
            size,
        }
    }

    /// Allocation index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Byte offset into the allocation.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Display for BufferSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{index:{}, offset:{}, size:{}}}",
            self.index, self.offset, self.size
        )
    }
}

/// A resolved memory region.
#[derive(Debug, Clone, Copy)]
pub struct DeviceMemory {
    ptr: NonNull<u8>,
    size: usize,
}

impl DeviceMemory {
    /// Wraps a raw region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes for as long as
    /// anything holding the returned value may access it.
    #[must_use]
    pub const unsafe fn new(ptr: NonNull<u8>, size: usize) -> Self {
        Self { ptr, size }
    }

    /// The start of the region.
    #[must_use]
    pub const fn opaque(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Maps logical buffer slices to addresses.
///
/// # Safety
///
/// Every [`DeviceMemory`] returned by `resolve` must be valid for reads and
/// writes of its full `size` for as long as the resolver itself is alive.
/// Thunks write through the returned pointers without further checks.
pub unsafe trait BufferResolver {
    /// Returns the memory backing `slice`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolutionError`] if the slice does not name valid memory.
    fn resolve(&self, slice: &BufferSlice) -> Result<DeviceMemory, ResolutionError>;
}

/// One owned allocation, stored as `u64` words for alignment.
struct OwnedBuffer {
    words: NonNull<u64>,
    len_words: usize,
    size: usize,
}

impl OwnedBuffer {
    fn zeroed(size: usize) -> Self {
        let len_words = size.div_ceil(8).max(1);
        let boxed = vec![0u64; len_words].into_boxed_slice();
        let raw = Box::into_raw(boxed).cast::<u64>();
        Self {
            // SAFETY: `Box::into_raw` never returns null.
            words: unsafe { NonNull::new_unchecked(raw) },
            len_words,
            size,
        }
    }

    fn bytes(&self) -> NonNull<u8> {
        self.words.cast()
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.words.as_ptr(), self.len_words);
        // SAFETY: produced by `Box::into_raw` on a boxed slice of this length.
        drop(unsafe { Box::from_raw(slice) });
    }
}

// SAFETY: the buffer uniquely owns its heap allocation; concurrent access is
// governed by the slice discipline documented on the module.
unsafe impl Send for OwnedBuffer {}
// SAFETY: see above.
unsafe impl Sync for OwnedBuffer {}

/// Host-memory allocations addressed by index.
///
/// # Example
///
/// ```rust
/// use briny_rt::buffer::{BufferAllocations, BufferResolver};
///
/// let mut buffers = BufferAllocations::new();
/// let slice = buffers.upload(&[1.0f32, 2.0, 3.0]);
/// assert_eq!(buffers.resolve(&slice).unwrap().size(), 12);
/// assert_eq!(buffers.download::<f32>(&slice), vec![1.0, 2.0, 3.0]);
/// ```
#[derive(Default)]
pub struct BufferAllocations {
    buffers: Vec<OwnedBuffer>,
}

impl BufferAllocations {
    /// Creates an empty set of allocations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no allocation has been made.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Allocates `size` zeroed bytes and returns a slice covering them.
    pub fn allocate(&mut self, size: usize) -> BufferSlice {
        self.buffers.push(OwnedBuffer::zeroed(size));
        BufferSlice::new(self.buffers.len() - 1, 0, size)
    }

    /// Allocates a buffer holding a copy of `data`.
    pub fn upload<T: bytemuck::Pod>(&mut self, data: &[T]) -> BufferSlice {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let slice = self.allocate(bytes.len());
        self.write(&slice, data);
        slice
    }

    /// Copies `data` into the start of `slice`.
    ///
    /// # Panics
    ///
    /// Panics if the slice cannot be resolved or is smaller than `data`.
    pub fn write<T: bytemuck::Pod>(&mut self, slice: &BufferSlice, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let memory = match self.resolve(slice) {
            Ok(memory) => memory,
            Err(err) => panic!("cannot write to {slice}: {err}"),
        };
        assert!(bytes.len() <= memory.size(), "write overflows {slice}");
        // SAFETY: the region was resolved against an owned allocation and is
        // at least `bytes.len()` long; `&mut self` excludes other writers.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), memory.opaque(), bytes.len());
        }
    }

    /// Copies the contents of `slice` out as elements of `T`.
    ///
    /// # Panics
    ///
    /// Panics if the slice cannot be resolved.
    #[must_use]
    pub fn download<T: bytemuck::Pod>(&self, slice: &BufferSlice) -> Vec<T> {
        let memory = match self.resolve(slice) {
            Ok(memory) => memory,
            Err(err) => panic!("cannot read from {slice}: {err}"),
        };
        let count = memory.size() / size_of::<T>();
        let mut out = vec![T::zeroed(); count];
        let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
        // SAFETY: the region is valid for `memory.size()` bytes and `dst` is
        // no longer than that.
        unsafe {
            core::ptr::copy_nonoverlapping(memory.opaque(), dst.as_mut_ptr(), dst.len());
        }
        out
    }
}

// SAFETY: `resolve` bounds-checks every slice against an allocation that
// lives as long as `self`.
unsafe impl BufferResolver for BufferAllocations {
    fn resolve(&self, slice: &BufferSlice) -> Result<DeviceMemory, ResolutionError> {
        let buffer = self
            .buffers
            .get(slice.index())
            .ok_or(ResolutionError::UnknownAllocation {
                index: slice.index(),
                count: self.buffers.len(),
            })?;

        let end = slice.offset().checked_add(slice.size());
        if end.is_none_or(|end| end > buffer.size) {
            return Err(ResolutionError::OutOfBounds {
                slice: *slice,
                size: buffer.size,
            });
        }

        // SAFETY: `offset + size <= buffer.size`, so the region stays inside
        // an allocation owned by `self` (or ends at its last byte).
        Ok(unsafe { DeviceMemory::new(buffer.bytes().add(slice.offset()), slice.size()) })
    }
}

impl fmt::Debug for BufferAllocations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.buffers.iter().map(|buffer| buffer.size))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_and_download_roundtrip_through_resolution() {
        let mut buffers = BufferAllocations::new();
        let slice = buffers.upload(&[1i32, -2, 3]);
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers.download::<i32>(&slice), vec![1, -2, 3]);

        let tail = BufferSlice::new(slice.index(), 4, 8);
        assert_eq!(buffers.download::<i32>(&tail), vec![-2, 3]);
    }

    #[test]
    fn resolution_reports_unknown_allocations() {
        let buffers = BufferAllocations::new();
        let err = buffers.resolve(&BufferSlice::new(2, 0, 4)).unwrap_err();
        assert_eq!(err, ResolutionError::UnknownAllocation { index: 2, count: 0 });
    }

    #[test]
    fn resolution_reports_out_of_bounds_slices() {
        let mut buffers = BufferAllocations::new();
        let slice = buffers.allocate(16);
        let bad = BufferSlice::new(slice.index(), 12, 8);
        assert!(matches!(
            buffers.resolve(&bad),
            Err(ResolutionError::OutOfBounds { size: 16, .. })
        ));
    }

    #[test]
    fn allocations_are_word_aligned() {
        let mut buffers = BufferAllocations::new();
        let slice = buffers.allocate(3);
        let memory = buffers.resolve(&slice).unwrap();
        assert_eq!(memory.opaque() as usize % 8, 0);
    }
}
