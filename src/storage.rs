//! Backend-agnostic buffer management.
//!
//! A [`Layout`] describes the logical extent of a buffer together with the backend that
//! owns its memory; a [`Buffer`] is typed storage allocated against a layout. The buffer
//! distinguishes between its *allocation* (which only ever grows) and its *logical slice*
//! (the prefix sized by the current layout), so that repeated resizes of scratch buffers
//! never reallocate once the high-water mark is reached.
//!
//! Aliasing between buffers is expressed exclusively through borrowed slices obtained from
//! [`Buffer::as_slice`] / [`Buffer::as_mut_slice`]; there is no shared-mutable-reference
//! mechanism, so the borrow checker enforces the alias contract.

/// Execution backend for kernels operating on buffers allocated against a [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Plain sequential loops.
    Serial,
    /// Dispatch element batches to the rayon thread pool, but only for problems with at
    /// least `min_parallel` independent work items. Small problems run serially to avoid
    /// paying the fork-join overhead.
    Threaded { min_parallel: usize },
}

impl Backend {
    /// A threaded backend with a default parallelization threshold.
    pub fn threaded() -> Self {
        Backend::Threaded { min_parallel: 64 }
    }

    /// Decide, per call, whether a loop over `num_items` independent items should be
    /// dispatched in parallel on this backend.
    pub fn parallelize(&self, num_items: usize) -> bool {
        match *self {
            Backend::Serial => false,
            Backend::Threaded { min_parallel } => num_items >= min_parallel,
        }
    }
}

/// Logical extent of a buffer plus the identity of the backend that owns its memory.
///
/// A layout owns no data itself. Buffers allocated against a layout belong to that
/// layout's backend; resizing a buffer to a layout of a *different* backend is a
/// programming error and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    size: usize,
    backend: Backend,
}

impl Layout {
    pub fn new(size: usize, backend: Backend) -> Self {
        Self { size, backend }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }
}

/// Typed storage over a [`Layout`].
///
/// Invariant: `len <= data.len()` at all times, and `len == layout.size()` after any
/// resize. The allocation behind `data` never shrinks; shrinking resizes only rebind the
/// logical prefix.
#[derive(Debug, Clone)]
pub struct Buffer<T> {
    data: Vec<T>,
    len: usize,
    backend: Backend,
}

impl<T: Copy + Default> Buffer<T> {
    /// Allocate a zero-initialized buffer for the given layout.
    pub fn from_layout(layout: Layout) -> Self {
        Self {
            data: vec![T::default(); layout.size()],
            len: layout.size(),
            backend: layout.backend(),
        }
    }

    /// Rebind the logical slice to the size of `layout`, growing the allocation only if
    /// the new size exceeds the current capacity.
    ///
    /// # Panics
    ///
    /// Panics if `layout` belongs to a different backend than the one this buffer was
    /// allocated on.
    pub fn resize_to(&mut self, layout: Layout) {
        assert_eq!(
            layout.backend(),
            self.backend,
            "buffer cannot be resized to a layout of a different backend"
        );
        if layout.size() > self.data.len() {
            self.data.resize(layout.size(), T::default());
        }
        self.len = layout.size();
    }

    /// Fill the logical slice with `value`. Entries beyond the logical size are untouched.
    pub fn fill(&mut self, value: T) {
        self.data[..self.len].fill(value);
    }

    /// Copy host data into the logical slice (host-to-device transfer on an offload
    /// backend; a plain copy here).
    ///
    /// # Panics
    ///
    /// Panics if `src` does not match the logical size.
    pub fn push(&mut self, src: &[T]) {
        assert_eq!(src.len(), self.len, "push size mismatch");
        self.data[..self.len].copy_from_slice(src);
    }

    /// Copy the logical slice out to host storage (device-to-host transfer on an offload
    /// backend; a plain copy here).
    ///
    /// # Panics
    ///
    /// Panics if `dst` does not match the logical size.
    pub fn pull(&self, dst: &mut [T]) {
        assert_eq!(dst.len(), self.len, "pull size mismatch");
        dst.copy_from_slice(&self.data[..self.len]);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity of the underlying allocation. Always at least [`Buffer::len`].
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data[..self.len]
    }
}
