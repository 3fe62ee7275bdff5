//! The underlying allocator capability the facade delegates to.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;

/// Real memory management behind a [`DelegatingResource`](crate::DelegatingResource).
///
/// # Safety
///
/// Implementors must return memory valid for `layout` from `allocate`, accept
/// back exactly the pointers they handed out in `deallocate`, and report from
/// `usable_size` a value no smaller than `layout.size()`. Callers never pass a
/// zero-sized layout.
pub unsafe trait RawAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Actual size of the block backing `ptr`, including allocator rounding.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this allocator made with `layout`.
    unsafe fn usable_size(&self, ptr: NonNull<u8>, layout: Layout) -> usize;
}

/// The process heap, queried for real block sizes where the platform allows it.
///
/// # Platform Support
///
/// - **Linux**: `malloc_usable_size`
/// - **macOS / iOS**: `malloc_size`
/// - **Others**: the requested size
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

unsafe impl RawAllocator for SystemAllocator {
    #[inline]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { System.alloc(layout) })
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { System.dealloc(ptr.as_ptr(), layout) }
    }

    #[inline]
    unsafe fn usable_size(&self, ptr: NonNull<u8>, layout: Layout) -> usize {
        let reported = unsafe { platform_usable_size(ptr) };
        reported.unwrap_or(0).max(layout.size())
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        unsafe fn platform_usable_size(ptr: NonNull<u8>) -> Option<usize> {
            Some(unsafe { libc::malloc_usable_size(ptr.as_ptr().cast()) })
        }
    } else if #[cfg(any(target_os = "macos", target_os = "ios"))] {
        unsafe fn platform_usable_size(ptr: NonNull<u8>) -> Option<usize> {
            Some(unsafe { libc::malloc_size(ptr.as_ptr().cast::<libc::c_void>()) })
        }
    } else {
        unsafe fn platform_usable_size(_ptr: NonNull<u8>) -> Option<usize> {
            None
        }
    }
}

/// System allocator that reports block sizes rounded up to a fixed granule.
///
/// Useful wherever block figures must be predictable, e.g. in tests and in
/// reports compared across machines.
#[derive(Clone, Copy, Debug)]
pub struct GranularAllocator {
    granule: usize,
}

impl GranularAllocator {
    /// `granule` must be a power of two.
    pub const fn new(granule: usize) -> Self {
        assert!(granule.is_power_of_two());
        Self { granule }
    }

    pub fn granule(&self) -> usize {
        self.granule
    }
}

impl Default for GranularAllocator {
    fn default() -> Self {
        Self::new(16)
    }
}

unsafe impl RawAllocator for GranularAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        SystemAllocator.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { SystemAllocator.deallocate(ptr, layout) }
    }

    unsafe fn usable_size(&self, _ptr: NonNull<u8>, layout: Layout) -> usize {
        (layout.size() + self.granule - 1) & !(self.granule - 1)
    }
}
