use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::slice;

use crate::error::TrackError;
use crate::resource::DelegatingResource;

const MIN_CAPACITY: usize = 4;

/// Growable array whose backing storage always comes from one resource.
///
/// Create it with [`Tracker::tracked_vec`](crate::Tracker::tracked_vec) so the
/// resource is pool-issued and stamped with the creation site. Every grow
/// allocates the new block and releases the old one through that same
/// resource, so reallocations stay attributed to where the vector was made.
pub struct TrackedVec<T> {
    ptr: NonNull<T>,
    cap: usize,
    len: usize,
    resource: Rc<DelegatingResource>,
    _marker: PhantomData<T>,
}

impl<T> TrackedVec<T> {
    const IS_ZST: bool = mem::size_of::<T>() == 0;

    pub fn new_in(resource: Rc<DelegatingResource>) -> Self {
        Self {
            ptr: NonNull::dangling(),
            cap: if Self::IS_ZST { usize::MAX } else { 0 },
            len: 0,
            resource,
            _marker: PhantomData,
        }
    }

    pub fn with_capacity_in(
        capacity: usize,
        resource: Rc<DelegatingResource>,
    ) -> Result<Self, TrackError> {
        let mut vec = Self::new_in(resource);
        vec.try_reserve(capacity)?;
        Ok(vec)
    }

    /// The resource this vector allocates through.
    pub fn resource(&self) -> &Rc<DelegatingResource> {
        &self.resource
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Makes room for at least `additional` more elements.
    ///
    /// Capacity at least doubles on every grow, starting at 4.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TrackError> {
        let required = self
            .len
            .checked_add(additional)
            .ok_or(TrackError::CapacityOverflow)?;
        if required <= self.cap {
            return Ok(());
        }

        let new_cap = required
            .max(self.cap.saturating_mul(2))
            .max(MIN_CAPACITY);
        self.grow_to(new_cap)
    }

    #[track_caller]
    pub fn reserve(&mut self, additional: usize) {
        if let Err(e) = self.try_reserve(additional) {
            super::handle_error(e);
        }
    }

    fn grow_to(&mut self, new_cap: usize) -> Result<(), TrackError> {
        let new_layout = Layout::array::<T>(new_cap).map_err(|_| TrackError::CapacityOverflow)?;
        let new_ptr = self.resource.allocate(new_layout)?.cast::<T>();

        let old_ptr = mem::replace(&mut self.ptr, new_ptr);
        let old_cap = mem::replace(&mut self.cap, new_cap);
        if old_cap == 0 {
            return Ok(());
        }

        unsafe {
            ptr::copy_nonoverlapping(old_ptr.as_ptr(), new_ptr.as_ptr(), self.len);
            self.resource
                .deallocate(old_ptr.cast(), Self::layout_for(old_cap))
        }
    }

    fn layout_for(cap: usize) -> Layout {
        // cap was validated when the block was allocated
        Layout::array::<T>(cap).unwrap_or_else(|_| unreachable!())
    }

    pub fn try_push(&mut self, value: T) -> Result<(), TrackError> {
        if self.len == self.cap {
            self.try_reserve(1)?;
        }
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    #[track_caller]
    pub fn push(&mut self, value: T) {
        if let Err(e) = self.try_push(value) {
            super::handle_error(e);
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(unsafe { self.ptr.as_ptr().add(self.len).read() })
    }

    /// Drops all elements, keeping the storage.
    pub fn clear(&mut self) {
        let elements = ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        self.len = 0;
        unsafe { ptr::drop_in_place(elements) };
    }

    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for TrackedVec<T> {
    fn drop(&mut self) {
        self.clear();
        if !Self::IS_ZST && self.cap > 0 {
            unsafe {
                self.resource
                    .deallocate_or_log(self.ptr.cast(), Self::layout_for(self.cap))
            };
        }
    }
}

impl<T> Deref for TrackedVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> DerefMut for TrackedVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T> Extend<T> for TrackedVec<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.push(value);
        }
    }
}

impl<'a, T> IntoIterator for &'a TrackedVec<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
