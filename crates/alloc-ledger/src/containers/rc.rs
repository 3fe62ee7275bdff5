use std::alloc::Layout;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use crate::error::TrackError;
use crate::resource::DelegatingResource;
use crate::CallSite;

struct RcBox<T> {
    strong: Cell<usize>,
    value: T,
}

/// Single-threaded shared-ownership pointer allocated through a resource.
///
/// The strong count lives in the same tracked block as the value, so one
/// ledger record covers the whole allocation. The last clone to drop releases
/// it.
pub struct TrackedRc<T> {
    ptr: NonNull<RcBox<T>>,
    resource: Rc<DelegatingResource>,
    _marker: PhantomData<RcBox<T>>,
}

impl<T> TrackedRc<T> {
    pub fn new_in(
        value: T,
        resource: Rc<DelegatingResource>,
        caller: &CallSite,
    ) -> Result<Self, TrackError> {
        let ptr = resource
            .allocate_attributed(Self::layout(), Some(caller))?
            .cast::<RcBox<T>>();
        unsafe {
            ptr.as_ptr().write(RcBox {
                strong: Cell::new(1),
                value,
            })
        };

        Ok(Self {
            ptr,
            resource,
            _marker: PhantomData,
        })
    }

    fn layout() -> Layout {
        Layout::new::<RcBox<T>>()
    }

    fn inner(&self) -> &RcBox<T> {
        unsafe { self.ptr.as_ref() }
    }

    pub fn strong_count(this: &Self) -> usize {
        this.inner().strong.get()
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    pub fn resource(this: &Self) -> &Rc<DelegatingResource> {
        &this.resource
    }

    /// Address of the tracked block, as recorded in the ledger.
    pub fn address(this: &Self) -> usize {
        this.ptr.as_ptr() as usize
    }
}

impl<T> Clone for TrackedRc<T> {
    fn clone(&self) -> Self {
        let strong = &self.inner().strong;
        strong.set(strong.get() + 1);
        Self {
            ptr: self.ptr,
            resource: Rc::clone(&self.resource),
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for TrackedRc<T> {
    fn drop(&mut self) {
        let strong = &self.inner().strong;
        let remaining = strong.get() - 1;
        strong.set(remaining);
        if remaining > 0 {
            return;
        }

        unsafe {
            ptr::drop_in_place(ptr::addr_of_mut!((*self.ptr.as_ptr()).value));
            self.resource
                .deallocate_or_log(self.ptr.cast(), Self::layout());
        }
    }
}

impl<T> Deref for TrackedRc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedRc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display> fmt::Display for TrackedRc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::GranularAllocator;
    use crate::error::FailureMode;
    use crate::{Category, Ledger};
    use std::cell::RefCell;

    fn setup() -> (Rc<RefCell<Ledger>>, Rc<DelegatingResource>) {
        let ledger = Rc::new(RefCell::new(Ledger::new()));
        let resource = DelegatingResource::new(
            ledger.clone(),
            Rc::new(GranularAllocator::new(16)),
            Category::Shared,
            FailureMode::Abort,
        );
        (ledger, Rc::new(resource))
    }

    #[test]
    fn test_clones_share_one_allocation() {
        let (ledger, resource) = setup();
        let site = CallSite::new("rc.rs", 3).with_kind("TrackedRc<>");
        let a = TrackedRc::new_in(String::from("hello"), resource, &site).unwrap();
        let b = a.clone();

        assert!(TrackedRc::ptr_eq(&a, &b));
        assert_eq!(TrackedRc::strong_count(&a), 2);
        assert_eq!(*b, "hello");
        assert_eq!(ledger.borrow().len(), 1);

        let record = ledger.borrow().get(TrackedRc::address(&a)).cloned().unwrap();
        assert_eq!(record.bytes as usize, std::mem::size_of::<RcBox<String>>());
        assert_eq!(record.caller, "rc.rs:3  TrackedRc<>");

        drop(a);
        assert_eq!(ledger.borrow().live_count(), 1);
        drop(b);
        assert_eq!(ledger.borrow().live_count(), 0);
        assert_eq!(
            ledger.borrow().get_usage(Category::Shared).outstanding_bytes(),
            0
        );
    }

    #[test]
    fn test_value_dropped_with_last_owner() {
        let (_ledger, resource) = setup();
        let marker = Rc::new(());
        let site = CallSite::new("rc.rs", 4);
        let a = TrackedRc::new_in(Rc::clone(&marker), resource, &site).unwrap();
        let b = a.clone();
        drop(a);
        assert_eq!(Rc::strong_count(&marker), 2);
        drop(b);
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
