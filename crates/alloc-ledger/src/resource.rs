//! Allocator facade that reports every allocation to a sink before handing it out.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::allocator::RawAllocator;
use crate::error::{FailureMode, TrackError};
use crate::sink::AllocationSink;
use crate::{CallSite, Category};

/// Wraps one underlying allocator and records every event with an [`AllocationSink`].
///
/// Each instance is bound to a single [`Category`]; allocations and releases
/// made through it are always reported under that category. Two resources are
/// equal only if they are the same instance, so distinct containers never
/// share a tracking identity.
///
/// A resource may carry a default attribution, fixed at construction. Callers
/// can override it per call with [`DelegatingResource::allocate_attributed`].
pub struct DelegatingResource {
    category: Category,
    attribution: Option<CallSite>,
    sink: Rc<dyn AllocationSink>,
    allocator: Rc<dyn RawAllocator>,
    failure_mode: FailureMode,
}

impl DelegatingResource {
    pub fn new(
        sink: Rc<dyn AllocationSink>,
        allocator: Rc<dyn RawAllocator>,
        category: Category,
        failure_mode: FailureMode,
    ) -> Self {
        Self {
            category,
            attribution: None,
            sink,
            allocator,
            failure_mode,
        }
    }

    pub fn with_attribution(mut self, attribution: CallSite) -> Self {
        self.attribution = Some(attribution);
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn attribution(&self) -> Option<&CallSite> {
        self.attribution.as_ref()
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Allocates with the resource's own attribution.
    pub fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, TrackError> {
        self.allocate_attributed(layout, self.attribution.as_ref())
    }

    /// Allocates `layout`, records it, and returns the address.
    ///
    /// The true block size is queried from the underlying allocator right
    /// after the allocation. If the sink rejects the event under
    /// [`FailureMode::Propagate`], the memory is released again before the
    /// error is returned.
    pub fn allocate_attributed(
        &self,
        layout: Layout,
        caller: Option<&CallSite>,
    ) -> Result<NonNull<u8>, TrackError> {
        if layout.size() == 0 {
            return Err(TrackError::ZeroSized);
        }

        let ptr = self
            .allocator
            .allocate(layout)
            .ok_or(TrackError::OutOfMemory(layout))?;
        let block = unsafe { self.allocator.usable_size(ptr, layout) };
        let signature = caller.map(CallSite::signature).unwrap_or_default();

        let outcome = self.sink.insert(
            ptr.as_ptr() as usize,
            layout.size(),
            block,
            self.category,
            signature,
        );
        if let Err(e) = self.failure_mode.check(outcome) {
            unsafe { self.allocator.deallocate(ptr, layout) };
            return Err(e);
        }

        Ok(ptr)
    }

    /// Records the release of `ptr` and frees it through the underlying allocator.
    ///
    /// The sink must hold a live record of this resource's category for
    /// `ptr`. Otherwise nothing is freed and the violation is escalated
    /// according to the [`FailureMode`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this resource with the same `layout`.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> Result<(), TrackError> {
        let address = ptr.as_ptr() as usize;
        self.failure_mode
            .check(self.sink.live_alloc_bytes(address, self.category))?;

        let block = unsafe { self.allocator.usable_size(ptr, layout) };
        self.failure_mode
            .check(self.sink.remove(address, layout.size(), block, self.category))?;
        unsafe { self.allocator.deallocate(ptr, layout) };
        Ok(())
    }

    /// Same as [`DelegatingResource::deallocate`], for callers that cannot return an error.
    ///
    /// # Safety
    ///
    /// Same contract as `deallocate`.
    pub(crate) unsafe fn deallocate_or_log(&self, ptr: NonNull<u8>, layout: Layout) {
        if let Err(e) = unsafe { self.deallocate(ptr, layout) } {
            tracing::error!(error = %e, category = %self.category, "release rejected, block not freed");
        }
    }

    /// Requested size of the live allocation at `ptr`.
    ///
    /// Fails unless the sink holds a live record for `ptr` made under this
    /// resource's category.
    pub fn recorded_size(&self, ptr: NonNull<u8>) -> Result<usize, TrackError> {
        self.failure_mode
            .check(self.sink.live_alloc_bytes(ptr.as_ptr() as usize, self.category))
    }

    pub fn is_same(&self, other: &DelegatingResource) -> bool {
        std::ptr::eq(self, other)
    }
}

impl PartialEq for DelegatingResource {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl Eq for DelegatingResource {}

impl fmt::Debug for DelegatingResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatingResource")
            .field("category", &self.category)
            .field("attribution", &self.attribution)
            .field("failure_mode", &self.failure_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::GranularAllocator;
    use crate::error::LedgerError;
    use crate::Ledger;
    use std::cell::{Cell, RefCell};

    fn setup(category: Category, mode: FailureMode) -> (Rc<RefCell<Ledger>>, DelegatingResource) {
        let ledger = Rc::new(RefCell::new(Ledger::new()));
        let resource = DelegatingResource::new(
            ledger.clone(),
            Rc::new(GranularAllocator::new(16)),
            category,
            mode,
        );
        (ledger, resource)
    }

    #[test]
    fn test_allocate_records_block_size_and_caller() {
        let (ledger, resource) = setup(Category::Unspecified, FailureMode::Abort);
        let resource = resource.with_attribution(CallSite::new("lib.rs", 7).with_kind("raw"));

        let layout = Layout::from_size_align(40, 8).unwrap();
        let ptr = resource.allocate(layout).unwrap();
        {
            let ledger = ledger.borrow();
            let record = ledger.get(ptr.as_ptr() as usize).unwrap();
            assert_eq!(record.bytes, 40);
            assert_eq!(record.block, 48);
            assert_eq!(record.caller, "lib.rs:7  raw");
            assert_eq!(record.category, Category::Unspecified);
        }

        unsafe { resource.deallocate(ptr, layout).unwrap() };
        let usage = ledger.borrow().get_usage(Category::Unspecified);
        assert_eq!(usage.outstanding_bytes(), 0);
        assert_eq!(usage.dealloc_block, 48);
    }

    #[test]
    fn test_per_call_attribution_overrides_default() {
        let (ledger, resource) = setup(Category::Shared, FailureMode::Abort);
        let resource = resource.with_attribution(CallSite::new("default.rs", 1));
        let layout = Layout::new::<u64>();

        let site = CallSite::new("override.rs", 2);
        let ptr = resource.allocate_attributed(layout, Some(&site)).unwrap();
        assert_eq!(
            ledger.borrow().get(ptr.as_ptr() as usize).unwrap().caller,
            "override.rs:2"
        );
        assert_eq!(resource.recorded_size(ptr).unwrap(), 8);
        unsafe { resource.deallocate(ptr, layout).unwrap() };
    }

    #[test]
    fn test_zero_sized_rejected() {
        let (ledger, resource) = setup(Category::Explicit, FailureMode::Propagate);
        let result = resource.allocate(Layout::new::<()>());
        assert!(matches!(result, Err(TrackError::ZeroSized)));
        assert!(ledger.borrow().is_empty());
    }

    #[test]
    fn test_identity_equality() {
        let (ledger, a) = setup(Category::Container, FailureMode::Abort);
        let b = DelegatingResource::new(
            ledger,
            Rc::new(GranularAllocator::new(16)),
            Category::Container,
            FailureMode::Abort,
        );
        assert_eq!(a, a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_release_under_wrong_category_propagates() {
        let ledger = Rc::new(RefCell::new(Ledger::new()));
        let allocator: Rc<dyn RawAllocator> = Rc::new(GranularAllocator::new(16));
        let shared = DelegatingResource::new(
            ledger.clone(),
            allocator.clone(),
            Category::Shared,
            FailureMode::Propagate,
        );
        let explicit = DelegatingResource::new(
            ledger.clone(),
            allocator,
            Category::Explicit,
            FailureMode::Propagate,
        );

        let layout = Layout::new::<[u8; 32]>();
        let ptr = shared.allocate(layout).unwrap();
        let err = unsafe { explicit.deallocate(ptr, layout) }.unwrap_err();
        assert!(matches!(
            err,
            TrackError::Ledger(LedgerError::CategoryMismatch {
                recorded: Category::Shared,
                requested: Category::Explicit,
                ..
            })
        ));
        // the ledger still considers the block live and nothing was freed
        assert_eq!(ledger.borrow().live_count(), 1);
        unsafe { shared.deallocate(ptr, layout).unwrap() };
    }

    /// Hands out the same block on every call and counts outstanding ones.
    struct FixedAllocator {
        storage: Box<[u64; 8]>,
        live: Cell<isize>,
    }

    impl FixedAllocator {
        fn new() -> Self {
            Self {
                storage: Box::new([0; 8]),
                live: Cell::new(0),
            }
        }
    }

    unsafe impl RawAllocator for FixedAllocator {
        fn allocate(&self, _layout: Layout) -> Option<NonNull<u8>> {
            self.live.set(self.live.get() + 1);
            Some(NonNull::from(&*self.storage).cast())
        }

        unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
            self.live.set(self.live.get() - 1);
        }

        unsafe fn usable_size(&self, _ptr: NonNull<u8>, layout: Layout) -> usize {
            layout.size()
        }
    }

    fn fixed_resource() -> (Rc<RefCell<Ledger>>, Rc<FixedAllocator>, DelegatingResource) {
        let ledger = Rc::new(RefCell::new(Ledger::new()));
        let allocator = Rc::new(FixedAllocator::new());
        let resource = DelegatingResource::new(
            ledger.clone(),
            allocator.clone(),
            Category::Explicit,
            FailureMode::Propagate,
        );
        (ledger, allocator, resource)
    }

    #[test]
    fn test_rejected_insert_releases_fresh_block() {
        let (ledger, allocator, resource) = fixed_resource();
        let layout = Layout::new::<[u64; 4]>();

        let first = resource.allocate(layout).unwrap();
        let err = resource.allocate(layout).unwrap_err();
        assert!(matches!(
            err,
            TrackError::Ledger(LedgerError::DuplicateLiveAddress { .. })
        ));
        assert_eq!(allocator.live.get(), 1);

        let usage = ledger.borrow().get_usage(Category::Explicit);
        assert_eq!(usage.alloc_bytes, 32);
        assert_eq!(usage.alloc_block, 32);
        assert_eq!(ledger.borrow().live_count(), 1);

        unsafe { resource.deallocate(first, layout).unwrap() };
        assert_eq!(allocator.live.get(), 0);
    }

    #[test]
    fn test_second_release_is_not_forwarded() {
        let (ledger, allocator, resource) = fixed_resource();
        let layout = Layout::new::<u64>();

        let ptr = resource.allocate(layout).unwrap();
        unsafe { resource.deallocate(ptr, layout).unwrap() };
        let err = unsafe { resource.deallocate(ptr, layout) }.unwrap_err();

        assert!(matches!(
            err,
            TrackError::Ledger(LedgerError::UnknownAddress { .. })
        ));
        assert_eq!(allocator.live.get(), 0);
        assert_eq!(ledger.borrow().get_usage(Category::Explicit).dealloc_bytes, 8);
        assert!(resource.recorded_size(ptr).is_err());
    }

    #[test]
    #[should_panic(expected = "tracking violation")]
    fn test_abort_mode_panics_on_unknown_address() {
        let (_ledger, resource) = setup(Category::Explicit, FailureMode::Abort);
        let _ = resource.recorded_size(NonNull::dangling());
    }
}
