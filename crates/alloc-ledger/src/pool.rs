//! Owner of the per-container resources.
//!
//! A growing container copies its contents to new storage and releases the old
//! block; once that happens the old address no longer tells us where the
//! container was created. Giving every tracked container its own resource,
//! stamped with the creation site, keeps the attribution stable across growth.

use std::mem;
use std::rc::Rc;

use crate::allocator::RawAllocator;
use crate::error::FailureMode;
use crate::resource::DelegatingResource;
use crate::sink::AllocationSink;
use crate::{CallSite, Category};

pub struct ResourcePool {
    sink: Rc<dyn AllocationSink>,
    allocator: Rc<dyn RawAllocator>,
    failure_mode: FailureMode,
    resources: Vec<Rc<DelegatingResource>>,
}

impl ResourcePool {
    pub fn new(
        sink: Rc<dyn AllocationSink>,
        allocator: Rc<dyn RawAllocator>,
        failure_mode: FailureMode,
    ) -> Self {
        Self {
            sink,
            allocator,
            failure_mode,
            resources: Vec::new(),
        }
    }

    /// Creates a fresh resource, keeps a handle to it and returns another.
    pub fn issue(&mut self, category: Category, attribution: CallSite) -> Rc<DelegatingResource> {
        let resource = Rc::new(
            DelegatingResource::new(
                Rc::clone(&self.sink),
                Rc::clone(&self.allocator),
                category,
                self.failure_mode,
            )
            .with_attribution(attribution),
        );
        tracing::debug!(
            %category,
            issued = self.resources.len() + 1,
            "issued delegating resource"
        );
        self.resources.push(Rc::clone(&resource));
        resource
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<DelegatingResource>> {
        self.resources.iter()
    }

    /// Bookkeeping overhead in bytes: the pool itself plus one handle and one
    /// resource per issued instance.
    pub fn footprint(&self) -> usize {
        mem::size_of::<Self>()
            + self.resources.len()
                * (mem::size_of::<Rc<DelegatingResource>>() + mem::size_of::<DelegatingResource>())
    }
}

impl Drop for ResourcePool {
    fn drop(&mut self) {
        let released = self.resources.len();
        self.resources.clear();
        tracing::debug!(released, "released pooled resources");
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("issued", &self.resources.len())
            .field("failure_mode", &self.failure_mode)
            .finish_non_exhaustive()
    }
}
