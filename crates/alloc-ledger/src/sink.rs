use std::cell::RefCell;

use crate::error::LedgerError;
use crate::{Category, Ledger};

/// Receiver of allocation events, injected into every
/// [`DelegatingResource`](crate::DelegatingResource).
pub trait AllocationSink {
    fn insert(
        &self,
        address: usize,
        bytes: usize,
        block: usize,
        category: Category,
        caller: String,
    ) -> Result<(), LedgerError>;

    fn remove(
        &self,
        address: usize,
        bytes: usize,
        block: usize,
        category: Category,
    ) -> Result<(), LedgerError>;

    /// Requested size of the live allocation at `address`, which must have
    /// been recorded under `category`.
    fn live_alloc_bytes(&self, address: usize, category: Category) -> Result<usize, LedgerError>;
}

impl AllocationSink for RefCell<Ledger> {
    fn insert(
        &self,
        address: usize,
        bytes: usize,
        block: usize,
        category: Category,
        caller: String,
    ) -> Result<(), LedgerError> {
        self.borrow_mut()
            .insert(address, bytes, block, category, caller)
    }

    fn remove(
        &self,
        address: usize,
        bytes: usize,
        block: usize,
        category: Category,
    ) -> Result<(), LedgerError> {
        self.borrow_mut().remove(address, bytes, block, category)
    }

    fn live_alloc_bytes(&self, address: usize, category: Category) -> Result<usize, LedgerError> {
        self.borrow().live_alloc_bytes(address, category)
    }
}
