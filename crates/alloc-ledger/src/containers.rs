//! Containers whose storage is allocated through a [`DelegatingResource`](crate::DelegatingResource).

pub mod rc;
pub mod vec;

pub use rc::TrackedRc;
pub use vec::TrackedVec;

use crate::error::TrackError;

/// Infallible container operations fail the same way std collections do.
#[cold]
#[track_caller]
fn handle_error(error: TrackError) -> ! {
    match error {
        TrackError::OutOfMemory(layout) => std::alloc::handle_alloc_error(layout),
        other => panic!("[alloc-ledger] {other}"),
    }
}
