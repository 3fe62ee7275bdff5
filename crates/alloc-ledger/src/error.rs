use std::alloc::Layout;

use thiserror::Error;

use crate::Category;

/// Tracking invariant violations detected by the [`Ledger`](crate::Ledger).
///
/// None of these are transient: each one means the bookkeeping and the real
/// allocator disagree, so the usage figures can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("address {address:#x} already has a live allocation record")]
    DuplicateLiveAddress { address: usize },
    #[error("address {address:#x} is not known to the ledger")]
    UnknownAddress { address: usize },
    #[error("address {address:#x} was recorded as {recorded} but released as {requested}")]
    CategoryMismatch {
        address: usize,
        recorded: Category,
        requested: Category,
    },
}

/// Errors surfaced by the allocation facade and the tracked containers.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("underlying allocator returned null for {0:?}")]
    OutOfMemory(Layout),
    #[error("zero-sized allocations are not tracked")]
    ZeroSized,
    #[error("requested capacity overflows the address space")]
    CapacityOverflow,
}

/// What to do when the ledger reports a violation.
///
/// # Variants
///
/// * `Abort` - Panic immediately (default, fail fast for diagnostic runs)
/// * `Propagate` - Return the error to the caller; violations raised from
///   `Drop` impls are logged with `tracing::error!` instead
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailureMode {
    #[default]
    Abort,
    Propagate,
}

impl FailureMode {
    /// Turns a violation into an error, or panics under [`FailureMode::Abort`].
    #[track_caller]
    pub(crate) fn escalate(self, error: LedgerError) -> TrackError {
        match self {
            FailureMode::Abort => panic!("[alloc-ledger] tracking violation: {error}"),
            FailureMode::Propagate => error.into(),
        }
    }

    /// Applies the policy to a ledger outcome.
    #[track_caller]
    pub(crate) fn check<T>(self, result: Result<T, LedgerError>) -> Result<T, TrackError> {
        result.map_err(|e| self.escalate(e))
    }
}
