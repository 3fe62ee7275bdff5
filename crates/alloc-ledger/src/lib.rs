//! Allocation accounting for Rust programs that want to observe their own memory footprint.
//! Every allocation made through a [`Tracker`] is recorded in a [`Ledger`] by category and call site,
//! and can be rendered as a human-readable usage report or a JSON snapshot.
//!
//! ## Usage
//!
//! ```rust
//! use alloc_ledger::Tracker;
//!
//! let tracker = Tracker::new();
//!
//! let mut ids = tracker.tracked_vec::<u32>();
//! ids.extend(0..20);
//! let name = tracker.tracked_rc(String::from("config")).unwrap();
//!
//! let buffer = tracker.allocate_array::<u8>(4096).unwrap();
//! unsafe { tracker.deallocate_array(buffer).unwrap() };
//!
//! let report = tracker.generate_report(false, false);
//! assert!(report.starts_with("MEMORY USAGE REPORT"));
//! # drop((ids, name));
//! ```
//!
//! Tracking is single-threaded: a tracker and the containers it hands out are `!Send`.

pub mod allocator;
pub mod caller;
pub mod category;
pub mod containers;
pub mod error;
pub mod ledger;
pub mod pool;
pub(crate) mod report;
pub mod resource;
pub mod sink;
pub mod tracker;

pub use allocator::{GranularAllocator, RawAllocator, SystemAllocator};
pub use caller::{shorten_function_name, CallSite};
pub use category::Category;
pub use containers::{TrackedRc, TrackedVec};
pub use error::{FailureMode, LedgerError, TrackError};
pub use ledger::{
    AllocationRecord, CategorySnapshot, CategoryUsage, Ledger, LedgerSnapshot, RecordSnapshot,
    Retention,
};
pub use pool::ResourcePool;
pub use report::{format_address, format_bytes};
pub use resource::DelegatingResource;
pub use sink::AllocationSink;
pub use tracker::{Format, Tracker, TrackerBuilder};
