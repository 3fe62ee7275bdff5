//! Context object tying a ledger, a resource pool and the dedicated resources together.

use std::alloc::Layout;
use std::cell::{Ref, RefCell};
use std::mem;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use crate::allocator::{RawAllocator, SystemAllocator};
use crate::containers::{TrackedRc, TrackedVec};
use crate::error::{FailureMode, TrackError};
use crate::ledger::{CategoryUsage, Ledger, Retention};
use crate::pool::ResourcePool;
use crate::resource::DelegatingResource;
use crate::sink::AllocationSink;
use crate::{report, CallSite, Category};

const RETENTION_ENV: &str = "ALLOC_LEDGER_RETENTION";
const JSON_ENV: &str = "ALLOC_LEDGER_JSON";

/// Output format for the report printed when a [`Tracker`] is dropped.
///
/// # Variants
///
/// * `Table` - Human-readable table format (default)
/// * `Json` - Compact JSON format (single line)
/// * `JsonPretty` - Pretty-printed JSON format with indentation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Table,
    Json,
    JsonPretty,
}

/// Entry point for tracked allocations.
///
/// Owns one [`Ledger`] and every resource that reports into it. Trackers are
/// independent of each other, so a test can build its own and inspect the
/// ledger without interference from other code.
///
/// The tracker and everything allocated through it are tied to the thread
/// that created them.
///
/// # Examples
///
/// ```rust
/// use alloc_ledger::{Category, Tracker};
///
/// let tracker = Tracker::new();
///
/// let mut values = tracker.tracked_vec::<u64>();
/// values.extend([1, 2, 3]);
///
/// let usage = tracker.usage(Category::Container);
/// assert_eq!(usage.outstanding_bytes(), 4 * 8);
///
/// let report = tracker.generate_report(false, false);
/// assert!(report.contains("Category::Container"));
/// ```
pub struct Tracker {
    ledger: Rc<RefCell<Ledger>>,
    pool: RefCell<ResourcePool>,
    shared: Rc<DelegatingResource>,
    explicit: Rc<DelegatingResource>,
    format: Format,
    report_on_drop: bool,
}

impl Tracker {
    /// Tracker with default settings, after environment overrides.
    pub fn new() -> Self {
        TrackerBuilder::new().build()
    }

    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::new()
    }

    /// Creates an empty vector with its own pool-issued resource,
    /// attributed to the caller.
    #[track_caller]
    pub fn tracked_vec<T>(&self) -> TrackedVec<T> {
        self.tracked_vec_at(CallSite::caller())
    }

    /// Like [`Tracker::tracked_vec`], with an explicit attribution.
    pub fn tracked_vec_at<T>(&self, site: CallSite) -> TrackedVec<T> {
        let resource = self
            .pool
            .borrow_mut()
            .issue(Category::Container, site.or_kind("TrackedVec<>"));
        TrackedVec::new_in(resource)
    }

    /// Moves `value` into a shared allocation made through the Shared resource.
    #[track_caller]
    pub fn tracked_rc<T>(&self, value: T) -> Result<TrackedRc<T>, TrackError> {
        self.tracked_rc_at(value, CallSite::caller())
    }

    pub fn tracked_rc_at<T>(&self, value: T, site: CallSite) -> Result<TrackedRc<T>, TrackError> {
        TrackedRc::new_in(
            value,
            Rc::clone(&self.shared),
            &site.or_kind("TrackedRc<>"),
        )
    }

    /// Moves `value` into a fresh allocation tracked under [`Category::Explicit`].
    ///
    /// Release it with [`Tracker::deallocate`].
    #[track_caller]
    pub fn allocate<T>(&self, value: T) -> Result<NonNull<T>, TrackError> {
        self.allocate_at(value, CallSite::caller())
    }

    pub fn allocate_at<T>(&self, value: T, site: CallSite) -> Result<NonNull<T>, TrackError> {
        let ptr = self
            .explicit
            .allocate_attributed(Layout::new::<T>(), Some(&site.or_kind("new()")))?
            .cast::<T>();
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Allocates `count` default-initialized values tracked under [`Category::Explicit`].
    ///
    /// Release them with [`Tracker::deallocate_array`].
    #[track_caller]
    pub fn allocate_array<T: Default>(&self, count: usize) -> Result<NonNull<T>, TrackError> {
        self.allocate_array_at(count, CallSite::caller())
    }

    pub fn allocate_array_at<T: Default>(
        &self,
        count: usize,
        site: CallSite,
    ) -> Result<NonNull<T>, TrackError> {
        let layout = Layout::array::<T>(count).map_err(|_| TrackError::CapacityOverflow)?;
        let ptr = self
            .explicit
            .allocate_attributed(layout, Some(&site.or_kind("new[]")))?
            .cast::<T>();
        for i in 0..count {
            unsafe { ptr.as_ptr().add(i).write(T::default()) };
        }
        Ok(ptr)
    }

    /// Drops the value behind `ptr` and releases its allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Tracker::allocate`] on this tracker and must not
    /// be used afterwards.
    pub unsafe fn deallocate<T>(&self, ptr: NonNull<T>) -> Result<(), TrackError> {
        let bytes = self.explicit.recorded_size(ptr.cast())?;
        let layout = Layout::from_size_align(bytes, mem::align_of::<T>())
            .map_err(|_| TrackError::CapacityOverflow)?;
        unsafe {
            ptr::drop_in_place(ptr.as_ptr());
            self.explicit.deallocate(ptr.cast(), layout)
        }
    }

    /// Drops every element of an array and releases its allocation.
    ///
    /// The element count is recovered from the size the ledger recorded.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Tracker::allocate_array`] on this tracker and
    /// must not be used afterwards.
    pub unsafe fn deallocate_array<T>(&self, ptr: NonNull<T>) -> Result<(), TrackError> {
        let bytes = self.explicit.recorded_size(ptr.cast())?;
        let count = bytes / mem::size_of::<T>().max(1);
        let layout = Layout::array::<T>(count).map_err(|_| TrackError::CapacityOverflow)?;
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr.as_ptr(), count));
            self.explicit.deallocate(ptr.cast(), layout)
        }
    }

    /// Renders the usage report and caches it in the ledger.
    pub fn generate_report(&self, omit_fully_deallocated: bool, emit_to_console: bool) -> String {
        self.ledger
            .borrow_mut()
            .print_report(omit_fully_deallocated, emit_to_console)
            .to_string()
    }

    pub fn report_json(&self, pretty: bool) -> serde_json::Result<String> {
        report::render_json(&self.ledger.borrow(), pretty)
    }

    pub fn usage(&self, category: Category) -> CategoryUsage {
        self.ledger.borrow().get_usage(category)
    }

    pub fn usage_total(&self) -> CategoryUsage {
        self.ledger.borrow().get_usage_total()
    }

    /// Borrows the ledger for inspection.
    ///
    /// Do not hold the borrow across tracked allocations, they need to update it.
    pub fn ledger(&self) -> Ref<'_, Ledger> {
        self.ledger.borrow()
    }

    /// Number of resources the pool has issued so far.
    pub fn pool_len(&self) -> usize {
        self.pool.borrow().len()
    }

    pub fn pool_footprint(&self) -> usize {
        self.pool.borrow().footprint()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    fn print_on_drop(&self) {
        match self.format {
            Format::Table => {
                self.generate_report(false, true);
            }
            Format::Json | Format::JsonPretty => {
                match self.report_json(self.format == Format::JsonPretty) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::error!(error = %e, "failed to serialize ledger"),
                }
            }
        }
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if self.report_on_drop {
            self.print_on_drop();
        }
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("records", &self.ledger.borrow().len())
            .field("pool", &*self.pool.borrow())
            .field("format", &self.format)
            .field("report_on_drop", &self.report_on_drop)
            .finish()
    }
}

/// Builder for [`Tracker`].
///
/// # Examples
///
/// ```rust
/// use alloc_ledger::{FailureMode, GranularAllocator, Retention, Tracker};
///
/// let tracker = Tracker::builder()
///     .retention(Retention::EvictOnMatch)
///     .failure_mode(FailureMode::Propagate)
///     .allocator(GranularAllocator::new(16))
///     .build();
///
/// let ptr = tracker.allocate(7u32).unwrap();
/// assert_eq!(tracker.ledger().live_count(), 1);
/// unsafe { tracker.deallocate(ptr).unwrap() };
/// assert_eq!(tracker.usage_total().outstanding_block(), 0);
/// ```
///
/// # Environment
///
/// `build()` applies these overrides on top of the configured values:
///
/// * `ALLOC_LEDGER_RETENTION` - `keep-all` or `evict-on-match`
/// * `ALLOC_LEDGER_JSON` - `1` or `true` switches a table drop report to JSON
pub struct TrackerBuilder {
    retention: Retention,
    failure_mode: FailureMode,
    format: Format,
    report_on_drop: bool,
    allocator: Rc<dyn RawAllocator>,
}

impl TrackerBuilder {
    pub fn new() -> Self {
        Self {
            retention: Retention::default(),
            failure_mode: FailureMode::default(),
            format: Format::default(),
            report_on_drop: false,
            allocator: Rc::new(SystemAllocator),
        }
    }

    /// What happens to a record once its release has been recorded.
    ///
    /// Default: [`Retention::KeepAll`]
    pub fn retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Default: [`FailureMode::Abort`]
    pub fn failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Format of the report printed on drop. Has no effect unless
    /// [`TrackerBuilder::report_on_drop`] is enabled.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn report_on_drop(mut self, enabled: bool) -> Self {
        self.report_on_drop = enabled;
        self
    }

    /// Underlying allocator every resource delegates to.
    ///
    /// Default: [`SystemAllocator`]
    pub fn allocator(mut self, allocator: impl RawAllocator + 'static) -> Self {
        self.allocator = Rc::new(allocator);
        self
    }

    pub fn build(self) -> Tracker {
        let mut retention = self.retention;
        if let Ok(value) = std::env::var(RETENTION_ENV) {
            match Retention::from_env_value(&value) {
                Some(parsed) => retention = parsed,
                None => tracing::warn!(%value, "ignoring unknown {}", RETENTION_ENV),
            }
        }

        let json_requested = std::env::var(JSON_ENV)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        let format = if json_requested && self.format == Format::Table {
            Format::Json
        } else {
            self.format
        };

        let ledger = Rc::new(RefCell::new(Ledger::with_retention(retention)));
        let sink: Rc<dyn AllocationSink> = ledger.clone();
        let dedicated = |category| {
            Rc::new(DelegatingResource::new(
                Rc::clone(&sink),
                Rc::clone(&self.allocator),
                category,
                self.failure_mode,
            ))
        };
        let shared = dedicated(Category::Shared);
        let explicit = dedicated(Category::Explicit);
        let pool = ResourcePool::new(Rc::clone(&sink), Rc::clone(&self.allocator), self.failure_mode);

        tracing::debug!(?retention, failure_mode = ?self.failure_mode, ?format, "tracker ready");

        Tracker {
            ledger,
            pool: RefCell::new(pool),
            shared,
            explicit,
            format,
            report_on_drop: self.report_on_drop,
        }
    }
}

impl Default for TrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
