//! Central allocation ledger - address-keyed records plus per-category counters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::LedgerError;
use crate::report;
use crate::Category;

/// One tracked allocation.
///
/// Created on insert and filled in exactly once by the matching remove. The
/// dealloc fields stay zero while the allocation is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Bytes requested by the caller.
    pub bytes: u64,
    /// Bytes the allocator actually reserved for the request.
    pub block: u64,
    pub dealloc_bytes: u64,
    pub dealloc_block: u64,
    pub category: Category,
    /// Advisory call-site text, may be empty.
    pub caller: String,
    freed: bool,
}

impl AllocationRecord {
    fn new(bytes: u64, block: u64, category: Category, caller: String) -> Self {
        Self {
            bytes,
            block,
            dealloc_bytes: 0,
            dealloc_block: 0,
            category,
            caller,
            freed: false,
        }
    }

    /// True until the matching remove has been recorded.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.freed
    }

    /// Allocated and deallocated (bytes, block) pairs are identical.
    #[inline]
    pub fn fully_deallocated(&self) -> bool {
        self.bytes == self.dealloc_bytes && self.block == self.dealloc_block
    }
}

/// Cumulative counters for one category or for the grand total.
///
/// Counters only ever grow; outstanding figures are derived on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryUsage {
    pub alloc_bytes: u64,
    pub alloc_block: u64,
    pub dealloc_bytes: u64,
    pub dealloc_block: u64,
}

impl CategoryUsage {
    #[inline]
    fn record_alloc(&mut self, bytes: u64, block: u64) {
        self.alloc_bytes += bytes;
        self.alloc_block += block;
    }

    #[inline]
    fn record_dealloc(&mut self, bytes: u64, block: u64) {
        self.dealloc_bytes += bytes;
        self.dealloc_block += block;
    }

    /// Requested bytes still outstanding.
    #[inline]
    pub fn outstanding_bytes(&self) -> u64 {
        self.alloc_bytes.saturating_sub(self.dealloc_bytes)
    }

    /// Block bytes still outstanding.
    #[inline]
    pub fn outstanding_block(&self) -> u64 {
        self.alloc_block.saturating_sub(self.dealloc_block)
    }

    pub fn is_empty(&self) -> bool {
        *self == CategoryUsage::default()
    }
}

#[derive(Debug, Default)]
struct UsageTable {
    container: CategoryUsage,
    shared: CategoryUsage,
    explicit: CategoryUsage,
    unspecified: CategoryUsage,
}

impl UsageTable {
    fn get(&self, category: Category) -> &CategoryUsage {
        match category {
            Category::Container => &self.container,
            Category::Shared => &self.shared,
            Category::Explicit => &self.explicit,
            Category::Unspecified => &self.unspecified,
        }
    }

    fn get_mut(&mut self, category: Category) -> &mut CategoryUsage {
        match category {
            Category::Container => &mut self.container,
            Category::Shared => &mut self.shared,
            Category::Explicit => &mut self.explicit,
            Category::Unspecified => &mut self.unspecified,
        }
    }
}

/// What happens to a record once its deallocation has been recorded.
///
/// # Variants
///
/// * `KeepAll` - Matched records stay as history and show up in reports (default)
/// * `EvictOnMatch` - Matched records are dropped after the counters are updated,
///   bounding the map to live allocations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Retention {
    #[default]
    KeepAll,
    EvictOnMatch,
}

impl Retention {
    pub(crate) fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep-all" | "keep_all" | "all" => Some(Retention::KeepAll),
            "evict-on-match" | "evict_on_match" | "evict" => Some(Retention::EvictOnMatch),
            _ => None,
        }
    }
}

/// Registry of every tracked allocation, keyed by address.
#[derive(Debug, Default)]
pub struct Ledger {
    records: HashMap<usize, AllocationRecord>,
    usage: UsageTable,
    total: CategoryUsage,
    retention: Retention,
    last_report: String,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Records a fresh allocation at `address`.
    ///
    /// An address whose previous record is already matched is simply reused;
    /// only an unmatched record makes this fail.
    pub fn insert(
        &mut self,
        address: usize,
        bytes: usize,
        block: usize,
        category: Category,
        caller: impl Into<String>,
    ) -> Result<(), LedgerError> {
        if self.records.get(&address).is_some_and(|r| r.is_live()) {
            tracing::error!(address, %category, "insert over a live allocation record");
            return Err(LedgerError::DuplicateLiveAddress { address });
        }

        let (bytes, block) = (bytes as u64, block as u64);
        let caller = caller.into();
        tracing::trace!(address, bytes, block, %category, caller = %caller, "alloc");

        self.records
            .insert(address, AllocationRecord::new(bytes, block, category, caller));
        self.usage.get_mut(category).record_alloc(bytes, block);
        self.total.record_alloc(bytes, block);
        Ok(())
    }

    /// Records the release of the allocation at `address`.
    ///
    /// Only a live record can be released; a second release of the same
    /// allocation fails with [`LedgerError::UnknownAddress`].
    pub fn remove(
        &mut self,
        address: usize,
        bytes: usize,
        block: usize,
        category: Category,
    ) -> Result<(), LedgerError> {
        self.check_live(address, category)?;
        let Some(record) = self.records.get_mut(&address) else {
            return Err(LedgerError::UnknownAddress { address });
        };

        let (bytes, block) = (bytes as u64, block as u64);
        tracing::trace!(address, bytes, block, %category, "dealloc");

        record.dealloc_bytes = bytes;
        record.dealloc_block = block;
        record.freed = true;
        self.usage.get_mut(category).record_dealloc(bytes, block);
        self.total.record_dealloc(bytes, block);

        if self.retention == Retention::EvictOnMatch {
            self.records.remove(&address);
            tracing::debug!(address, "evicted matched record");
        }
        Ok(())
    }

    pub fn get_usage(&self, category: Category) -> CategoryUsage {
        *self.usage.get(category)
    }

    pub fn get_usage_total(&self) -> CategoryUsage {
        self.total
    }

    /// Requested size of the allocation recorded at `address`.
    pub fn get_alloc_bytes(&self, address: usize) -> Result<usize, LedgerError> {
        self.records
            .get(&address)
            .map(|r| r.bytes as usize)
            .ok_or(LedgerError::UnknownAddress { address })
    }

    /// Requested size of the unmatched record at `address`.
    ///
    /// Fails like [`Ledger::remove`] would: an address without a live record
    /// is unknown, and a live record of another category is a mismatch.
    pub fn live_alloc_bytes(&self, address: usize, category: Category) -> Result<usize, LedgerError> {
        self.check_live(address, category).map(|r| r.bytes as usize)
    }

    fn check_live(&self, address: usize, category: Category) -> Result<&AllocationRecord, LedgerError> {
        let Some(record) = self.records.get(&address).filter(|r| r.is_live()) else {
            tracing::error!(address, %category, "release of an address without a live record");
            return Err(LedgerError::UnknownAddress { address });
        };

        if record.category != category {
            tracing::error!(address, recorded = %record.category, requested = %category, "category mismatch");
            return Err(LedgerError::CategoryMismatch {
                address,
                recorded: record.category,
                requested: category,
            });
        }
        Ok(record)
    }

    pub fn get(&self, address: usize) -> Option<&AllocationRecord> {
        self.records.get(&address)
    }

    pub fn records(&self) -> impl Iterator<Item = (usize, &AllocationRecord)> {
        self.records.iter().map(|(addr, r)| (*addr, r))
    }

    /// Records of one category, highest address first.
    pub fn records_in(&self, category: Category) -> Vec<(usize, &AllocationRecord)> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|(_, r)| r.category == category)
            .map(|(addr, r)| (*addr, r))
            .collect();
        records.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records still waiting for their deallocation.
    pub fn live_count(&self) -> usize {
        self.records.values().filter(|r| r.is_live()).count()
    }

    /// Renders the usage report, caches it as the last report and returns it.
    pub fn print_report(&mut self, omit_fully_deallocated: bool, emit_to_console: bool) -> &str {
        let text = report::render(self, omit_fully_deallocated);
        if emit_to_console {
            report::emit_to_console(&text);
        }
        self.last_report = text;
        &self.last_report
    }

    /// Text produced by the most recent [`Ledger::print_report`], empty before the first one.
    pub fn last_report(&self) -> &str {
        &self.last_report
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let categories = Category::ALL
            .into_iter()
            .map(|category| CategorySnapshot {
                category,
                usage: self.get_usage(category),
                records: self
                    .records_in(category)
                    .into_iter()
                    .map(|(address, r)| RecordSnapshot {
                        address,
                        bytes: r.bytes,
                        block: r.block,
                        dealloc_bytes: r.dealloc_bytes,
                        dealloc_block: r.dealloc_block,
                        live: r.is_live(),
                        caller: r.caller.clone(),
                    })
                    .collect(),
            })
            .collect();

        LedgerSnapshot {
            retention: self.retention,
            categories,
            total: self.total,
        }
    }
}

/// Serializable copy of the ledger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub retention: Retention,
    pub categories: Vec<CategorySnapshot>,
    pub total: CategoryUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub category: Category,
    pub usage: CategoryUsage,
    pub records: Vec<RecordSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub address: usize,
    pub bytes: u64,
    pub block: u64,
    pub dealloc_bytes: u64,
    pub dealloc_block: u64,
    pub live: bool,
    pub caller: String,
}
