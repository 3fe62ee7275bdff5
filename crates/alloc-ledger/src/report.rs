//! Text and JSON rendering of ledger state. Read-only: nothing here mutates the ledger.

use colored::*;
use prettytable::{format, Cell, Row, Table};

use crate::ledger::{AllocationRecord, CategoryUsage, Ledger};
use crate::Category;

pub(crate) const REPORT_TITLE: &str = "MEMORY USAGE REPORT";
pub(crate) const TOTAL_TITLE: &str = "TOTAL MEMORY USAGE";
pub(crate) const NO_CALLER: &str = "(no caller specified)";

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Formats a byte count with a binary unit.
///
/// Values up to and including 1024 stay in bytes; larger values are scaled to
/// KiB, MiB or GiB with two decimals.
///
/// # Examples
///
/// ```rust
/// use alloc_ledger::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1024 B");
/// assert_eq!(format_bytes(1536), "1.50 KiB");
/// assert_eq!(format_bytes(1024 * 1024), "1.00 MiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    if bytes <= KIB {
        format!("{} B", bytes)
    } else if bytes < MIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else if bytes < GIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    }
}

pub fn format_address(address: usize) -> String {
    format!("{:#x}", address)
}

fn bytes_and_block(bytes: u64, block: u64) -> String {
    format!("{} ({})", format_bytes(bytes), format_bytes(block))
}

fn usage_line(label: &str, bytes: u64, block: u64) -> String {
    format!(
        "{:<13}{:>12} {:>14}\n",
        label,
        format_bytes(bytes),
        format!("({})", format_bytes(block))
    )
}

fn usage_lines(usage: &CategoryUsage) -> String {
    let mut out = usage_line("Allocated:", usage.alloc_bytes, usage.alloc_block);
    out.push_str(&usage_line(
        "Deallocated:",
        usage.dealloc_bytes,
        usage.dealloc_block,
    ));
    out.push_str(&usage_line(
        "Difference:",
        usage.outstanding_bytes(),
        usage.outstanding_block(),
    ));
    out
}

fn record_row(address: usize, record: &AllocationRecord, omit_fully_deallocated: bool) -> Row {
    let caller = if record.caller.is_empty() {
        NO_CALLER
    } else {
        record.caller.as_str()
    };

    let mut cells = vec![
        Cell::new(caller),
        Cell::new(&format_address(address)).style_spec("r"),
        Cell::new(&bytes_and_block(record.bytes, record.block)).style_spec("r"),
    ];
    if !omit_fully_deallocated {
        cells.push(
            Cell::new(&bytes_and_block(record.dealloc_bytes, record.dealloc_block))
                .style_spec("r"),
        );
    }
    Row::new(cells)
}

fn render_category(ledger: &Ledger, category: Category, omit_fully_deallocated: bool) -> String {
    let rows: Vec<Row> = ledger
        .records_in(category)
        .into_iter()
        .filter(|(_, r)| !(omit_fully_deallocated && r.fully_deallocated()))
        .map(|(address, r)| record_row(address, r, omit_fully_deallocated))
        .collect();

    let usage = ledger.get_usage(category);
    if rows.is_empty() && usage.is_empty() {
        return String::new();
    }

    let mut out = format!("{}\n", category);

    if !rows.is_empty() {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_CLEAN);

        let mut titles = vec![
            Cell::new("CALLER"),
            Cell::new("ADDRESS").style_spec("r"),
            Cell::new("ALLOC (BLOCK)").style_spec("r"),
        ];
        if !omit_fully_deallocated {
            titles.push(Cell::new("DEALLOC (BLOCK)").style_spec("r"));
        }
        table.set_titles(Row::new(titles));

        for row in rows {
            table.add_row(row);
        }
        out.push_str(&table.to_string());
    }

    out.push_str(&usage_lines(&usage));
    out.push('\n');
    out
}

/// Renders the full report: one section per category in [`Category::ALL`]
/// order, followed by the grand total.
///
/// Categories without displayed rows and without any recorded traffic are
/// skipped.
pub(crate) fn render(ledger: &Ledger, omit_fully_deallocated: bool) -> String {
    let mut out = format!("{}\n", REPORT_TITLE);
    for category in Category::ALL {
        out.push_str(&render_category(ledger, category, omit_fully_deallocated));
    }
    out.push_str(TOTAL_TITLE);
    out.push('\n');
    out.push_str(&usage_lines(&ledger.get_usage_total()));
    out
}

pub(crate) fn render_json(ledger: &Ledger, pretty: bool) -> serde_json::Result<String> {
    let snapshot = ledger.snapshot();
    if pretty {
        serde_json::to_string_pretty(&snapshot)
    } else {
        serde_json::to_string(&snapshot)
    }
}

pub(crate) fn emit_to_console(text: &str) {
    println!(
        "{} {}",
        "[alloc-ledger]".blue().bold(),
        "memory usage report".yellow().bold()
    );
    print!("{}", text);
}
