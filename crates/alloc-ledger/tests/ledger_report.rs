use alloc_ledger::{format_bytes, Category, Ledger, LedgerError};

fn parse_size(text: &str) -> f64 {
    let (value, unit) = text.trim().split_once(' ').expect("value and unit");
    let scale = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        other => panic!("unexpected unit {other}"),
    };
    value.parse::<f64>().expect("numeric value") * scale
}

fn unit_of(bytes: u64) -> f64 {
    let text = format_bytes(bytes);
    parse_size(&format!("1 {}", text.rsplit(' ').next().unwrap()))
}

/// Returns the (bytes, block) pair of a summary line such as
/// `Allocated:     2.93 KiB     (2.94 KiB)`.
fn parse_usage_line(line: &str, label: &str) -> (f64, f64) {
    let rest = line.strip_prefix(label).expect("label");
    let (bytes, block) = rest.split_once('(').expect("block figure");
    (parse_size(bytes), parse_size(block.trim().trim_end_matches(')')))
}

fn section<'a>(report: &'a str, title: &str) -> Vec<&'a str> {
    report
        .lines()
        .skip_while(|line| *line != title)
        .skip(1)
        .take_while(|line| !line.is_empty())
        .collect()
}

fn populated_ledger() -> Ledger {
    let mut ledger = Ledger::new();
    let sizes = [40usize, 1024, 3010, 70_000, 2 * 1024 * 1024 + 17];
    for (i, bytes) in sizes.iter().enumerate() {
        let address = 0x10_000 + i * 0x1000;
        let category = Category::ALL[i % Category::ALL.len()];
        let block = (bytes + 15) & !15;
        ledger
            .insert(address, *bytes, block, category, format!("site_{i}"))
            .unwrap();
    }
    ledger.remove(0x10_000, 40, 48, Category::Container).unwrap();
    ledger
        .remove(0x10_000 + 2 * 0x1000, 3010, 3024, Category::Explicit)
        .unwrap();
    ledger
}

#[test]
fn test_scenario_a_roundtrip() {
    let mut ledger = Ledger::new();
    ledger.insert(0x1000, 40, 48, Category::Explicit, "f").unwrap();
    assert_eq!(ledger.get_alloc_bytes(0x1000), Ok(40));
    ledger.remove(0x1000, 40, 48, Category::Explicit).unwrap();
    assert_eq!(ledger.get_usage(Category::Explicit).outstanding_bytes(), 0);
    assert_eq!(ledger.get_usage(Category::Explicit).outstanding_block(), 0);
}

#[test]
fn test_scenario_b_category_mismatch() {
    let mut ledger = Ledger::new();
    ledger.insert(0x2000, 8, 8, Category::Container, "g").unwrap();
    assert_eq!(
        ledger.remove(0x2000, 8, 8, Category::Explicit),
        Err(LedgerError::CategoryMismatch {
            address: 0x2000,
            recorded: Category::Container,
            requested: Category::Explicit,
        })
    );
}

#[test]
fn test_outstanding_matches_live_records() {
    let mut ledger = Ledger::new();
    let mut live: Vec<(usize, usize, usize, Category)> = Vec::new();

    for i in 0..64usize {
        let address = 0x4000 + i * 0x40;
        let bytes = 1 + (i * 37) % 500;
        let block = (bytes + 15) & !15;
        let category = Category::ALL[i % 4];
        ledger.insert(address, bytes, block, category, "").unwrap();
        live.push((address, bytes, block, category));

        if i % 3 == 2 {
            let (address, bytes, block, category) = live.remove(i % live.len());
            ledger.remove(address, bytes, block, category).unwrap();

            for category in Category::ALL {
                let expected: u64 = live
                    .iter()
                    .filter(|entry| entry.3 == category)
                    .map(|entry| entry.1 as u64)
                    .sum();
                let expected_block: u64 = live
                    .iter()
                    .filter(|entry| entry.3 == category)
                    .map(|entry| entry.2 as u64)
                    .sum();
                let usage = ledger.get_usage(category);
                assert_eq!(usage.outstanding_bytes(), expected);
                assert_eq!(usage.outstanding_block(), expected_block);
            }
        }
    }

    assert_eq!(ledger.live_count(), live.len());
}

#[test]
fn test_report_sums_parse_back_to_counters() {
    let mut ledger = populated_ledger();
    let report = ledger.print_report(false, false).to_string();

    for category in Category::ALL {
        let title = category.to_string();
        let lines = section(&report, &title);
        let usage = ledger.get_usage(category);
        if lines.is_empty() {
            assert!(usage.is_empty());
            continue;
        }

        let allocated = lines.iter().find(|l| l.starts_with("Allocated:")).unwrap();
        let deallocated = lines.iter().find(|l| l.starts_with("Deallocated:")).unwrap();

        let (bytes, block) = parse_usage_line(allocated, "Allocated:");
        assert!((bytes - usage.alloc_bytes as f64).abs() <= 0.01 * unit_of(usage.alloc_bytes));
        assert!((block - usage.alloc_block as f64).abs() <= 0.01 * unit_of(usage.alloc_block));

        let (bytes, block) = parse_usage_line(deallocated, "Deallocated:");
        assert!(
            (bytes - usage.dealloc_bytes as f64).abs() <= 0.01 * unit_of(usage.dealloc_bytes)
        );
        assert!(
            (block - usage.dealloc_block as f64).abs() <= 0.01 * unit_of(usage.dealloc_block)
        );
    }
}

#[test]
fn test_report_is_idempotent() {
    let mut ledger = populated_ledger();
    let first = ledger.print_report(false, false).to_string();
    let second = ledger.print_report(false, false).to_string();
    assert_eq!(first, second);
    assert_eq!(ledger.last_report(), second);
}

#[test]
fn test_report_rows_sorted_by_descending_address() {
    let mut ledger = Ledger::new();
    for address in [0x3000usize, 0x9000, 0x1000, 0x5000] {
        ledger
            .insert(address, 16, 16, Category::Shared, format!("at_{address:x}"))
            .unwrap();
    }
    let report = ledger.print_report(false, false).to_string();

    let positions: Vec<usize> = ["0x9000", "0x5000", "0x3000", "0x1000"]
        .iter()
        .map(|addr| report.find(addr).expect("address in report"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{report}");
}

#[test]
fn test_unit_boundaries() {
    assert_eq!(format_bytes(1024), "1024 B");
    assert_eq!(format_bytes(1024 * 1024 - 1), "1024.00 KiB");
    assert!(format_bytes(1024 * 1024 - 1).ends_with("KiB"));
    assert_eq!(format_bytes(1024 * 1024), "1.00 MiB");
    assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GiB");
}

#[test]
fn test_scenario_d_omit_fully_deallocated() {
    let mut ledger = Ledger::new();
    ledger
        .insert(0xa000, 64, 64, Category::Explicit, "freed_site")
        .unwrap();
    ledger.remove(0xa000, 64, 64, Category::Explicit).unwrap();
    ledger
        .insert(0xb000, 64, 64, Category::Explicit, "live_site")
        .unwrap();

    let omitted = ledger.print_report(true, false).to_string();
    assert!(!omitted.contains("freed_site"));
    assert!(omitted.contains("live_site"));

    let full = ledger.print_report(false, false).to_string();
    assert!(full.contains("freed_site"));
    assert!(full.contains("live_site"));
}

#[test]
fn test_total_section_always_present() {
    let mut ledger = Ledger::new();
    let report = ledger.print_report(false, false).to_string();
    assert!(report.starts_with("MEMORY USAGE REPORT\n"));
    assert_eq!(
        section(&report, "TOTAL MEMORY USAGE"),
        vec![
            "Allocated:            0 B          (0 B)",
            "Deallocated:          0 B          (0 B)",
            "Difference:           0 B          (0 B)",
        ]
    );
}
