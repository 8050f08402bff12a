//! Property-based tests for tabsync-engine invariants.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;
use tokio_test::block_on;

use tabsync_core::DocumentId;
use tabsync_engine::config::{ProvenanceColumns, SyncConfig};
use tabsync_engine::fetch::SourceDataset;
use tabsync_engine::filter::apply_filter;
use tabsync_engine::job::ProvenanceKey;
use tabsync_engine::provider::MemoryProvider;
use tabsync_engine::range::{ColumnRange, column_index, column_letters};
use tabsync_engine::reconcile::{DestinationReconciler, coalesce_rows, stale_rows};
use tabsync_engine::schema::ColumnMapping;
use tabsync_engine::table::Table;

const DST: &str = "https://docs.google.com/spreadsheets/d/dst1/edit";

fn tagged(link: &str, rows: Vec<Vec<String>>) -> SourceDataset {
    let key = ProvenanceKey::new(link, "Data", "05/2024");
    let names = ProvenanceColumns::default();
    let mut table = Table::new(vec!["Name".into(), "Amount".into()], rows);
    table.set_constant_column(&names.link, &key.source_link);
    table.set_constant_column(&names.sheet, &key.source_sheet);
    table.set_constant_column(&names.month, &key.month);
    SourceDataset {
        key,
        row_number: 2,
        mapping: ColumnMapping::identity(table.headers()),
        table,
    }
}

/// Generates two-column body rows.
fn arb_body() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(("[a-z]{1,6}", 0u32..1000), 0..12).prop_map(|rows| {
        rows.into_iter()
            .map(|(name, amount)| vec![name, amount.to_string()])
            .collect()
    })
}

/// Generates a set of 1-based body row numbers.
fn arb_rows() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(2usize..200, 0..60)
}

/// Generates a short lowercase word.
fn arb_word() -> impl Strategy<Value = String> {
    "[a-z]{1,8}".prop_map(|s| s)
}

proptest! {
    /// Spans are ascending, disjoint, non-adjacent and cover exactly the input.
    #[test]
    fn coalesced_spans_cover_input_exactly(rows in arb_rows()) {
        let spans = coalesce_rows(&rows);

        let covered: BTreeSet<usize> = spans.iter().flat_map(|s| s.start..=s.end).collect();
        let expected: BTreeSet<usize> = rows.iter().copied().collect();
        prop_assert_eq!(covered, expected);

        for pair in spans.windows(2) {
            prop_assert!(pair[0].end + 1 < pair[1].start);
        }
        for span in &spans {
            prop_assert!(span.start <= span.end);
        }
    }

    /// A resolved range always lies inside the table.
    #[test]
    fn resolved_range_stays_in_bounds(
        start in 0usize..60,
        len in 0usize..60,
        width in 0usize..40,
    ) {
        let spec = format!("{}:{}", column_letters(start), column_letters(start + len));
        let range = ColumnRange::parse(Some(&spec)).resolve(width);
        prop_assert!(range.start <= range.end);
        prop_assert!(range.end <= width);
        if start < width {
            prop_assert_eq!(range.start, start);
            prop_assert_eq!(range.end, (start + len + 1).min(width));
        } else {
            prop_assert_eq!(range, 0..width);
        }
    }

    /// Column letters and indices are inverse.
    #[test]
    fn column_letters_round_trip(index in 0usize..20_000) {
        prop_assert_eq!(column_index(&column_letters(index)), Some(index));
    }

    /// A numeric `>` filter keeps exactly the rows above the bound, in order.
    #[test]
    fn numeric_filter_keeps_rows_above_bound(
        amounts in prop::collection::vec(0u32..1000, 0..40),
        bound in 0u32..1000,
    ) {
        let rows: Vec<Vec<String>> = amounts
            .iter()
            .enumerate()
            .map(|(i, a)| vec![format!("r{i}"), a.to_string()])
            .collect();
        let mut table = Table::new(vec!["Name".into(), "Amount".into()], rows.clone());

        apply_filter(&mut table, &format!("Amount>{bound}")).expect("filter");

        let expected: Vec<Vec<String>> = rows
            .into_iter()
            .zip(&amounts)
            .filter(|(_, a)| **a > bound)
            .map(|(row, _)| row)
            .collect();
        prop_assert_eq!(table.rows(), expected.as_slice());
    }

    /// `contains` is a case-insensitive substring test.
    #[test]
    fn contains_filter_matches_substrings(
        names in prop::collection::vec(arb_word(), 0..30),
        needle in "[a-z]{1,3}",
    ) {
        let rows: Vec<Vec<String>> = names.iter().map(|n| vec![n.to_uppercase()]).collect();
        let mut table = Table::new(vec!["Name".into()], rows);

        apply_filter(&mut table, &format!("Name contains '{needle}'")).expect("filter");

        let expected = names.iter().filter(|n| n.contains(&needle)).count();
        prop_assert_eq!(table.len(), expected);
    }

    /// Stale row detection never selects a row carrying another key.
    #[test]
    fn stale_rows_respect_key_isolation(
        owners in prop::collection::vec(0usize..4, 0..50),
        selected in prop::collection::hash_set(0usize..4, 0..4),
    ) {
        let key = |owner: usize| ProvenanceKey::new(&format!("https://h/d/s{owner}/edit"), "Data", "05/2024");
        let mut grid = vec![vec![
            "Value".to_string(),
            "Source Link".to_string(),
            "Source Sheet".to_string(),
            "Month".to_string(),
        ]];
        for (i, owner) in owners.iter().enumerate() {
            let k = key(*owner);
            grid.push(vec![i.to_string(), k.source_link, k.source_sheet, k.month]);
        }
        let keys: HashSet<ProvenanceKey> = selected.iter().map(|o| key(*o)).collect();

        let stale = stale_rows(&grid, ["Source Link", "Source Sheet", "Month"], &keys);

        let expected: Vec<usize> = owners
            .iter()
            .enumerate()
            .filter(|(_, o)| selected.contains(*o))
            .map(|(i, _)| i + 2)
            .collect();
        prop_assert_eq!(stale, expected);
    }

    /// Reconciling the same payload twice leaves the destination unchanged
    /// and never disturbs rows owned by another key.
    #[test]
    fn reconcile_is_idempotent(foreign in arb_body(), own in arb_body()) {
        let dst = DocumentId::new("dst1").expect("doc id");
        let provider = MemoryProvider::new();
        let mut grid = vec![vec![
            "Name".to_string(),
            "Amount".to_string(),
            "Source Link".to_string(),
            "Source Sheet".to_string(),
            "Month".to_string(),
        ]];
        let other = "https://docs.google.com/spreadsheets/d/other/edit";
        for row in &foreign {
            grid.push(vec![
                row[0].clone(),
                row[1].clone(),
                other.to_string(),
                "Data".to_string(),
                "05/2024".to_string(),
            ]);
        }
        provider.insert_sheet(&dst, "Out", grid);

        let config = SyncConfig::immediate();
        let reconciler = DestinationReconciler::new(&provider, &config);
        let payload = [tagged("https://docs.google.com/spreadsheets/d/src1/edit", own.clone())];

        let first = block_on(reconciler.reconcile(DST, "Out", &payload));
        prop_assert!(first.error.is_none());
        let after_first = provider.sheet_rows(&dst, "Out").expect("sheet");

        let second = block_on(reconciler.reconcile(DST, "Out", &payload));
        prop_assert!(second.error.is_none());
        let after_second = provider.sheet_rows(&dst, "Out").expect("sheet");

        prop_assert_eq!(&after_first, &after_second);
        prop_assert_eq!(first.results, second.results);
        let foreign_left = after_second
            .iter()
            .skip(1)
            .filter(|row| row.get(2).map(String::as_str) == Some(other))
            .count();
        prop_assert_eq!(foreign_left, foreign.len());
        prop_assert_eq!(after_second.len(), 1 + foreign.len() + own.len());
    }
}
