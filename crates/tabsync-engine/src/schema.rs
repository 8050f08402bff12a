//! Schema reconciliation between source and destination headers.
//!
//! Source sheets drift: headers repeat, headerless sources appear, and
//! destinations carry columns the payload knows nothing about. Each step
//! here is a pure function over header lists, so the mapping decisions can
//! be tested without touching a provider.

use std::collections::{HashMap, HashSet};

use crate::table::Table;

/// Makes header names unique.
///
/// The first occurrence of a name stays bare; repeats get `_1`, `_2`, ...
/// A suffix that would collide with another column is skipped.
#[must_use]
pub fn dedupe_headers(headers: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut repeats: HashMap<&str, usize> = HashMap::new();
    let mut out = Vec::with_capacity(headers.len());

    for name in headers {
        let mut candidate = name.clone();
        if used.contains(&candidate) {
            let n = repeats.entry(name.as_str()).or_insert(0);
            loop {
                *n += 1;
                candidate = format!("{name}_{n}");
                if !used.contains(&candidate) {
                    break;
                }
            }
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// How source columns were mapped onto output names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Source names are kept.
    Identity,
    /// Columns were renamed by position onto destination names.
    Positional,
}

/// A column mapping produced by schema reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    kind: MappingKind,
    output: Vec<String>,
    dropped: Vec<String>,
}

impl ColumnMapping {
    /// Keeps the source columns as they are.
    #[must_use]
    pub fn identity(source: &[String]) -> Self {
        Self {
            kind: MappingKind::Identity,
            output: source.to_vec(),
            dropped: Vec::new(),
        }
    }

    /// Renames source columns by position onto `target` names.
    ///
    /// Source columns beyond the target width are dropped. A source narrower
    /// than the target keeps only as many target names as it has columns.
    #[must_use]
    pub fn positional(source: &[String], target: &[String]) -> Self {
        let width = source.len().min(target.len());
        Self {
            kind: MappingKind::Positional,
            output: target[..width].to_vec(),
            dropped: source[width..].to_vec(),
        }
    }

    /// The mapping strategy.
    #[must_use]
    pub const fn kind(&self) -> MappingKind {
        self.kind
    }

    /// Column names after mapping.
    #[must_use]
    pub fn output_headers(&self) -> &[String] {
        &self.output
    }

    /// Source columns discarded by the mapping.
    #[must_use]
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    /// Applies the mapping to a table whose columns match the mapping's source.
    pub fn apply(&self, table: &mut Table) {
        if self.kind == MappingKind::Identity {
            return;
        }
        table.truncate_columns(self.output.len());
        table.rename_columns(self.output.iter().cloned());
    }
}

/// Appends any of `required` missing from `existing`.
///
/// Returns `None` when nothing had to be added. Existing columns are never
/// reordered or removed.
#[must_use]
pub fn widen_header(existing: &[String], required: &[String]) -> Option<Vec<String>> {
    let missing: Vec<&String> = required
        .iter()
        .filter(|name| !existing.contains(name))
        .collect();
    if missing.is_empty() {
        return None;
    }
    let mut widened = existing.to_vec();
    widened.extend(missing.into_iter().cloned());
    Some(widened)
}

/// Re-projection of payload columns onto a destination header order.
#[derive(Debug, Clone)]
pub struct ColumnProjection {
    sources: Vec<Option<usize>>,
    unmapped: Vec<String>,
}

impl ColumnProjection {
    /// Plans the projection of `payload` columns onto `destination` columns.
    ///
    /// Destination columns the payload lacks are filled with empty strings;
    /// payload columns the destination lacks are reported by [`Self::unmapped`].
    #[must_use]
    pub fn new(payload: &[String], destination: &[String]) -> Self {
        let sources = destination
            .iter()
            .map(|name| payload.iter().position(|p| p == name))
            .collect();
        let unmapped = payload
            .iter()
            .filter(|p| !destination.contains(p))
            .cloned()
            .collect();
        Self { sources, unmapped }
    }

    /// Payload columns with no place in the destination.
    #[must_use]
    pub fn unmapped(&self) -> &[String] {
        &self.unmapped
    }

    /// Projects one payload row.
    #[must_use]
    pub fn project_row(&self, row: &[String]) -> Vec<String> {
        self.sources
            .iter()
            .map(|src| src.and_then(|i| row.get(i)).cloned().unwrap_or_default())
            .collect()
    }

    /// Projects every row of a payload table.
    #[must_use]
    pub fn project(&self, table: &Table) -> Vec<Vec<String>> {
        table.rows().iter().map(|r| self.project_row(r)).collect()
    }
}
