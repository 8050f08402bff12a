//! Row filter language.
//!
//! ```text
//! expr   := clause (";" clause)*
//! clause := column operator value
//! ```
//!
//! Clauses are ANDed. Operators are matched by priority: ` contains `, `==`,
//! `!=`, `>=`, `<=`, `>`, `<`, `=` (same as `==`). A column may be wrapped in
//! backticks or quotes; a quoted value always compares as text. A quote only
//! opens at the start of a token, so `O'Brien` is a plain value, and a quote
//! left open is a syntax error.
//!
//! | Operator | Comparison |
//! |----------|------------|
//! | `contains` | case-insensitive substring |
//! | `==` `=` `!=` | exact text |
//! | `>` `<` `>=` `<=` | numeric if the literal and every non-empty cell of the column parse as numbers, otherwise lexicographic |
//!
//! Lexicographic ordering is what makes ISO dates (`Date >= '2024-01-01'`)
//! work without a date parser.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::table::Table;

/// Filter values meaning "no filter" (compared case-insensitively).
const NO_FILTER: &[&str] = &["nan", "none", "null"];

/// Comparison operator of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Case-insensitive substring match.
    Contains,
    /// Text equality.
    Eq,
    /// Text inequality.
    Ne,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
}

/// Operator tokens in matching priority.
const OPERATORS: &[(&str, Operator)] = &[
    (" contains ", Operator::Contains),
    ("==", Operator::Eq),
    ("!=", Operator::Ne),
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    (">", Operator::Gt),
    ("<", Operator::Lt),
    ("=", Operator::Eq),
];

impl Operator {
    const fn is_ordering(self) -> bool {
        matches!(self, Self::Ge | Self::Le | Self::Gt | Self::Lt)
    }

    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Self::Ge => ord.is_ge(),
            Self::Le => ord.is_le(),
            Self::Gt => ord.is_gt(),
            Self::Lt => ord.is_lt(),
            Self::Contains | Self::Eq | Self::Ne => false,
        }
    }
}

/// One clause as written, before column resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawClause {
    /// The clause text, trimmed.
    pub text: String,
    /// Column name with any wrapping quotes removed.
    pub column: String,
    /// The operator.
    pub op: Operator,
    /// Literal value with any wrapping quotes removed.
    pub value: String,
    /// Whether the value was quoted.
    pub quoted: bool,
}

/// Parses a filter expression into clauses without looking at any table.
///
/// Returns an empty list for a blank or null-marker expression.
///
/// # Errors
///
/// Returns [`Error::FilterSyntax`] for an unterminated quote, or naming the
/// first clause that has no operator or no column name.
pub fn parse_expression(expr: &str) -> Result<Vec<RawClause>> {
    let expr = expr.trim();
    if expr.is_empty() || NO_FILTER.contains(&expr.to_lowercase().as_str()) {
        return Ok(Vec::new());
    }

    let (mask, unterminated) = quote_mask(expr);
    if unterminated {
        return Err(Error::filter(expr, "unterminated quote"));
    }
    split_outside_quotes(expr, &mask, ';')
        .into_iter()
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .map(parse_clause)
        .collect()
}

fn parse_clause(text: &str) -> Result<RawClause> {
    let Some((pos, token, op)) = find_operator(text) else {
        return Err(Error::filter(text, "no operator found"));
    };
    let column = unquote_column(&text[..pos]);
    if column.is_empty() {
        return Err(Error::filter(text, "missing column name"));
    }
    let (value, quoted) = unquote_value(text[pos + token.len()..].trim());
    Ok(RawClause {
        text: text.to_string(),
        column,
        op,
        value,
        quoted,
    })
}

/// Marks, per byte, whether it sits inside a quoted section, and reports
/// whether a section is still open at the end.
fn quote_mask(text: &str) -> (Vec<bool>, bool) {
    let mut mask = vec![false; text.len()];
    let mut open: Option<char> = None;
    let mut prev: Option<char> = None;
    for (i, c) in text.char_indices() {
        let inside = match open {
            Some(q) if c == q => {
                open = None;
                true
            }
            Some(_) => true,
            None if matches!(c, '\'' | '"' | '`') && starts_token(prev) => {
                open = Some(c);
                true
            }
            None => false,
        };
        for slot in &mut mask[i..i + c.len_utf8()] {
            *slot = inside;
        }
        prev = Some(c);
    }
    (mask, open.is_some())
}

/// Whether a quote after `prev` opens a new token.
fn starts_token(prev: Option<char>) -> bool {
    prev.is_none_or(|p| p.is_whitespace() || matches!(p, ';' | '=' | '!' | '<' | '>'))
}

fn split_outside_quotes<'a>(text: &'a str, mask: &[bool], sep: char) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == sep && !mask[i] {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

fn find_operator(text: &str) -> Option<(usize, &'static str, Operator)> {
    let (mask, _) = quote_mask(text);
    let bytes = text.as_bytes();
    OPERATORS.iter().find_map(|&(token, op)| {
        let n = token.len();
        (0..=bytes.len().saturating_sub(n))
            .find(|&i| {
                i + n <= bytes.len()
                    && !mask[i]
                    && bytes[i..i + n].eq_ignore_ascii_case(token.as_bytes())
            })
            .map(|i| (i, token, op))
    })
}

fn unquote_column(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '`' | '\'' | '"'))
        .trim()
        .to_string()
}

fn unquote_value(raw: &str) -> (String, bool) {
    let quoted = raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')));
    if quoted {
        (raw[1..raw.len() - 1].to_string(), true)
    } else {
        (raw.to_string(), false)
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// A clause bound to a column index.
#[derive(Debug, Clone)]
struct Clause {
    raw: RawClause,
    column: usize,
    column_name: String,
}

/// A filter expression compiled against a header.
#[derive(Debug, Clone)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// Parses `expr` and resolves every clause's column against `headers`.
    ///
    /// Returns `Ok(None)` when the expression means "no filter".
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilterSyntax`] for a clause without an operator or
    /// whose column does not exist.
    pub fn compile(expr: &str, headers: &[String]) -> Result<Option<Self>> {
        let raw = parse_expression(expr)?;
        if raw.is_empty() {
            return Ok(None);
        }
        let clauses = raw
            .into_iter()
            .map(|raw| {
                let column = headers
                    .iter()
                    .position(|h| *h == raw.column)
                    .or_else(|| headers.iter().position(|h| h.trim() == raw.column))
                    .ok_or_else(|| {
                        Error::filter(&raw.text, format!("column '{}' not found", raw.column))
                    })?;
                Ok(Clause {
                    column_name: headers[column].clone(),
                    raw,
                    column,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Self { clauses }))
    }

    /// Number of clauses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Returns true if the filter has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Keeps the rows that satisfy every clause.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilterSyntax`] when an unquoted non-numeric value is
    /// ordered against a column whose cells are all numeric.
    pub fn apply(&self, table: &mut Table) -> Result<()> {
        for clause in &self.clauses {
            if table.is_empty() {
                break;
            }
            clause.apply(table)?;
        }
        Ok(())
    }
}

impl Clause {
    fn apply(&self, table: &mut Table) -> Result<()> {
        let col = self.column;
        let value = self.raw.value.as_str();
        match self.raw.op {
            Operator::Contains => {
                let needle = value.to_lowercase();
                table.retain_rows(|row| row[col].to_lowercase().contains(&needle));
            }
            Operator::Eq => table.retain_rows(|row| row[col] == value),
            Operator::Ne => table.retain_rows(|row| row[col] != value),
            op => {
                debug_assert!(op.is_ordering());
                self.apply_ordering(table, op)?;
            }
        }
        Ok(())
    }

    fn apply_ordering(&self, table: &mut Table, op: Operator) -> Result<()> {
        let col = self.column;
        let literal = if self.raw.quoted {
            None
        } else {
            parse_number(&self.raw.value)
        };

        let (has_values, column_numeric) = {
            let mut non_empty = table.column(col).filter(|c| !c.trim().is_empty()).peekable();
            let has_values = non_empty.peek().is_some();
            (has_values, non_empty.all(|c| parse_number(c).is_some()))
        };

        match literal {
            Some(bound) if column_numeric => {
                table.retain_rows(|row| {
                    parse_number(&row[col])
                        .and_then(|n| n.partial_cmp(&bound))
                        .is_some_and(|ord| op.accepts(ord))
                });
            }
            None if column_numeric && has_values && !self.raw.quoted => {
                return Err(Error::filter(
                    &self.raw.text,
                    format!(
                        "value '{}' is not a number but column '{}' is numeric",
                        self.raw.value, self.column_name
                    ),
                ));
            }
            _ => {
                let value = self.raw.value.as_str();
                table.retain_rows(|row| op.accepts(row[col].as_str().cmp(value)));
            }
        }
        Ok(())
    }
}

/// Applies a filter expression to a table in one step.
///
/// # Errors
///
/// See [`Filter::compile`] and [`Filter::apply`].
pub fn apply_filter(table: &mut Table, expr: &str) -> Result<()> {
    match Filter::compile(expr, table.headers())? {
        Some(filter) => filter.apply(table),
        None => Ok(()),
    }
}
