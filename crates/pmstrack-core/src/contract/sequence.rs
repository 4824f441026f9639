//! SQ (sequence number) allocation and repair.
//!
//! SQs are numeric text, scoped per contract class. New contracts take the
//! last SQ + 1, so deletions leave gaps; `plan_backfill` fills in rows that
//! never got a number and `plan_resequence` rewrites a class to `1..N`.
//! The planners are pure; the store applies the returned assignments.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A contract's id and current SQ, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqRow {
    pub id: String,
    pub sq: Option<String>,
}

impl SqRow {
    pub fn new(id: impl Into<String>, sq: Option<&str>) -> Self {
        Self {
            id: id.into(),
            sq: sq.map(str::to_string),
        }
    }
}

/// A single SQ rewrite: `(contract id, new SQ)`.
pub type SqAssignment = (String, String);

/// Result of applying an SQ plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceReport {
    pub updated: usize,
    pub failed: usize,
    pub total: usize,
}

/// Parse an SQ as a plain non-negative integer (digits only, surrounding
/// whitespace ignored).
pub fn parse_sq(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// SQ for the next contract in a class, given the SQ of the most recently
/// created one. Missing or non-numeric predecessors restart at "1", and so
/// does one already at `u64::MAX`.
pub fn next_sq(last: Option<&str>) -> String {
    last.and_then(parse_sq)
        .and_then(|n| n.checked_add(1))
        .map(|n| n.to_string())
        .unwrap_or_else(|| "1".to_string())
}

/// Sort key that puts numeric SQs first in numeric order and everything
/// else after them.
pub fn sq_sort_key(sq: &str) -> (u8, u64) {
    match parse_sq(sq) {
        Some(n) => (0, n),
        None => (1, 0),
    }
}

/// Assign numbers only to rows whose SQ is missing or non-numeric.
///
/// Walks rows in creation order with a cursor, giving each unnumbered row the
/// lowest number at or after the cursor that no other row already uses.
pub fn plan_backfill(rows: &[SqRow]) -> Vec<SqAssignment> {
    let mut used: HashSet<u64> = rows
        .iter()
        .filter_map(|row| row.sq.as_deref().and_then(parse_sq))
        .collect();

    let mut cursor = 1u64;
    let mut assignments = Vec::new();
    for row in rows {
        if row.sq.as_deref().and_then(parse_sq).is_some() {
            continue;
        }
        let mut n = cursor;
        while used.contains(&n) {
            n += 1;
        }
        used.insert(n);
        cursor = n + 1;
        assignments.push((row.id.clone(), n.to_string()));
    }
    assignments
}

/// Rewrite every row to its 1-based position in creation order.
pub fn plan_resequence(rows: &[SqRow]) -> Vec<SqAssignment> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| (row.id.clone(), (idx + 1).to_string()))
        .collect()
}
