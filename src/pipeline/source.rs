//! Identifier source: read, deduplicate, sort and slice the work list.

use crate::models::{Identifier, RelayError, Result};
use std::collections::BTreeSet;
use std::ops::Range;
use std::path::Path;
use tracing::info;

/// Distinct, trimmed, non-blank lines of `text`, sorted, restricted to `range`.
///
/// `range` is half-open over the sorted set and clamped to its length.
pub fn select_workset(text: &str, range: Range<usize>) -> Result<Vec<Identifier>> {
    let distinct: BTreeSet<Identifier> = text.lines().filter_map(Identifier::parse).collect();

    let workset: Vec<Identifier> = distinct
        .into_iter()
        .skip(range.start)
        .take(range.end.saturating_sub(range.start))
        .collect();

    if workset.is_empty() {
        return Err(RelayError::EmptyWorkset);
    }
    Ok(workset)
}

/// Load the workset from a file with one identifier per line.
pub fn load_identifiers(path: &Path, range: Range<usize>) -> Result<Vec<Identifier>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RelayError::io(format!("reading identifiers from {}", path.display()), e))?;

    let workset = select_workset(&text, range.clone())?;
    info!(
        count = workset.len(),
        start = range.start,
        stop = range.end,
        "Loaded identifiers"
    );
    Ok(workset)
}
