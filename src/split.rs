//! Splitting a buffer into line-aligned sections.
//!
//! Each section can be scanned on its own because every cut falls right
//! after a line terminator, so no record straddles two sections.

use std::ops::Range;
use thiserror::Error;

/// Default number of bytes searched for a line terminator after each
/// candidate cut point.
pub const DEFAULT_SEARCH_WINDOW: usize = 100;

/// No line terminator was found close enough to a candidate cut point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no line terminator within {window} bytes of offset {offset}")]
pub struct SplitError {
    /// Candidate cut point the search started from.
    pub offset: usize,
    /// Number of bytes searched.
    pub window: usize,
}

/// Split `buffer` into `n` non-overlapping, line-aligned byte ranges.
///
/// The ranges are contiguous, in order, and together cover the whole buffer.
/// Some of them may be empty when the buffer holds fewer lines than
/// requested sections. `n` is treated as 1 when zero.
///
/// # Example
///
/// ```
/// use rir_stats::split::split;
///
/// let ranges = split(b"a|1\nb|2\nc|3\n", 2, 100).unwrap();
/// assert_eq!(ranges, vec![0..8, 8..12]);
/// ```
pub fn split(buffer: &[u8], n: usize, window: usize) -> Result<Vec<Range<usize>>, SplitError> {
    let n = n.max(1);
    let len = buffer.len();
    let mut ranges = Vec::with_capacity(n);
    let mut start = 0;

    for i in 1..n {
        let candidate = (i * len / n).max(start);
        let cut = next_cut(buffer, candidate, window)?;
        ranges.push(start..cut);
        start = cut;
    }
    ranges.push(start..len);

    Ok(ranges)
}

/// Find the position just past the first line terminator at or after `from`.
fn next_cut(buffer: &[u8], from: usize, window: usize) -> Result<usize, SplitError> {
    let len = buffer.len();
    if from >= len {
        return Ok(len);
    }

    let end = from.saturating_add(window).min(len);
    match buffer[from..end].iter().position(|&b| b == b'\n') {
        Some(pos) => Ok(from + pos + 1),
        // The last line has no terminator; it belongs to this section.
        None if end == len => Ok(len),
        None => Err(SplitError {
            offset: from,
            window,
        }),
    }
}
