//! The segment module holds the breakpoint computation shared by both participants of a
//! bisection challenge.
//!
//! Both the asserter and the challenger must derive identical breakpoints from identical inputs,
//! otherwise the challenger could be led into disputing a sub-range the asserter never claimed.

/// Returns the number of sub-segments a range of `length` steps is split into under `fanout`.
///
/// `fanout` counts breakpoints, both ends included, so at most `fanout - 1` sub-segments are
/// produced. Ranges shorter than that are split into single steps.
pub fn segment_count(length: u64, fanout: u64) -> u64 {
    fanout.saturating_sub(1).max(1).min(length)
}

/// Splits `[start, end)` into sub-segments and returns the ordered breakpoints.
///
/// Every sub-segment has length `(end - start) / segments`; any remainder is absorbed by the
/// last sub-segment, never the first.
///
/// ### Takes
/// - `start`: The first step of the disputed range.
/// - `end`: The step one past the last step of the disputed range.
/// - `fanout`: The number of breakpoints of a full bisection, both ends included.
///
/// ### Returns
/// - `Vec<u64>`: The breakpoints, starting with `start` and ending with `end`.
pub fn split_range(start: u64, end: u64, fanout: u64) -> Vec<u64> {
    let length = end.saturating_sub(start);
    let segments = segment_count(length, fanout);
    if segments == 0 {
        return vec![start, end];
    }

    let chunk = length / segments;
    let mut points = (0..segments)
        .map(|i| start + i * chunk)
        .collect::<Vec<_>>();
    points.push(end);
    points
}

/// Returns the lengths of the sub-segments delimited by `breakpoints`.
pub fn segment_lengths(breakpoints: &[u64]) -> Vec<u64> {
    breakpoints.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Returns the number of bisection rounds needed to narrow `length` steps down to a single step
/// when the last (and therefore longest) sub-segment is chosen every round.
///
/// Returns `None` if `fanout` cannot make progress on a range longer than one step.
pub fn rounds_to_one_step(mut length: u64, fanout: u64) -> Option<u64> {
    let mut rounds = 0;
    while length > 1 {
        let segments = segment_count(length, fanout);
        if segments < 2 {
            return None;
        }
        length = length / segments + length % segments;
        rounds += 1;
    }
    Some(rounds)
}
