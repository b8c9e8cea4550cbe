//! # Largest-Fit Search
//!
//! Finds the largest value in an inclusive range that an [`Assessor`] accepts,
//! assuming acceptance is monotonic: if a value fits, every smaller one does too.
//!
//! Each assessment is a real trial launch that takes seconds, so the search
//! checks the bounds first and then bisects, one probe at a time. A success at
//! the upper bound is trusted as-is and smaller values are never re-checked.

use crate::fitting::probe::Assessor;
use crate::fitting::types::SearchRange;
use tracing::info;

/// Largest accepted value, or `None` when even the lower bound fails
pub type SearchOutcome = Option<u32>;

/// Search `range` for the largest value `assessor` accepts.
///
/// Costs `O(log(high - low))` assessments; a range with `low == high` costs at
/// most two.
pub async fn search<A: Assessor + ?Sized>(range: SearchRange, assessor: &A) -> SearchOutcome {
    let (low, high) = (range.low(), range.high());

    if !assessor.assess(low).await {
        return None;
    }
    if assessor.assess(high).await {
        return Some(high);
    }

    // `low` is known good and `high` known bad, so only the open interval is left.
    let mut last_success = low;
    let (mut lo, mut hi) = (low.saturating_add(1), high.saturating_sub(1));
    while lo <= hi {
        info!(low = lo, high = hi, "next search range");
        let mid = lo + (hi - lo) / 2;
        if assessor.assess(mid).await {
            last_success = mid;
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }

    Some(last_success)
}

/// Round `value` down to a multiple of `granularity`.
#[must_use]
pub fn round_down(value: u32, granularity: u32) -> u32 {
    if granularity == 0 {
        return value;
    }
    value / granularity * granularity
}
