//! Display range mapping
//!
//! Linearly rescales a value attribute of a collection onto a target range so
//! that the smallest value lands on the lower bound and the largest on the
//! upper bound.

use crate::error::ComputeError;
use tracing::warn;

/// Summary of a completed range mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeOutcome {
    /// Smallest source value
    pub min: f64,
    /// Largest source value
    pub max: f64,
    /// Output units per source unit
    pub slope: f64,
    /// All source values were equal, so everything mapped to the lower bound
    pub degenerate: bool,
}

/// Rescale `getter(item)` from `[min, max]` onto `[lower, upper]` and store the
/// result through `setter`, in place.
///
/// When every value is identical the slope is zero and each item receives
/// `lower`. An empty collection is an error; callers are expected to skip
/// rescaling instead.
pub fn map_values<T, G, S>(
    items: &mut [T],
    lower: f64,
    upper: f64,
    getter: G,
    mut setter: S,
) -> Result<RangeOutcome, ComputeError>
where
    G: Fn(&T) -> f64,
    S: FnMut(&mut T, f64),
{
    if items.is_empty() {
        return Err(ComputeError::EmptyRange);
    }

    let (min, max) = items
        .iter()
        .map(&getter)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let degenerate = max == min;
    let slope = if degenerate {
        warn!(value = min, items = items.len(), "all values identical, mapping to lower bound");
        0.0
    } else {
        (upper - lower) / (max - min)
    };

    for item in items.iter_mut() {
        let mapped = lower + slope * (getter(item) - min);
        setter(item, mapped);
    }

    Ok(RangeOutcome {
        min,
        max,
        slope,
        degenerate,
    })
}
