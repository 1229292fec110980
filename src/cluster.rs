//! Spatial clustering
//!
//! Records are grouped by a key function and an equivalence predicate, then
//! each group is summarized by a fresh [`Aggregator`].
//!
//! Grouping is first-match: a record joins the first existing cluster (in
//! creation order) whose key the predicate accepts, and earlier assignments are
//! never revisited. The result is not a distance-transitive partition. Two
//! records can share a cluster while being farther apart than the resolution,
//! as long as both are close to the cluster's seed, and the outcome depends on
//! arrival order.

use crate::aggregator::{Aggregator, ItemExtra};
use crate::error::ComputeError;
use crate::geo;
use crate::types::{Coordinate, RecordView};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How records are keyed and merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    /// Key on coordinates snapped to a decimal-degree grid, never merge keys
    #[default]
    Grid,
    /// Key on raw coordinates, merge keys closer than the resolution (meters)
    Proximity,
    /// One cluster per distinct raw coordinate
    None,
}

impl GroupingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingMode::Grid => "grid",
            GroupingMode::Proximity => "proximity",
            GroupingMode::None => "none",
        }
    }

    /// Cluster key for a coordinate under this mode
    pub fn key(&self, coordinate: Coordinate, resolution: Option<f64>) -> Coordinate {
        match self {
            GroupingMode::Grid => grid_key(coordinate, resolution),
            GroupingMode::Proximity | GroupingMode::None => coordinate,
        }
    }

    /// Whether two distinct keys belong to the same cluster under this mode
    pub fn is_same(&self, a: Coordinate, b: Coordinate, resolution: Option<f64>) -> bool {
        match self {
            GroupingMode::Proximity => within(a, b, resolution),
            GroupingMode::Grid | GroupingMode::None => false,
        }
    }
}

/// Which earlier keys a new record is compared against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Only the key of each existing cluster
    #[default]
    Seed,
    /// The cluster key and then the raw key of every member already assigned
    Chain,
}

/// Options for [`cluster`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterOptions {
    pub linkage: Linkage,
    /// Keep member items on each cluster and write per-item extras onto them
    pub retain_original: bool,
}

/// Items that can carry the per-item attributes an aggregator produces
pub trait Annotate {
    fn annotate(&mut self, extra: &ItemExtra);
}

impl Annotate for RecordView<'_> {
    fn annotate(&mut self, extra: &ItemExtra) {
        self.weight = Some(extra.weight);
    }
}

/// One output cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster<T> {
    /// Seed key, or the centroid when the aggregator reports one
    pub key: Coordinate,
    /// Aggregated value
    pub value: f64,
    /// Number of member records
    pub count: usize,
    /// Member items in arrival order, when retention was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<T>>,
    /// Value after rescaling onto a display range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<f64>,
}

struct Group {
    key: Coordinate,
    raw_keys: Vec<Coordinate>,
    members: Vec<usize>,
}

impl Group {
    fn accepts<S>(&self, raw: Coordinate, is_same: &S, linkage: Linkage) -> bool
    where
        S: Fn(Coordinate, Coordinate) -> bool,
    {
        let matches = |k: Coordinate| k == raw || is_same(k, raw);
        if matches(self.key) {
            return true;
        }
        linkage == Linkage::Chain && self.raw_keys.iter().any(|k| matches(*k))
    }
}

/// Group `items` into clusters and aggregate each one.
///
/// `key_fn` yields the raw key of an item and `is_same(existing, raw)` decides
/// whether a raw key joins an existing cluster. Identical keys always share a
/// cluster. `factory` is called once per cluster. Clusters are returned in
/// creation order.
pub fn cluster<T, K, S, M, A>(
    items: &[T],
    key_fn: K,
    is_same: S,
    factory: M,
    options: ClusterOptions,
) -> Result<Vec<Cluster<T>>, ComputeError>
where
    T: Clone + Annotate,
    K: Fn(&T) -> Coordinate,
    S: Fn(Coordinate, Coordinate) -> bool,
    M: Fn() -> A,
    A: Aggregator<T>,
{
    let mut groups: Vec<Group> = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let raw = key_fn(item);
        match groups
            .iter_mut()
            .find(|g| g.accepts(raw, &is_same, options.linkage))
        {
            Some(group) => {
                group.raw_keys.push(raw);
                group.members.push(idx);
            }
            None => groups.push(Group {
                key: raw,
                raw_keys: vec![raw],
                members: vec![idx],
            }),
        }
    }

    debug!(
        records = items.len(),
        clusters = groups.len(),
        linkage = ?options.linkage,
        "grouped records"
    );

    groups
        .into_iter()
        .map(|group| {
            let mut aggregator = factory();
            for &idx in &group.members {
                aggregator.accumulate(&items[idx]);
            }
            let aggregate = aggregator.finalize()?;

            let members = if options.retain_original {
                let mut members: Vec<T> = group.members.iter().map(|&i| items[i].clone()).collect();
                if let Some(extras) = &aggregate.extras {
                    for (member, extra) in members.iter_mut().zip(extras) {
                        member.annotate(extra);
                    }
                }
                Some(members)
            } else {
                None
            };

            Ok(Cluster {
                key: aggregate.key.unwrap_or(group.key),
                value: aggregate.value,
                count: group.members.len(),
                members,
                display: None,
            })
        })
        .collect()
}

/// Snap a value to a multiple of `resolution`, rounding halves away from zero.
///
/// Halves are decided on the shortest decimal form of both operands, so
/// `quantize(2.345, 0.01)` is `2.35` even though `2.345 / 0.01` is not exactly
/// `234.5` in binary, while `2.3449999999996` stays at `2.34`. A non-positive
/// or non-finite resolution returns the value unchanged.
pub fn quantize(value: f64, resolution: f64) -> f64 {
    if !(resolution.is_finite() && resolution > 0.0) || !value.is_finite() {
        return value;
    }
    match (to_decimal(value), to_decimal(resolution)) {
        (Some(v), Some(r)) => quantize_decimal(v, r).unwrap_or_else(|| quantize_float(value, resolution)),
        _ => quantize_float(value, resolution),
    }
}

/// Fixed-point decimal: `mantissa * 10^-scale`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Decimal {
    mantissa: i128,
    scale: u32,
}

/// Exact decimal form of the shortest round-trip text of `value`
fn to_decimal(value: f64) -> Option<Decimal> {
    let text = value.to_string();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.as_str()),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let magnitude: i128 = format!("{int_part}{frac_part}").parse().ok()?;
    let scale = u32::try_from(frac_part.len()).ok()?;
    Some(Decimal {
        mantissa: if negative { -magnitude } else { magnitude },
        scale,
    })
}

/// `round_half_away_from_zero(value / resolution) * resolution`, exactly.
/// `None` when an intermediate leaves the `i128` range.
fn quantize_decimal(value: Decimal, resolution: Decimal) -> Option<f64> {
    let num = value.mantissa.checked_mul(10i128.checked_pow(resolution.scale)?)?;
    let den = resolution.mantissa.checked_mul(10i128.checked_pow(value.scale)?)?;
    if den == 0 {
        return None;
    }

    let mut steps = num / den;
    let remainder = num % den;
    if remainder.checked_abs()?.checked_mul(2)? >= den {
        steps += num.signum();
    }

    let snapped = steps.checked_mul(resolution.mantissa)?;
    format!("{}e-{}", snapped, resolution.scale).parse().ok()
}

/// Float fallback for magnitudes the decimal path cannot hold
fn quantize_float(value: f64, resolution: f64) -> f64 {
    let steps = round_to(value / resolution, 9).round();
    round_to(steps * resolution, 12)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Grid cell key for a coordinate; without a resolution the raw coordinate
pub fn grid_key(coordinate: Coordinate, resolution: Option<f64>) -> Coordinate {
    match resolution {
        Some(r) => Coordinate::new(quantize(coordinate.lat, r), quantize(coordinate.lon, r)),
        None => coordinate,
    }
}

/// Proximity predicate: strictly closer than `resolution_m` meters
pub fn within(a: Coordinate, b: Coordinate, resolution_m: Option<f64>) -> bool {
    match resolution_m {
        Some(r) if r > 0.0 => geo::distance(a, b) < r,
        _ => false,
    }
}
