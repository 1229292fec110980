//! Per-cluster aggregation
//!
//! An [`Aggregator`] folds the members of one cluster into a single summary
//! value. A fresh aggregator is created for every cluster, so implementations
//! only ever see the members of the cluster they summarize.
//!
//! Two variants are provided:
//! - [`ArithmeticMean`]: plain mean over extracted values
//! - [`InverseDistanceWeightedMean`]: mean weighted by the inverse distance of
//!   each member to the cluster centroid, reporting the centroid as the new key

use crate::error::ComputeError;
use crate::geo;
use crate::types::Coordinate;
use std::marker::PhantomData;

/// Distance substituted for a member sitting exactly on the centroid (meters)
pub const MIN_WEIGHT_DISTANCE_M: f64 = 1.0;

/// Per-member attributes produced by weighted aggregators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemExtra {
    pub weight: f64,
}

/// Result of finalizing an aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Replacement cluster key, if the aggregator computes one
    pub key: Option<Coordinate>,
    /// Summary value for the cluster
    pub value: f64,
    /// One entry per accumulated item, in accumulation order
    pub extras: Option<Vec<ItemExtra>>,
}

/// Stateful accumulator over the members of one cluster
pub trait Aggregator<T>: Sized {
    /// Fold one item into the aggregator state
    fn accumulate(&mut self, item: &T) -> &mut Self;

    /// Consume the aggregator and produce the summary
    fn finalize(self) -> Result<Aggregate, ComputeError>;

    /// Fold every item of a slice in order
    fn accumulate_all(&mut self, items: &[T]) -> &mut Self {
        for item in items {
            self.accumulate(item);
        }
        self
    }
}

/// Contribution of one item to an arithmetic mean
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// A single value counting once
    Value(f64),
    /// A pre-summed increment covering `count` observations
    Partial { sum: f64, count: u64 },
}

impl From<f64> for Sample {
    fn from(v: f64) -> Self {
        Sample::Value(v)
    }
}

impl From<(f64, u64)> for Sample {
    fn from((sum, count): (f64, u64)) -> Self {
        Sample::Partial { sum, count }
    }
}

/// Arithmetic mean over values pulled from each item by an extractor
pub struct ArithmeticMean<T, F> {
    extract: F,
    sum: f64,
    count: u64,
    _item: PhantomData<fn(&T)>,
}

impl<T, F> ArithmeticMean<T, F>
where
    F: Fn(&T) -> Sample,
{
    pub fn new(extract: F) -> Self {
        Self {
            extract,
            sum: 0.0,
            count: 0,
            _item: PhantomData,
        }
    }
}

impl<T, F> Aggregator<T> for ArithmeticMean<T, F>
where
    F: Fn(&T) -> Sample,
{
    fn accumulate(&mut self, item: &T) -> &mut Self {
        match (self.extract)(item) {
            Sample::Value(v) => {
                self.sum += v;
                self.count += 1;
            }
            Sample::Partial { sum, count } => {
                self.sum += sum;
                self.count += count;
            }
        }
        self
    }

    fn finalize(self) -> Result<Aggregate, ComputeError> {
        if self.count == 0 {
            return Err(ComputeError::EmptyAggregation);
        }
        Ok(Aggregate {
            key: None,
            value: self.sum / self.count as f64,
            extras: None,
        })
    }
}

/// Mean weighted by inverse distance to the centroid of all accumulated points.
///
/// The extractor yields the location and value of each item. The centroid is
/// the plain mean of latitudes and longitudes; an item's weight is
/// `1 / distance(item, centroid)`, with [`MIN_WEIGHT_DISTANCE_M`] standing in
/// for a zero distance. Values keep their sign.
pub struct InverseDistanceWeightedMean<T, F> {
    extract: F,
    points: Vec<(Coordinate, f64)>,
    _item: PhantomData<fn(&T)>,
}

impl<T, F> InverseDistanceWeightedMean<T, F>
where
    F: Fn(&T) -> (Coordinate, f64),
{
    pub fn new(extract: F) -> Self {
        Self {
            extract,
            points: Vec::new(),
            _item: PhantomData,
        }
    }
}

impl<T, F> Aggregator<T> for InverseDistanceWeightedMean<T, F>
where
    F: Fn(&T) -> (Coordinate, f64),
{
    fn accumulate(&mut self, item: &T) -> &mut Self {
        self.points.push((self.extract)(item));
        self
    }

    fn finalize(self) -> Result<Aggregate, ComputeError> {
        if self.points.is_empty() {
            return Err(ComputeError::EmptyAggregation);
        }

        let centroid = centroid(self.points.iter().map(|(c, _)| *c));

        let weights: Vec<f64> = self
            .points
            .iter()
            .map(|(c, _)| {
                let d = geo::distance(centroid, *c);
                let d = if d == 0.0 { MIN_WEIGHT_DISTANCE_M } else { d };
                1.0 / d
            })
            .collect();

        let weight_sum: f64 = weights.iter().sum();
        let weighted_sum: f64 = weights
            .iter()
            .zip(&self.points)
            .map(|(w, (_, v))| w * v)
            .sum();

        Ok(Aggregate {
            key: Some(centroid),
            value: weighted_sum / weight_sum,
            extras: Some(weights.into_iter().map(|weight| ItemExtra { weight }).collect()),
        })
    }
}

/// Arithmetic-mean centroid of a non-empty set of coordinates
fn centroid(points: impl Iterator<Item = Coordinate>) -> Coordinate {
    let (mut lat, mut lon, mut n) = (0.0, 0.0, 0usize);
    for p in points {
        lat += p.lat;
        lon += p.lon;
        n += 1;
    }
    Coordinate::new(lat / n as f64, lon / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    type Point = (f64, f64, f64);

    fn idw() -> InverseDistanceWeightedMean<Point, impl Fn(&Point) -> (Coordinate, f64)> {
        InverseDistanceWeightedMean::new(|p: &Point| (Coordinate::new(p.0, p.1), p.2))
    }

    #[test]
    fn test_arithmetic_mean_values() {
        let mut agg = ArithmeticMean::new(|v: &f64| (*v).into());
        agg.accumulate(&40.0).accumulate(&60.0).accumulate(&80.0);
        let result = agg.finalize().unwrap();
        assert_eq!(result.value, 60.0);
        assert!(result.key.is_none());
        assert!(result.extras.is_none());
    }

    #[test]
    fn test_arithmetic_mean_partial_increments() {
        // Each item is a pre-aggregated (sum, count) pair
        let mut agg = ArithmeticMean::new(|p: &(f64, u64)| (*p).into());
        agg.accumulate_all(&[(100.0, 4), (50.0, 1)]);
        let result = agg.finalize().unwrap();
        assert_eq!(result.value, 30.0);
    }

    #[test]
    fn test_arithmetic_mean_empty_is_error() {
        let agg = ArithmeticMean::new(|v: &f64| (*v).into());
        assert!(matches!(agg.finalize(), Err(ComputeError::EmptyAggregation)));
    }

    #[test]
    fn test_arithmetic_mean_zero_count_partials_is_error() {
        let mut agg = ArithmeticMean::new(|p: &(f64, u64)| (*p).into());
        agg.accumulate(&(0.0, 0));
        assert!(matches!(agg.finalize(), Err(ComputeError::EmptyAggregation)));
    }

    #[test]
    fn test_weighted_mean_empty_is_error() {
        let agg = idw();
        assert!(matches!(agg.finalize(), Err(ComputeError::EmptyAggregation)));
    }

    #[test]
    fn test_weighted_mean_single_item_on_centroid() {
        let mut agg = idw();
        agg.accumulate(&(10.0, 20.0, 55.0));
        let result = agg.finalize().unwrap();

        assert_eq!(result.key, Some(Coordinate::new(10.0, 20.0)));
        assert_eq!(result.value, 55.0);
        // Distance 0 is replaced by 1 m
        assert_eq!(result.extras.unwrap(), vec![ItemExtra { weight: 1.0 }]);
    }

    #[test]
    fn test_weighted_mean_member_on_centroid() {
        let mut agg = idw();
        agg.accumulate_all(&[(0.0, 0.0, 10.0), (0.0, 2.0, 30.0), (0.0, 1.0, 20.0)]);
        let result = agg.finalize().unwrap();

        assert_eq!(result.key, Some(Coordinate::new(0.0, 1.0)));

        let extras = result.extras.unwrap();
        assert_eq!(extras.len(), 3);
        assert!(extras.iter().all(|e| e.weight.is_finite()));
        assert_eq!(extras[2].weight, 1.0);
        // Symmetric outer points share a weight
        assert!((extras[0].weight - extras[1].weight).abs() < 1e-12);
        // The outer values balance around the centre value
        assert!((result.value - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_mean_favours_near_points() {
        let mut agg = idw();
        // Centroid at lon 0.003; the 0.0 point is three times farther than the others
        agg.accumulate_all(&[(0.0, 0.0, 100.0), (0.0, 0.004, 0.0), (0.0, 0.005, 0.0)]);
        let result = agg.finalize().unwrap();
        let plain_mean = 100.0 / 3.0;
        assert!(result.value < plain_mean);
        assert!(result.value > 0.0);
    }

    #[test]
    fn test_weighted_mean_keeps_sign() {
        let mut agg = idw();
        agg.accumulate_all(&[(0.0, 1.0, -10.0), (0.0, 0.0, 0.0), (0.0, 2.0, 10.0)]);
        let result = agg.finalize().unwrap();

        let far = 1.0 / geo::distance(Coordinate::new(0.0, 1.0), Coordinate::new(0.0, 0.0));
        let expected = (-10.0 + 10.0 * far) / (1.0 + 2.0 * far);
        assert!((result.value - expected).abs() < 1e-9);
        assert!(result.value < -9.0);
    }
}
