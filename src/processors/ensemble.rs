//! Ensemble aggregation of probability maps.
//!
//! Maps from every completed (checkpoint, variant) pass are averaged without
//! weights; the sum is kept in f64 so the result does not depend on the order
//! in which passes finish beyond rounding.

use crate::core::{SegError, SegResult};
use crate::domain::{Geometry, ProbabilityMap, SegmentationMask};
use ndarray::{Array3, Array4, Axis, Zip};

/// Probability above which a single-channel voxel is labelled foreground.
pub const BINARY_THRESHOLD: f32 = 0.5;

/// Streaming form of [`aggregate`]: holds the running sum and the count.
#[derive(Debug, Default)]
pub struct EnsembleAccumulator {
    sum: Option<(Array4<f64>, Geometry)>,
    count: usize,
}

impl EnsembleAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one map. The first map fixes the shape and geometry of the ensemble.
    pub fn add(&mut self, map: &ProbabilityMap) -> SegResult<()> {
        match &mut self.sum {
            None => {
                self.sum = Some((map.data().mapv(f64::from), *map.geometry()));
            }
            Some((sum, geometry)) => {
                if sum.shape() != map.data().shape() {
                    return Err(SegError::shape_mismatch(
                        "ensemble member",
                        sum.shape(),
                        map.data().shape(),
                    ));
                }
                if !geometry.approx_eq(map.geometry()) {
                    return Err(SegError::shape_mismatch(
                        "ensemble member geometry differs",
                        sum.shape(),
                        map.data().shape(),
                    ));
                }
                Zip::from(sum)
                    .and(map.data())
                    .par_for_each(|s, &p| *s += f64::from(p));
            }
        }
        self.count += 1;
        Ok(())
    }

    /// Number of maps added so far.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the averaged map and its thresholded mask.
    pub fn finish(self) -> SegResult<(ProbabilityMap, SegmentationMask)> {
        let (sum, geometry) = self.sum.ok_or(SegError::EmptyEnsemble)?;
        let n = self.count as f64;
        let mean = sum.mapv(|s| (s / n) as f32);
        let map = ProbabilityMap::new(mean, geometry);
        let mask = threshold_mask(&map);
        Ok((map, mask))
    }
}

/// Averages `maps` and thresholds the result.
pub fn aggregate(maps: &[ProbabilityMap]) -> SegResult<(ProbabilityMap, SegmentationMask)> {
    let mut accumulator = EnsembleAccumulator::new();
    for map in maps {
        accumulator.add(map)?;
    }
    accumulator.finish()
}

/// Converts a probability map into labels.
///
/// Single-channel maps are thresholded at [`BINARY_THRESHOLD`]; multi-channel
/// maps take the arg-max class (lowest index on ties).
pub fn threshold_mask(map: &ProbabilityMap) -> SegmentationMask {
    let data = map.data();
    let [z, y, x] = map.spatial_shape();
    let mut labels = Array3::<u8>::zeros((z, y, x));

    if map.classes() == 1 {
        let foreground = data.index_axis(Axis(0), 0);
        Zip::from(&mut labels)
            .and(&foreground)
            .par_for_each(|l, &p| *l = u8::from(p > BINARY_THRESHOLD));
    } else {
        Zip::from(&mut labels)
            .and(data.lanes(Axis(0)))
            .par_for_each(|l, lane| {
                let mut best = 0usize;
                for (class, &p) in lane.iter().enumerate() {
                    if p > lane[best] {
                        best = class;
                    }
                }
                *l = best.min(u8::MAX as usize) as u8;
            });
    }

    SegmentationMask::new(labels, *map.geometry())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_map(classes: usize, value: f32) -> ProbabilityMap {
        ProbabilityMap::new(Array4::from_elem((classes, 2, 2, 2), value), Geometry::default())
    }

    #[test]
    fn test_empty_ensemble() {
        assert!(matches!(aggregate(&[]), Err(SegError::EmptyEnsemble)));
    }

    #[test]
    fn test_average_and_threshold() {
        let (map, mask) = aggregate(&[constant_map(1, 0.2), constant_map(1, 1.0)]).unwrap();
        assert!(map.data().iter().all(|&v| (v - 0.6).abs() < 1e-6));
        assert!(mask.labels().iter().all(|&l| l == 1));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let (_, mask) = aggregate(&[constant_map(1, 0.5)]).unwrap();
        assert_eq!(mask.foreground_count(), 0);
    }

    #[test]
    fn test_multiclass_argmax() {
        let mut data = Array4::<f32>::zeros((2, 1, 1, 2));
        data[[0, 0, 0, 0]] = 0.9;
        data[[1, 0, 0, 0]] = 0.1;
        data[[0, 0, 0, 1]] = 0.3;
        data[[1, 0, 0, 1]] = 0.7;
        let mask = threshold_mask(&ProbabilityMap::new(data, Geometry::default()));
        assert_eq!(mask.labels()[[0, 0, 0]], 0);
        assert_eq!(mask.labels()[[0, 0, 1]], 1);
    }

    #[test]
    fn test_shape_mismatch() {
        let other = ProbabilityMap::new(Array4::zeros((1, 2, 2, 3)), Geometry::default());
        let err = aggregate(&[constant_map(1, 0.1), other]).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_geometry_mismatch() {
        let moved = ProbabilityMap::new(
            Array4::zeros((1, 2, 2, 2)),
            Geometry::new([1.0; 3], [5.0, 0.0, 0.0]),
        );
        assert!(aggregate(&[constant_map(1, 0.1), moved]).unwrap_err().is_shape_mismatch());
    }

    #[test]
    fn test_accumulator_counts() {
        let mut acc = EnsembleAccumulator::new();
        assert!(acc.is_empty());
        acc.add(&constant_map(2, 0.5)).unwrap();
        acc.add(&constant_map(2, 0.5)).unwrap();
        assert_eq!(acc.len(), 2);
    }
}
