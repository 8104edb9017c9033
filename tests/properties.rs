//! Property tests for scheduling, window tiling, reassembly and aggregation.

use autopet_infer::core::config::{BlendMode, OutputActivation, SlidingWindowConfig};
use autopet_infer::core::{SegResult, SegmentationModel, Tensor4D, Tensor5D};
use autopet_infer::domain::{Geometry, ProbabilityMap, VariantPool};
use autopet_infer::pipeline::{CostEstimator, schedule};
use autopet_infer::predictors::SlidingWindowInferer;
use autopet_infer::processors::{WindowGrid, aggregate};
use ndarray::{Array4, s};
use proptest::prelude::*;
use std::time::Duration;

/// Echoes the first input channel.
#[derive(Debug)]
struct EchoModel;

impl SegmentationModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    fn predict(&self, batch: &Tensor5D) -> SegResult<Tensor5D> {
        Ok(batch.slice(s![.., 0..1, .., .., ..]).to_owned())
    }
}

fn maps_strategy() -> impl Strategy<Value = Vec<Vec<f32>>> {
    (1usize..6).prop_flat_map(|n| prop::collection::vec(prop::collection::vec(0.0f32..1.0, 24), n))
}

fn to_map(values: &[f32]) -> ProbabilityMap {
    let data = Array4::from_shape_vec((1, 2, 3, 4), values.to_vec()).unwrap();
    ProbabilityMap::new(data, Geometry::default())
}

proptest! {
    #[test]
    fn prop_schedule_always_starts_with_identity(
        max_variants in 1usize..=8,
        budget_ms in 0u64..5_000,
        cost_ms in 0u64..2_000,
    ) {
        let plan = schedule(
            &VariantPool::new(max_variants),
            Duration::from_millis(budget_ms),
            Duration::from_millis(cost_ms),
        );
        prop_assert!(!plan.is_empty());
        prop_assert!(plan[0].is_identity());
        prop_assert!(plan.len() <= max_variants);
    }

    #[test]
    fn prop_schedule_is_monotonic_in_budget(
        max_variants in 1usize..=8,
        a_ms in 0u64..5_000,
        b_ms in 0u64..5_000,
        cost_ms in 1u64..2_000,
    ) {
        let pool = VariantPool::new(max_variants);
        let cost = Duration::from_millis(cost_ms);
        let (small, large) = (a_ms.min(b_ms), a_ms.max(b_ms));
        let fewer = schedule(&pool, Duration::from_millis(small), cost);
        let more = schedule(&pool, Duration::from_millis(large), cost);
        prop_assert!(fewer.len() <= more.len());
        // the smaller plan is a prefix of the larger one
        prop_assert_eq!(&more[..fewer.len()], &fewer[..]);
    }

    #[test]
    fn prop_smoothed_estimate_moves_toward_measurement(
        initial_ms in 1u64..10_000,
        measured_ms in 1u64..10_000,
        alpha in 0.05f64..=1.0,
    ) {
        let initial = Duration::from_millis(initial_ms);
        let measured = Duration::from_millis(measured_ms);
        let mut estimator = CostEstimator::smoothed(Some(initial), alpha);
        estimator.update(measured);
        let next = estimator.estimate().unwrap();
        let (lo, hi) = (initial.min(measured), initial.max(measured));
        let slack = Duration::from_micros(1);
        prop_assert!(next + slack >= lo && next <= hi + slack);
    }

    #[test]
    fn prop_windows_cover_every_voxel(
        shape in prop::array::uniform3(1usize..40),
        window in prop::array::uniform3(1usize..16),
        overlap in 0.0f64..0.9,
    ) {
        let shape = [0, 1, 2].map(|a| shape[a].max(window[a]));
        let grid = WindowGrid::new(shape, window, overlap).unwrap();
        let mut hits = ndarray::Array3::<u32>::zeros(shape);
        for w in grid.windows() {
            prop_assert!((0..3).all(|a| w.start[a] + w.size[a] <= shape[a]));
            hits.slice_each_axis_mut(|ax| w.slices()[ax.axis.index()]).mapv_inplace(|h| h + 1);
        }
        prop_assert!(hits.iter().all(|&h| h >= 1));
    }

    #[test]
    fn prop_constant_volume_reassembles_to_constant(
        shape in prop::array::uniform3(2usize..20),
        window in prop::array::uniform3(2usize..9),
        value in -100.0f32..100.0,
        gaussian in any::<bool>(),
        batch_size in 1usize..5,
    ) {
        let blend_mode = if gaussian {
            BlendMode::Gaussian { sigma_scale: 0.125 }
        } else {
            BlendMode::Constant
        };
        let inferer = SlidingWindowInferer::new(
            SlidingWindowConfig::new()
                .with_window_size(window)
                .with_overlap(0.5)
                .with_batch_size(batch_size)
                .with_blend_mode(blend_mode)
                .with_activation(OutputActivation::Identity),
        )
        .unwrap();
        let input: Tensor4D = Array4::from_elem((2, shape[0], shape[1], shape[2]), value);
        let out = inferer.predict_tensor(&input, &EchoModel).unwrap();
        prop_assert_eq!(out.shape(), &[1, shape[0], shape[1], shape[2]]);
        let tolerance = 1e-4 * value.abs().max(1.0);
        prop_assert!(out.iter().all(|&v| (v - value).abs() <= tolerance));
    }

    #[test]
    fn prop_aggregation_is_order_invariant(maps in maps_strategy()) {
        let forward: Vec<ProbabilityMap> = maps.iter().map(|m| to_map(m)).collect();
        let backward: Vec<ProbabilityMap> = maps.iter().rev().map(|m| to_map(m)).collect();
        let (a, mask_a) = aggregate(&forward).unwrap();
        let (b, mask_b) = aggregate(&backward).unwrap();
        for (x, y) in a.data().iter().zip(b.data().iter()) {
            prop_assert!((x - y).abs() <= 1e-6);
        }
        // voxels sitting exactly on the threshold are not expected from random input
        prop_assert_eq!(mask_a.foreground_count(), mask_b.foreground_count());
    }
}

#[test]
fn test_empty_aggregation_fails() {
    assert!(matches!(
        aggregate(&[]),
        Err(autopet_infer::core::SegError::EmptyEnsemble)
    ));
}
