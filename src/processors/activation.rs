//! Output activations turning model logits into probabilities.

use crate::core::Tensor5D;
use crate::core::config::OutputActivation;
use ndarray::{Axis, Zip};

/// Applies `activation` in place to a `[batch, classes, z, y, x]` output.
///
/// Softmax over a single class channel would be constant, so single-channel
/// outputs get the sigmoid instead.
pub fn apply_activation(activation: OutputActivation, logits: &mut Tensor5D) {
    match activation {
        OutputActivation::Identity => {}
        OutputActivation::Sigmoid => sigmoid_inplace(logits),
        OutputActivation::Softmax if logits.shape()[1] <= 1 => sigmoid_inplace(logits),
        OutputActivation::Softmax => softmax_classes(logits),
    }
}

fn sigmoid_inplace(logits: &mut Tensor5D) {
    logits.par_mapv_inplace(sigmoid);
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax_classes(logits: &mut Tensor5D) {
    Zip::from(logits.lanes_mut(Axis(1))).par_for_each(|mut lane| {
        let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        lane.mapv_inplace(|v| (v - max).exp());
        let sum: f32 = lane.sum();
        if sum > 0.0 {
            lane.mapv_inplace(|v| v / sum);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array5;

    #[test]
    fn test_softmax_sums_to_one() {
        let mut logits = Array5::from_shape_fn((1, 3, 2, 2, 2), |(_, c, z, y, x)| {
            (c as f32) * 0.7 - (z + y + x) as f32
        });
        apply_activation(OutputActivation::Softmax, &mut logits);
        for lane in logits.lanes(Axis(1)) {
            assert!((lane.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_sigmoid_of_zero_is_half() {
        let mut logits = Array5::zeros((1, 1, 1, 1, 2));
        apply_activation(OutputActivation::Sigmoid, &mut logits);
        assert!(logits.iter().all(|&v| (v - 0.5).abs() < 1e-7));
    }

    #[test]
    fn test_single_channel_softmax_falls_back_to_sigmoid() {
        let mut logits = Array5::from_elem((1, 1, 1, 1, 1), 100.0f32);
        apply_activation(OutputActivation::Softmax, &mut logits);
        assert!((logits[[0, 0, 0, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_identity_is_noop() {
        let mut logits = Array5::from_elem((1, 2, 1, 1, 1), 3.0f32);
        apply_activation(OutputActivation::Identity, &mut logits);
        assert!(logits.iter().all(|&v| v == 3.0));
    }
}
