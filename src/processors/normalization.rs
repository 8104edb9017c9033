//! Intensity normalization and channel stacking.
//!
//! Each input channel (CT, PET) is normalized independently before the
//! channels are stacked into the `[channels, z, y, x]` tensor the model reads.

use crate::core::validation::{validate_same_shape, validate_volume_shape};
use crate::core::{SegError, SegResult, Tensor4D};
use ndarray::{Array4, ArrayView3, ArrayViewMut3, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-channel intensity normalization.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntensityNormalization {
    /// Values are passed through unchanged.
    None,
    /// Subtract the volume mean and divide by the volume standard deviation.
    #[default]
    ZScore,
    /// Clip to `[lower, upper]` then apply fixed `mean`/`std` statistics.
    ClipZScore {
        lower: f32,
        upper: f32,
        mean: f32,
        std: f32,
    },
}

impl IntensityNormalization {
    /// Checks the fixed statistics of [`ClipZScore`](Self::ClipZScore).
    pub fn validate(&self) -> SegResult<()> {
        if let Self::ClipZScore {
            lower,
            upper,
            mean,
            std,
        } = *self
        {
            if ![lower, upper, mean, std].iter().all(|v| v.is_finite()) {
                return Err(SegError::config_error(
                    "ClipZScore parameters must all be finite",
                ));
            }
            if lower > upper {
                return Err(SegError::config_error(format!(
                    "ClipZScore lower bound {} exceeds upper bound {}",
                    lower, upper
                )));
            }
            if std <= 0.0 {
                return Err(SegError::config_error(format!(
                    "ClipZScore std must be positive, got {}",
                    std
                )));
            }
        }
        Ok(())
    }

    /// Writes the normalized `src` into `dst`.
    pub fn apply_into(&self, src: ArrayView3<'_, f32>, dst: ArrayViewMut3<'_, f32>) -> SegResult<()> {
        validate_same_shape(src.shape(), dst.shape(), "normalization output")?;
        match *self {
            Self::None => Zip::from(dst).and(&src).par_for_each(|d, &s| *d = s),
            Self::ZScore => {
                let (mean, std) = mean_std(src);
                let scale = if std > f64::EPSILON { 1.0 / std } else { 1.0 };
                Zip::from(dst)
                    .and(&src)
                    .par_for_each(|d, &s| *d = ((s as f64 - mean) * scale) as f32);
            }
            Self::ClipZScore {
                lower,
                upper,
                mean,
                std,
            } => {
                Zip::from(dst)
                    .and(&src)
                    .par_for_each(|d, &s| *d = (s.clamp(lower, upper) - mean) / std);
            }
        }
        Ok(())
    }
}

/// Mean and population standard deviation, accumulated in f64.
fn mean_std(data: ArrayView3<'_, f32>) -> (f64, f64) {
    let n = data.len();
    if n == 0 {
        return (0.0, 1.0);
    }
    let (sum, sum_sq) = data
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|plane| {
            plane.iter().fold((0.0f64, 0.0f64), |(s, sq), &v| {
                let v = v as f64;
                (s + v, sq + v * v)
            })
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean, var.sqrt())
}

/// Normalizes each channel and stacks them as `[channels, z, y, x]`.
///
/// All channels must share one spatial shape.
pub fn stack_channels(
    channels: &[ArrayView3<'_, f32>],
    normalization: &[IntensityNormalization],
) -> SegResult<Tensor4D> {
    let first = channels
        .first()
        .ok_or_else(|| SegError::invalid_input("at least one input channel is required"))?;
    if normalization.len() != channels.len() {
        return Err(SegError::config_error(format!(
            "{} normalization settings for {} channels",
            normalization.len(),
            channels.len()
        )));
    }
    let shape = first.shape();
    validate_volume_shape(shape, "input channel")?;
    for channel in channels.iter().skip(1) {
        validate_same_shape(shape, channel.shape(), "paired input channels")?;
    }

    let mut stacked = Array4::<f32>::zeros((channels.len(), shape[0], shape[1], shape[2]));
    for ((channel, norm), dst) in channels
        .iter()
        .zip(normalization)
        .zip(stacked.axis_iter_mut(Axis(0)))
    {
        norm.validate()?;
        norm.apply_into(channel.view(), dst)?;
    }
    Ok(stacked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_zscore_has_zero_mean_unit_std() {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z + y + x) as f32);
        let stacked = stack_channels(&[data.view()], &[IntensityNormalization::ZScore]).unwrap();
        let (mean, std) = mean_std(stacked.index_axis(Axis(0), 0));
        assert!(mean.abs() < 1e-5);
        assert!((std - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zscore_on_constant_volume_is_zero() {
        let data = Array3::from_elem((2, 2, 2), 7.0f32);
        let stacked = stack_channels(&[data.view()], &[IntensityNormalization::ZScore]).unwrap();
        assert!(stacked.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_clip_zscore() {
        let data = Array3::from_shape_vec((1, 1, 3), vec![-2000.0, 50.0, 5000.0]).unwrap();
        let norm = IntensityNormalization::ClipZScore {
            lower: -1000.0,
            upper: 1000.0,
            mean: 0.0,
            std: 100.0,
        };
        let stacked = stack_channels(&[data.view()], &[norm]).unwrap();
        let values: Vec<f32> = stacked.iter().copied().collect();
        assert_eq!(values, vec![-10.0, 0.5, 10.0]);
    }

    #[test]
    fn test_stack_rejects_mismatched_channels() {
        let ct = Array3::<f32>::zeros((2, 2, 2));
        let pet = Array3::<f32>::zeros((2, 2, 3));
        let err = stack_channels(
            &[ct.view(), pet.view()],
            &[IntensityNormalization::None; 2],
        )
        .unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_stack_rejects_empty_volume() {
        let empty = Array3::<f32>::zeros((0, 4, 4));
        let err = stack_channels(&[empty.view()], &[IntensityNormalization::ZScore]).unwrap_err();
        assert!(matches!(err, SegError::InvalidInput { .. }));
    }

    #[test]
    fn test_invalid_clip_parameters() {
        let norm = IntensityNormalization::ClipZScore {
            lower: 1.0,
            upper: 0.0,
            mean: 0.0,
            std: 1.0,
        };
        assert!(norm.validate().is_err());
    }

    #[test]
    fn test_deserializes_tagged() {
        let norm: IntensityNormalization = serde_json::from_str(
            r#"{"type":"clip_z_score","lower":-1,"upper":1,"mean":0,"std":1}"#,
        )
        .unwrap();
        assert!(matches!(norm, IntensityNormalization::ClipZScore { .. }));
    }
}
