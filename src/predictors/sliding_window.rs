//! Sliding-window inference over whole volumes.
//!
//! The stacked `[channels, z, y, x]` input is tiled into overlapping windows,
//! windows are sent to the model in batches, and the per-window probabilities
//! are blended back into a full-resolution map with importance weights:
//!
//! ```text
//! result = sum(weight * prob) / sum(weight)
//! ```
//!
//! Windows are accumulated in grid order, so the batch size has no effect on
//! the result.

use crate::core::config::{ConfigValidator, ParallelPolicy, SlidingWindowConfig};
use crate::core::{BatchSampler, SegError, SegResult, SegmentationModel, Tensor4D, Tensor5D};
use crate::domain::{AugmentationVariant, Geometry, ProbabilityMap, Volume};
use crate::processors::{
    IntensityNormalization, Window, WindowGrid, apply_activation, importance_map, stack_channels,
};
use ndarray::{Array3, Array4, Array5, ArrayViewMut4, Slice, Zip, s};
use rayon::prelude::*;

/// The sliding-window inference engine.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindowInferer {
    config: SlidingWindowConfig,
    parallel: ParallelPolicy,
}

impl SlidingWindowInferer {
    /// Creates an engine after validating `config`.
    pub fn new(config: SlidingWindowConfig) -> SegResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            parallel: ParallelPolicy::default(),
        })
    }

    /// Sets the policy deciding when window extraction runs on the rayon pool.
    pub fn with_parallel_policy(mut self, parallel: ParallelPolicy) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    /// Runs one checkpoint on a CT/PET pair without augmentation.
    pub fn infer(
        &self,
        ct: &Volume,
        pet: &Volume,
        model: &dyn SegmentationModel,
        normalization: &[IntensityNormalization; 2],
    ) -> SegResult<ProbabilityMap> {
        let input = prepare_input(ct, pet, normalization)?;
        self.infer_variant(&input, ct.geometry(), model, AugmentationVariant::IDENTITY)
    }

    /// Runs one (checkpoint, variant) pass on an already stacked input.
    ///
    /// The variant is applied to the input before tiling and inverted on the
    /// reassembled map, so the result is aligned with the untransformed input.
    pub fn infer_variant(
        &self,
        input: &Tensor4D,
        geometry: &Geometry,
        model: &dyn SegmentationModel,
        variant: AugmentationVariant,
    ) -> SegResult<ProbabilityMap> {
        let spatial = &input.shape()[1..];
        let augmented = variant.apply(input);
        let prediction = self.predict_tensor(&augmented, model)?;
        let restored = variant.invert(&prediction);

        if &restored.shape()[1..] != spatial {
            return Err(SegError::shape_mismatch(
                format!("prediction for variant {}", variant),
                spatial,
                &restored.shape()[1..],
            ));
        }
        Ok(ProbabilityMap::new(restored, *geometry))
    }

    /// Tiles `input`, runs the model and blends the windows back together.
    ///
    /// Returns probabilities of shape `[classes, z, y, x]` matching the input's
    /// spatial shape.
    pub fn predict_tensor(
        &self,
        input: &Tensor4D,
        model: &dyn SegmentationModel,
    ) -> SegResult<Tensor4D> {
        let channels = input.shape()[0];
        let shape = [input.shape()[1], input.shape()[2], input.shape()[3]];
        if shape.contains(&0) {
            return Err(SegError::invalid_input(format!(
                "cannot run inference on an empty volume {:?}",
                shape
            )));
        }
        if let Some(expected) = model.input_channels()
            && expected != channels
        {
            return Err(SegError::shape_mismatch(
                format!("input channels for model '{}'", model.name()),
                &[expected],
                &[channels],
            ));
        }

        let window = self.resolve_window(model);
        let padded_shape = [0, 1, 2].map(|a| shape[a].max(window[a]));
        let padded = pad_to(input, padded_shape);
        let source = padded.as_ref().unwrap_or(input);

        let grid = WindowGrid::new(padded_shape, window, self.config.overlap)?;
        let importance = importance_map(window, self.config.blend_mode);
        let sampler = BatchSampler::new(self.config.batch_size);

        tracing::debug!(
            "Sliding window: volume {:?} (padded {:?}), window {:?}, {} windows in {} batches",
            shape,
            padded_shape,
            window,
            grid.len(),
            sampler.batch_count(grid.len())
        );

        let mut probabilities: Option<Array4<f32>> = None;
        let mut weights = Array3::<f32>::zeros(padded_shape);

        for (offset, windows) in sampler.batches_with_offsets(grid.windows()) {
            let batch = self.extract_batch(source, windows, window);
            let mut output = model.predict(&batch)?;

            let out_shape = output.shape();
            let classes = out_shape.get(1).copied().unwrap_or(0);
            let expected = [windows.len(), classes, window[0], window[1], window[2]];
            if out_shape != expected || classes == 0 {
                return Err(SegError::shape_mismatch(
                    format!("model '{}' output for windows {}..", model.name(), offset),
                    &expected,
                    out_shape,
                ));
            }
            apply_activation(self.config.activation, &mut output);

            let acc = probabilities.get_or_insert_with(|| {
                Array4::zeros((classes, padded_shape[0], padded_shape[1], padded_shape[2]))
            });
            if acc.shape()[0] != classes {
                return Err(SegError::shape_mismatch(
                    format!("class count of model '{}'", model.name()),
                    &[acc.shape()[0]],
                    &[classes],
                ));
            }

            for (w, probs) in windows.iter().zip(output.outer_iter()) {
                let slices = w.slices();
                let mut region = acc.slice_each_axis_mut(|ax| match ax.axis.index() {
                    0 => Slice::from(..),
                    i => slices[i - 1],
                });
                for (mut acc_c, prob_c) in region.outer_iter_mut().zip(probs.outer_iter()) {
                    Zip::from(&mut acc_c)
                        .and(&prob_c)
                        .and(&importance)
                        .par_for_each(|a, &p, &wgt| *a += p * wgt);
                }
                let mut weight_region = weights.slice_each_axis_mut(|ax| slices[ax.axis.index()]);
                weight_region += &importance;
            }
        }

        let mut acc = probabilities.ok_or_else(|| {
            SegError::invalid_input("window grid produced no windows")
        })?;
        for mut class_map in acc.outer_iter_mut() {
            Zip::from(&mut class_map)
                .and(&weights)
                .par_for_each(|a, &wgt| *a /= wgt);
        }

        if padded.is_some() {
            Ok(acc
                .slice(s![.., ..shape[0], ..shape[1], ..shape[2]])
                .to_owned())
        } else {
            Ok(acc)
        }
    }

    fn resolve_window(&self, model: &dyn SegmentationModel) -> [usize; 3] {
        match model.window_shape() {
            Some(fixed) if fixed != self.config.window_size => {
                tracing::debug!(
                    "Model '{}' has a fixed window {:?}; overriding configured {:?}",
                    model.name(),
                    fixed,
                    self.config.window_size
                );
                fixed
            }
            _ => self.config.window_size,
        }
    }

    fn extract_batch(&self, source: &Tensor4D, windows: &[Window], window: [usize; 3]) -> Tensor5D {
        let channels = source.shape()[0];
        let mut batch =
            Array5::<f32>::zeros((windows.len(), channels, window[0], window[1], window[2]));

        let copy = |mut dst: ArrayViewMut4<'_, f32>, w: &Window| {
            let slices = w.slices();
            let src = source.slice_each_axis(|ax| match ax.axis.index() {
                0 => Slice::from(..),
                i => slices[i - 1],
            });
            dst.assign(&src);
        };

        if self.parallel.should_parallelize(windows.len()) {
            batch
                .outer_iter_mut()
                .into_par_iter()
                .zip(windows.par_iter())
                .for_each(|(dst, w)| copy(dst, w));
        } else {
            batch
                .outer_iter_mut()
                .zip(windows.iter())
                .for_each(|(dst, w)| copy(dst, w));
        }
        batch
    }
}

/// Normalizes and stacks a CT/PET pair into the `[2, z, y, x]` model input.
pub fn prepare_input(
    ct: &Volume,
    pet: &Volume,
    normalization: &[IntensityNormalization; 2],
) -> SegResult<Tensor4D> {
    ct.ensure_paired(pet, "CT/PET pair")?;
    stack_channels(&[ct.data(), pet.data()], normalization)
}

/// Zero-pads the spatial axes of `input` up to `shape`; `None` if no padding is needed.
fn pad_to(input: &Tensor4D, shape: [usize; 3]) -> Option<Tensor4D> {
    let current = [input.shape()[1], input.shape()[2], input.shape()[3]];
    if current == shape {
        return None;
    }
    let mut padded = Array4::<f32>::zeros((input.shape()[0], shape[0], shape[1], shape[2]));
    padded
        .slice_mut(s![.., ..current[0], ..current[1], ..current[2]])
        .assign(input);
    Some(padded)
}
