//! ONNX Runtime backed segmentation model with a pool of sessions.

use super::session::load_session;
use crate::core::Tensor5D;
use crate::core::config::ModelLoadConfig;
use crate::core::errors::{SegError, SegResult, SimpleError};
use crate::core::traits::SegmentationModel;
use ndarray::ArrayView5;
use ort::session::Session;
use ort::value::{TensorRef, ValueType};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A checkpoint loaded into one or more ONNX Runtime sessions.
///
/// Calls to [`SegmentationModel::predict`] pick a session round-robin, so a
/// pool larger than one lets concurrent callers run in parallel.
pub struct OrtSegmenter {
    sessions: Vec<Mutex<Session>>,
    next_idx: AtomicUsize,
    input_name: String,
    output_name: String,
    input_shape: Option<Vec<i64>>,
    model_path: PathBuf,
    model_name: String,
}

impl std::fmt::Debug for OrtSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtSegmenter")
            .field("sessions", &self.sessions.len())
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("input_shape", &self.input_shape)
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl OrtSegmenter {
    /// Loads `model_path` using the shared checkpoint configuration.
    pub fn from_config(config: &ModelLoadConfig, model_path: impl AsRef<Path>) -> SegResult<Self> {
        let path = model_path.as_ref();
        let pool_size = config.session_pool_size.max(1);
        let mut sessions = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            sessions.push(Mutex::new(load_session(path, &config.ort_session)?));
        }

        let (detected_input, input_shape, detected_output) = {
            let session = &sessions[0].lock().map_err(|_| {
                SegError::model_load_error(
                    path,
                    "session lock poisoned during load",
                    None,
                    None::<SimpleError>,
                )
            })?;
            let input = session.inputs.first();
            let input_shape = input.and_then(|i| match &i.input_type {
                ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect::<Vec<_>>()),
                _ => None,
            });
            (
                input.map(|i| i.name.clone()),
                input_shape,
                session.outputs.first().map(|o| o.name.clone()),
            )
        };

        let input_name = config
            .input_name
            .clone()
            .or(detected_input)
            .ok_or_else(|| {
                SegError::model_load_error(path, "model declares no inputs", None, None::<SimpleError>)
            })?;
        let output_name = config
            .output_name
            .clone()
            .or(detected_output)
            .ok_or_else(|| {
                SegError::model_load_error(
                    path,
                    "model declares no outputs",
                    None,
                    None::<SimpleError>,
                )
            })?;

        let model_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown_model")
            .to_string();

        tracing::debug!(
            "Loaded checkpoint '{}' ({} session(s), input '{}' {:?}, output '{}')",
            model_name,
            sessions.len(),
            input_name,
            input_shape,
            output_name
        );

        Ok(Self {
            sessions,
            next_idx: AtomicUsize::new(0),
            input_name,
            output_name,
            input_shape,
            model_path: path.to_path_buf(),
            model_name,
        })
    }

    /// Returns the checkpoint path.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Declared input shape of the model. Dynamic dimensions are returned as-is (e.g. -1).
    pub fn primary_input_shape(&self) -> Option<&[i64]> {
        self.input_shape.as_deref()
    }

    fn static_dim(&self, index: usize) -> Option<usize> {
        let shape = self.input_shape.as_ref()?;
        let dim = *shape.get(index)?;
        (shape.len() == 5 && dim > 0).then_some(dim as usize)
    }
}

impl SegmentationModel for OrtSegmenter {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn input_channels(&self) -> Option<usize> {
        self.static_dim(1)
    }

    fn window_shape(&self) -> Option<[usize; 3]> {
        Some([self.static_dim(2)?, self.static_dim(3)?, self.static_dim(4)?])
    }

    fn predict(&self, batch: &Tensor5D) -> SegResult<Tensor5D> {
        let input_shape = batch.shape().to_vec();
        let contiguous = batch.as_standard_layout();

        let input_tensor = TensorRef::from_array_view(contiguous.view()).map_err(|e| {
            SegError::inference_error(
                &self.model_name,
                &format!("failed to convert input tensor with shape {:?}", input_shape),
                e,
            )
        })?;
        let inputs = ort::inputs![self.input_name.as_str() => input_tensor];

        let idx = self.next_idx.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[idx].lock().map_err(|_| {
            SegError::inference_error(
                &self.model_name,
                &format!(
                    "failed to acquire session lock for session {}/{}",
                    idx,
                    self.sessions.len()
                ),
                SimpleError::new("session lock poisoned"),
            )
        })?;

        let outputs = session.run(inputs).map_err(|e| {
            SegError::inference_error(
                &self.model_name,
                &format!(
                    "forward pass failed for input '{}' with shape {:?}",
                    self.input_name, input_shape
                ),
                e,
            )
        })?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                SegError::inference_error(
                    &self.model_name,
                    &format!("failed to extract output '{}' as f32", self.output_name),
                    e,
                )
            })?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        if dims.len() != 5
            || dims[0] != input_shape[0]
            || dims[2..] != input_shape[2..]
        {
            let mut expected = input_shape.clone();
            expected[1] = dims.get(1).copied().unwrap_or(0);
            return Err(SegError::shape_mismatch(
                format!("output of model '{}'", self.model_name),
                &expected,
                &dims,
            ));
        }

        let view = ArrayView5::from_shape((dims[0], dims[1], dims[2], dims[3], dims[4]), data)?;
        Ok(view.to_owned())
    }
}
