//! Helpers for working directly with ONNX Runtime sessions.

use crate::core::config::{OrtExecutionProvider, OrtGraphOptimizationLevel, OrtSessionConfig};
use crate::core::errors::{SegError, SegResult};
use ort::execution_providers::ExecutionProviderDispatch;
use ort::logging::LogLevel;
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use std::path::Path;

/// Creates a session for `model_path` with the given runtime configuration.
pub fn load_session(model_path: impl AsRef<Path>, cfg: &OrtSessionConfig) -> SegResult<Session> {
    let path = model_path.as_ref();
    let builder = Session::builder()
        .and_then(|b| b.with_log_level(LogLevel::Error))
        .and_then(|b| apply_ort_config(b, cfg))
        .map_err(|e| {
            SegError::model_load_error(
                path,
                "failed to configure ONNX session",
                Some("check device and execution provider configuration"),
                Some(e),
            )
        })?;

    builder.commit_from_file(path).map_err(|e| {
        SegError::model_load_error(
            path,
            "failed to create ONNX session",
            Some("verify the checkpoint exists and matches the selected execution providers"),
            Some(e),
        )
    })
}

pub(crate) fn apply_ort_config(
    mut builder: SessionBuilder,
    cfg: &OrtSessionConfig,
) -> Result<SessionBuilder, ort::Error> {
    if let Some(intra) = cfg.intra_threads {
        builder = builder.with_intra_threads(intra)?;
    }
    if let Some(inter) = cfg.inter_threads {
        builder = builder.with_inter_threads(inter)?;
    }
    if let Some(par) = cfg.parallel_execution {
        builder = builder.with_parallel_execution(par)?;
    }
    if let Some(level) = cfg.optimization_level {
        let mapped = match level {
            OrtGraphOptimizationLevel::DisableAll => GraphOptimizationLevel::Disable,
            OrtGraphOptimizationLevel::Level1 => GraphOptimizationLevel::Level1,
            OrtGraphOptimizationLevel::Level2 => GraphOptimizationLevel::Level2,
            OrtGraphOptimizationLevel::Level3 => GraphOptimizationLevel::Level3,
        };
        builder = builder.with_optimization_level(mapped)?;
    }
    if let Some(eps) = &cfg.execution_providers {
        let providers = build_execution_providers(eps)?;
        if !providers.is_empty() {
            builder = builder.with_execution_providers(providers)?;
        }
    }
    Ok(builder)
}

fn build_execution_providers(
    eps: &[OrtExecutionProvider],
) -> Result<Vec<ExecutionProviderDispatch>, ort::Error> {
    let mut providers = Vec::with_capacity(eps.len());

    for ep in eps {
        match ep {
            OrtExecutionProvider::CPU => {
                providers.push(ort::execution_providers::CPUExecutionProvider::default().build());
            }
            #[cfg(feature = "cuda")]
            OrtExecutionProvider::CUDA {
                device_id,
                gpu_mem_limit,
            } => {
                let mut cuda = ort::execution_providers::CUDAExecutionProvider::default();
                if let Some(id) = device_id {
                    cuda = cuda.with_device_id(*id);
                }
                if let Some(limit) = gpu_mem_limit {
                    cuda = cuda.with_memory_limit(*limit);
                }
                providers.push(cuda.build());
            }
            #[cfg(feature = "tensorrt")]
            OrtExecutionProvider::TensorRT {
                device_id,
                fp16_enable,
            } => {
                let mut trt = ort::execution_providers::TensorRTExecutionProvider::default();
                if let Some(id) = device_id {
                    trt = trt.with_device_id(*id);
                }
                if let Some(fp16) = fp16_enable {
                    trt = trt.with_fp16(*fp16);
                }
                providers.push(trt.build());
            }
            #[cfg(not(feature = "cuda"))]
            OrtExecutionProvider::CUDA { .. } => {
                tracing::warn!(
                    "CUDA execution provider requested but the cuda feature is not enabled; skipping"
                );
            }
            #[cfg(not(feature = "tensorrt"))]
            OrtExecutionProvider::TensorRT { .. } => {
                tracing::warn!(
                    "TensorRT execution provider requested but the tensorrt feature is not enabled; skipping"
                );
            }
        }
    }

    Ok(providers)
}
