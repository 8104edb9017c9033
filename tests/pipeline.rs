//! End-to-end runs of the pipeline driver on synthetic cases.

use autopet_infer::core::config::{SlidingWindowConfig, TtaConfig};
use autopet_infer::core::{
    CheckpointLoader, ResourceProbe, ResourceReport, SegResult, SegmentationModel, Tensor5D,
    VolumeIo,
};
use autopet_infer::domain::{Geometry, ScalarType, Volume};
use autopet_infer::pipeline::{PipelineConfig, PipelineDriver, PipelineState, Strategy};
use autopet_infer::utils::FileVolumeIo;
use ndarray::{Array3, s};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const SIZE: usize = 96;
const LESION: std::ops::Range<usize> = 40..56;

/// Uses ten times the normalized PET channel as its foreground logit.
#[derive(Debug)]
struct PetThresholdModel;

impl SegmentationModel for PetThresholdModel {
    fn name(&self) -> &str {
        "pet-threshold"
    }

    fn input_channels(&self) -> Option<usize> {
        Some(2)
    }

    fn predict(&self, batch: &Tensor5D) -> SegResult<Tensor5D> {
        Ok(batch.slice(s![.., 1..2, .., .., ..]).mapv(|v| v * 10.0))
    }
}

#[derive(Debug)]
struct StubLoader;

impl CheckpointLoader for StubLoader {
    fn load(&self, _path: &Path) -> SegResult<Box<dyn SegmentationModel>> {
        Ok(Box::new(PetThresholdModel))
    }
}

#[derive(Debug)]
struct NoGpu;

impl ResourceProbe for NoGpu {
    fn probe(&self) -> ResourceReport {
        ResourceReport::unavailable()
    }
}

struct Case {
    root: TempDir,
    config: PipelineConfig,
}

impl Case {
    fn output_dir(&self) -> PathBuf {
        self.root.path().join("output")
    }

    fn driver(&self, config: PipelineConfig) -> PipelineDriver {
        PipelineDriver::new(config)
            .with_checkpoint_loader(StubLoader)
            .with_resource_probe(NoGpu)
    }
}

/// A 96^3 CT/PET pair with a bright PET cube, plus `checkpoints` dummy weights.
fn synthetic_case(checkpoints: usize) -> Result<Case, Box<dyn std::error::Error>> {
    let root = TempDir::new()?;
    let geometry = Geometry::new([2.0, 2.0, 3.0], [-96.0, -96.0, -144.0]);
    let io = FileVolumeIo::new();

    let ct = Array3::from_shape_fn((SIZE, SIZE, SIZE), |(z, y, x)| {
        ((z + y + x) % 200) as f32 - 100.0
    });
    let mut pet = Array3::<f32>::zeros((SIZE, SIZE, SIZE));
    pet.slice_mut(s![LESION, LESION, LESION]).fill(10.0);

    io.save(
        &Volume::new(ct, geometry).with_scalar_type(ScalarType::I16),
        &root.path().join("input/images/ct/psma_case_0001.mha"),
    )?;
    io.save(
        &Volume::new(pet, geometry),
        &root.path().join("input/images/pet/psma_case_0001.mha"),
    )?;

    let weights = root.path().join("weights");
    std::fs::create_dir_all(&weights)?;
    for fold in 0..checkpoints {
        std::fs::write(weights.join(format!("fold_{}.onnx", fold)), b"")?;
    }

    let config = PipelineConfig::new()
        .with_input_dir(root.path().join("input"))
        .with_output_dir(root.path().join("output"))
        .with_datacentric_path(root.path().join("output/data-centric-model.json"))
        .with_weights_dir(weights)
        .with_sliding_window(
            SlidingWindowConfig::new()
                .with_window_size([64, 64, 64])
                .with_overlap(0.5),
        );
    Ok(Case { root, config })
}

#[test]
fn test_three_variants_with_ample_budget() -> Result<(), Box<dyn std::error::Error>> {
    let case = synthetic_case(1)?;
    let config = case.config.clone().with_tta(
        TtaConfig::new()
            .with_max_variants(3)
            .with_max_time(Duration::from_secs(3600)),
    );
    let mut driver = case.driver(config);
    let outcome = driver.run()?;

    assert_eq!(driver.state(), PipelineState::Done);
    assert_eq!(outcome.case_id, "psma_case_0001");
    assert_eq!(outcome.ensemble_size, 3);
    assert_eq!(outcome.stats.executed(), 3);
    assert_eq!(outcome.stats.skipped_variants, 0);
    assert!(outcome.stats.passes[0].variant.is_identity());

    let mask = FileVolumeIo::new().load(&outcome.mask_path)?;
    assert_eq!(outcome.mask_path, case.output_dir().join("psma_case_0001.mha"));
    assert_eq!(mask.shape(), [SIZE, SIZE, SIZE]);
    assert_eq!(mask.scalar_type(), ScalarType::U8);
    assert!(mask.geometry().approx_eq(&Geometry::new([2.0, 2.0, 3.0], [-96.0, -96.0, -144.0])));
    assert!(mask.data().iter().all(|&v| v == 0.0 || v == 1.0));

    // flipped passes are realigned, so the mask is exactly the lesion cube
    let lesion = LESION.len();
    assert_eq!(outcome.foreground_voxels, lesion * lesion * lesion);
    assert_eq!(mask.data()[[48, 48, 48]], 1.0);
    assert_eq!(mask.data()[[10, 48, 48]], 0.0);

    assert_eq!(
        std::fs::read_to_string(case.output_dir().join("data-centric-model.json"))?,
        "true"
    );
    Ok(())
}

#[test]
fn test_zero_budget_runs_identity_only() -> Result<(), Box<dyn std::error::Error>> {
    let case = synthetic_case(1)?;
    let config = case.config.clone().with_tta(
        TtaConfig::new()
            .with_dynamic(false)
            .with_cost_estimate(Duration::from_secs(1))
            .with_max_time(Duration::ZERO),
    );
    let outcome = case.driver(config).run()?;

    assert_eq!(outcome.ensemble_size, 1);
    assert_eq!(outcome.stats.executed(), 1);
    assert_eq!(outcome.stats.skipped_variants, 7);
    assert!(outcome.stats.passes[0].variant.is_identity());
    Ok(())
}

#[test]
fn test_checkpoints_times_variants() -> Result<(), Box<dyn std::error::Error>> {
    let case = synthetic_case(3)?;
    let config = case
        .config
        .clone()
        .with_strategy(Strategy::Baseline)
        .with_tta(
            TtaConfig::new()
                .with_max_variants(2)
                .with_max_time(Duration::from_secs(3600)),
        );
    let outcome = case.driver(config).run()?;

    assert_eq!(outcome.stats.checkpoints, 3);
    assert_eq!(outcome.ensemble_size, 6);
    let order: Vec<&str> = outcome
        .stats
        .passes
        .iter()
        .map(|p| p.checkpoint.as_str())
        .collect();
    assert_eq!(order, ["fold_0", "fold_0", "fold_1", "fold_1", "fold_2", "fold_2"]);
    assert_eq!(std::fs::read_to_string(&outcome.datacentric_path)?, "false");
    Ok(())
}

#[test]
fn test_empty_checkpoint_set_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let case = synthetic_case(0)?;
    let mut driver = case.driver(case.config.clone());

    let err = driver.run().unwrap_err();
    assert!(err.is_configuration(), "unexpected error: {}", err);
    assert_eq!(driver.state(), PipelineState::Failed);
    assert!(!case.output_dir().join("psma_case_0001.mha").exists());
    assert!(!case.output_dir().join("data-centric-model.json").exists());
    Ok(())
}

#[test]
fn test_tta_disabled_ignores_budget() -> Result<(), Box<dyn std::error::Error>> {
    let case = synthetic_case(1)?;
    let config = case.config.clone().with_tta(TtaConfig::new().with_enabled(false));
    let outcome = case.driver(config).run()?;
    assert_eq!(outcome.ensemble_size, 1);
    assert_eq!(outcome.stats.skipped_variants, 0);
    Ok(())
}
