//! The pipeline driver: one case from input files to mask and artifact.
//!
//! ```text
//! Idle -> Loading -> Converting -> Inferring -> Aggregating -> Writing -> Done
//!                               any fatal error -> Failed
//! ```
//!
//! Every output is staged through [`PendingOutputs`] and only renamed into
//! place once all of them have been written, so a failed run leaves nothing at
//! the final paths.

use super::config::PipelineConfig;
use super::scheduler::{CostEstimator, DynamicSchedule, TimeBudget};
use super::stats::InferenceStats;
use crate::core::config::ConfigValidator;
use crate::core::{
    CheckpointLoader, OrtCheckpointLoader, ResourceProbe, SegError, SegResult, VolumeIo,
};
use crate::domain::{CheckpointSet, Geometry, LoadedCheckpoint, VariantPool};
use crate::predictors::{SlidingWindowInferer, prepare_input};
use crate::processors::EnsembleAccumulator;
use crate::utils::{FileVolumeIo, PendingOutputs, SystemProbe, VolumeFormat, case_id};
use ndarray::Array4;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Intermediate file names, written when an intermediate directory is set.
const INTERMEDIATE_CT: &str = "CTres.nii.gz";
const INTERMEDIATE_PET: &str = "SUV.nii.gz";
const INTERMEDIATE_PRED: &str = "PRED.nii.gz";

/// Stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Loading,
    Converting,
    Inferring,
    Aggregating,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Converting => "converting",
            Self::Inferring => "inferring",
            Self::Aggregating => "aggregating",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Case identifier, taken from the CT file name.
    pub case_id: String,
    pub mask_path: PathBuf,
    pub datacentric_path: PathBuf,
    /// Intermediate NIfTI files, empty when no intermediate directory is set.
    pub intermediate_paths: Vec<PathBuf>,
    /// Number of maps averaged into the final prediction.
    pub ensemble_size: usize,
    /// Number of voxels labelled as lesion.
    pub foreground_voxels: usize,
    pub stats: InferenceStats,
}

/// Runs a single case through probing, checkpoint loading, tiled inference with
/// scheduled test-time augmentation, ensembling and output writing.
#[derive(Debug)]
pub struct PipelineDriver {
    config: PipelineConfig,
    volume_io: Box<dyn VolumeIo>,
    loader: Box<dyn CheckpointLoader>,
    probe: Box<dyn ResourceProbe>,
    state: PipelineState,
}

impl PipelineDriver {
    /// Creates a driver with file-backed I/O, ONNX Runtime checkpoints and the
    /// `nvidia-smi` probe.
    pub fn new(config: PipelineConfig) -> Self {
        let loader = OrtCheckpointLoader::new(config.model.clone());
        Self {
            config,
            volume_io: Box::new(FileVolumeIo::new()),
            loader: Box::new(loader),
            probe: Box::new(SystemProbe::new()),
            state: PipelineState::Idle,
        }
    }

    pub fn with_volume_io(mut self, volume_io: impl VolumeIo + 'static) -> Self {
        self.volume_io = Box::new(volume_io);
        self
    }

    pub fn with_checkpoint_loader(mut self, loader: impl CheckpointLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_resource_probe(mut self, probe: impl ResourceProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Processes the case found under the configured input directory.
    ///
    /// A driver runs once; calling `run` again after it finished is an error.
    pub fn run(&mut self) -> SegResult<PipelineOutcome> {
        if self.state != PipelineState::Idle {
            return Err(SegError::invalid_input(format!(
                "pipeline already ran (state: {})",
                self.state
            )));
        }
        let started = Instant::now();
        match self.execute(started) {
            Ok(outcome) => {
                self.transition(PipelineState::Done);
                info!(
                    "Case {} done in {:.2} s: {} map(s) ensembled, {} foreground voxel(s)",
                    outcome.case_id,
                    started.elapsed().as_secs_f64(),
                    outcome.ensemble_size,
                    outcome.foreground_voxels
                );
                Ok(outcome)
            }
            Err(e) => {
                error!("Pipeline failed while {}: {}", self.state, e);
                self.transition(PipelineState::Failed);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline state {} -> {}", self.state, next);
        self.state = next;
    }

    fn execute(&mut self, started: Instant) -> SegResult<PipelineOutcome> {
        self.config.validate()?;
        self.config.parallel.install();

        self.transition(PipelineState::Loading);
        self.probe.probe().log();
        let checkpoints = CheckpointSet::discover(&self.config.weights_dir, self.loader.extension())?;
        let models = checkpoints.load_all(self.loader.as_ref())?;

        self.transition(PipelineState::Converting);
        let images = self.config.input_dir.join("images");
        let ct_path = first_volume(&images.join("ct"))?;
        let pet_path = first_volume(&images.join("pet"))?;
        let case = case_id(&ct_path)?;
        info!(
            "Case {}: CT {}, PET {}",
            case,
            ct_path.display(),
            pet_path.display()
        );
        let ct = self.volume_io.load(&ct_path)?;
        let pet = self.volume_io.load(&pet_path)?;
        let input = prepare_input(&ct, &pet, &self.config.normalization)?;
        let geometry = *ct.geometry();

        let mut pending = PendingOutputs::new();
        let mut intermediate_paths = Vec::new();
        if let Some(dir) = self.config.intermediate_dir.clone() {
            for (name, volume) in [(INTERMEDIATE_CT, &ct), (INTERMEDIATE_PET, &pet)] {
                let target = dir.join(name);
                self.volume_io.save(volume, &pending.stage(&target)?)?;
                intermediate_paths.push(target);
            }
        }
        drop((ct, pet));

        self.transition(PipelineState::Inferring);
        let mut stats = InferenceStats::new();
        stats.checkpoints = models.len();
        let accumulator = self.run_ensemble(&models, &input, &geometry, &mut stats)?;

        self.transition(PipelineState::Aggregating);
        let ensemble_size = accumulator.len();
        let (_probabilities, mask) = accumulator.finish()?;

        self.transition(PipelineState::Writing);
        let mask_volume = mask.to_volume();
        let mask_path = self.config.output_dir.join(format!("{}.mha", case));
        self.volume_io.save(&mask_volume, &pending.stage(&mask_path)?)?;
        if let Some(dir) = &self.config.intermediate_dir {
            let target = dir.join(INTERMEDIATE_PRED);
            self.volume_io.save(&mask_volume, &pending.stage(&target)?)?;
            intermediate_paths.push(target);
        }

        let datacentric_path = self.config.datacentric_path.clone();
        let artifact = serde_json::to_string_pretty(&self.config.strategy.is_data_centric())?;
        std::fs::write(pending.stage(&datacentric_path)?, artifact)?;
        pending.commit()?;
        info!("Wrote {}", mask_path.display());

        stats.total_time = started.elapsed();
        info!("{}", stats);

        Ok(PipelineOutcome {
            case_id: case,
            mask_path,
            datacentric_path,
            intermediate_paths,
            ensemble_size,
            foreground_voxels: mask.foreground_count(),
            stats,
        })
    }

    /// Runs every checkpoint over its scheduled variants and accumulates the maps.
    ///
    /// The time budget is shared evenly among the checkpoints that have not run
    /// yet, so time one checkpoint leaves unused carries over to the next.
    fn run_ensemble(
        &self,
        models: &[LoadedCheckpoint],
        input: &Array4<f32>,
        geometry: &Geometry,
        stats: &mut InferenceStats,
    ) -> SegResult<EnsembleAccumulator> {
        let tta = &self.config.tta;
        let pool = VariantPool::from_config(tta);
        let mut budget = TimeBudget::new(if tta.enabled {
            tta.max_time()
        } else {
            Duration::ZERO
        });
        let mut estimator = if tta.dynamic {
            CostEstimator::smoothed(tta.cost_estimate(), tta.smoothing)
        } else {
            CostEstimator::Fixed(tta.cost_estimate())
        };
        let inferer = SlidingWindowInferer::new(self.config.sliding_window.clone())?
            .with_parallel_policy(self.config.parallel.clone());
        let mut accumulator = EnsembleAccumulator::new();

        info!(
            "Running {} checkpoint(s), up to {} variant(s) each, TTA budget {:.1} s",
            models.len(),
            pool.len(),
            budget.total().as_secs_f64()
        );

        for (idx, loaded) in models.iter().enumerate() {
            let name = loaded.checkpoint.name();
            let share = budget.share(models.len() - idx);
            let mut plan = DynamicSchedule::new(&pool, share, estimator.clone());
            debug!("{}: variant budget {:.2} s", name, share.as_secs_f64());

            while let Some(variant) = plan.next_variant() {
                let pass_started = Instant::now();
                let result = inferer.infer_variant(input, geometry, loaded.model.as_ref(), variant);
                let spent = pass_started.elapsed();
                budget.consume(spent);

                match result {
                    Ok(map) => {
                        accumulator.add(&map)?;
                        plan.record(spent);
                        stats.record_pass(name, variant, spent);
                        info!("{} / {}: {:.2} s", name, variant, spent.as_secs_f64());
                    }
                    Err(e)
                        if self.config.tolerate_variant_failures
                            && !variant.is_identity()
                            && e.is_shape_mismatch() =>
                    {
                        warn!(
                            "{} / {} failed, keeping {} completed map(s): {}",
                            name,
                            variant,
                            accumulator.len(),
                            e
                        );
                        stats.failed_variants += 1;
                        plan.abandon();
                    }
                    Err(e) => return Err(e),
                }
            }

            if plan.skipped() > 0 {
                info!(
                    "{}: {} variant(s) skipped, {:.2} s of {:.2} s used",
                    name,
                    plan.skipped(),
                    plan.elapsed().as_secs_f64(),
                    plan.budget().as_secs_f64()
                );
            }
            stats.skipped_variants += plan.skipped();
            if tta.dynamic {
                estimator = plan.estimator().clone();
            }
        }

        Ok(accumulator)
    }
}

/// The first volume file, by name, in `dir`.
fn first_volume(dir: &Path) -> SegResult<PathBuf> {
    if !dir.is_dir() {
        return Err(SegError::config_error(format!(
            "Input directory does not exist: {}",
            dir.display()
        )));
    }
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.'));
        if path.is_file() && !hidden && VolumeFormat::from_path(&path).is_some() {
            candidates.push(path);
        }
    }
    candidates.sort();
    if candidates.len() > 1 {
        warn!(
            "{} volumes in {}, using the first one",
            candidates.len(),
            dir.display()
        );
    }
    candidates.into_iter().next().ok_or_else(|| {
        SegError::config_error(format!("No input volume found in {}", dir.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ResourceReport, SegmentationModel, SimpleError, Tensor5D};
    use crate::core::config::{SlidingWindowConfig, TtaConfig};
    use crate::domain::Volume;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Debug)]
    struct ConstantModel;

    impl SegmentationModel for ConstantModel {
        fn name(&self) -> &str {
            "constant"
        }

        fn predict(&self, batch: &Tensor5D) -> SegResult<Tensor5D> {
            let shape = batch.shape();
            Ok(Tensor5D::from_elem((shape[0], 1, shape[2], shape[3], shape[4]), 4.0))
        }
    }

    #[derive(Debug, Default, Clone)]
    struct CountingLoader {
        loaded: Arc<AtomicUsize>,
    }

    impl CheckpointLoader for CountingLoader {
        fn load(&self, _path: &Path) -> SegResult<Box<dyn SegmentationModel>> {
            self.loaded.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ConstantModel))
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Failure {
        WrongShape,
        OutOfMemory,
        Runtime,
    }

    /// Behaves like `ConstantModel` until its `fail_at`-th call.
    #[derive(Debug)]
    struct FlakyModel {
        calls: AtomicUsize,
        fail_at: usize,
        failure: Failure,
    }

    impl SegmentationModel for FlakyModel {
        fn name(&self) -> &str {
            "flaky"
        }

        fn predict(&self, batch: &Tensor5D) -> SegResult<Tensor5D> {
            let shape = batch.shape();
            if self.calls.fetch_add(1, Ordering::SeqCst) != self.fail_at {
                return Ok(Tensor5D::from_elem((shape[0], 1, shape[2], shape[3], shape[4]), 4.0));
            }
            match self.failure {
                Failure::WrongShape => Ok(Tensor5D::zeros((shape[0], 1, 1, 1, 1))),
                Failure::OutOfMemory => Err(SegError::inference_error(
                    "flaky",
                    "forward pass",
                    SimpleError::new("CUDA failure 2: out of memory"),
                )),
                Failure::Runtime => Err(SegError::inference_error(
                    "flaky",
                    "forward pass",
                    SimpleError::new("unexpected input"),
                )),
            }
        }
    }

    #[derive(Debug)]
    struct FlakyLoader {
        fail_at: usize,
        failure: Failure,
    }

    impl CheckpointLoader for FlakyLoader {
        fn load(&self, _path: &Path) -> SegResult<Box<dyn SegmentationModel>> {
            Ok(Box::new(FlakyModel {
                calls: AtomicUsize::new(0),
                fail_at: self.fail_at,
                failure: self.failure,
            }))
        }
    }

    #[derive(Debug)]
    struct NoGpu;

    impl ResourceProbe for NoGpu {
        fn probe(&self) -> ResourceReport {
            ResourceReport::unavailable()
        }
    }

    fn fixture(checkpoints: usize) -> Result<(TempDir, PipelineConfig), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let io = FileVolumeIo::new();
        let volume = Volume::filled([8, 8, 8], 1.0, Geometry::default());
        io.save(&volume, &root.path().join("input/images/ct/case_001.mha"))?;
        io.save(&volume, &root.path().join("input/images/pet/case_001.mha"))?;
        let weights = root.path().join("weights");
        std::fs::create_dir_all(&weights)?;
        for i in 0..checkpoints {
            std::fs::write(weights.join(format!("fold_{}.onnx", i)), b"")?;
        }
        let config = PipelineConfig::new()
            .with_input_dir(root.path().join("input"))
            .with_output_dir(root.path().join("output"))
            .with_datacentric_path(root.path().join("output/data-centric-model.json"))
            .with_weights_dir(weights)
            .with_sliding_window(SlidingWindowConfig::new().with_window_size([4, 4, 4]))
            .with_tta(
                TtaConfig::new()
                    .with_max_variants(2)
                    .with_max_time(Duration::from_secs(600)),
            );
        Ok((root, config))
    }

    #[test]
    fn test_state_machine_and_outputs() -> Result<(), Box<dyn std::error::Error>> {
        let (_root, config) = fixture(2)?;
        let loader = CountingLoader::default();
        let mut driver = PipelineDriver::new(config)
            .with_checkpoint_loader(loader.clone())
            .with_resource_probe(NoGpu);
        assert_eq!(driver.state(), PipelineState::Idle);

        let outcome = driver.run()?;
        assert_eq!(driver.state(), PipelineState::Done);
        assert_eq!(loader.loaded.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.case_id, "case_001");
        assert_eq!(outcome.ensemble_size, 4);
        assert_eq!(outcome.stats.executed(), 4);
        assert_eq!(outcome.foreground_voxels, 8 * 8 * 8);
        assert_eq!(std::fs::read_to_string(&outcome.datacentric_path)?, "true");

        let mask = FileVolumeIo::new().load(&outcome.mask_path)?;
        assert_eq!(mask.shape(), [8, 8, 8]);
        assert!(driver.run().is_err());
        Ok(())
    }

    #[test]
    fn test_missing_pet_fails_without_outputs() -> Result<(), Box<dyn std::error::Error>> {
        let (root, config) = fixture(1)?;
        std::fs::remove_file(root.path().join("input/images/pet/case_001.mha"))?;
        let output = config.output_dir.clone();
        let mut driver = PipelineDriver::new(config)
            .with_checkpoint_loader(CountingLoader::default())
            .with_resource_probe(NoGpu);

        let err = driver.run().unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(driver.state(), PipelineState::Failed);
        assert!(!output.exists());
        Ok(())
    }

    #[test]
    fn test_intermediate_files() -> Result<(), Box<dyn std::error::Error>> {
        let (root, config) = fixture(1)?;
        let intermediate = root.path().join("intermediate");
        let mut driver = PipelineDriver::new(config.with_intermediate_dir(Some(intermediate.clone())))
            .with_checkpoint_loader(CountingLoader::default())
            .with_resource_probe(NoGpu);
        let outcome = driver.run()?;
        assert_eq!(outcome.intermediate_paths.len(), 3);
        for name in [INTERMEDIATE_CT, INTERMEDIATE_PET, INTERMEDIATE_PRED] {
            assert!(intermediate.join(name).is_file(), "{} missing", name);
        }
        let leftovers = std::fs::read_dir(&intermediate)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".partial-"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    /// Names of all entries in `dir`, empty when it does not exist.
    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One window per pass, so every pass is exactly one model call.
    fn flaky_driver(config: PipelineConfig, fail_at: usize, failure: Failure) -> PipelineDriver {
        let config = config
            .with_sliding_window(SlidingWindowConfig::new().with_window_size([8, 8, 8]))
            .with_tta(
                TtaConfig::new()
                    .with_max_variants(4)
                    .with_max_time(Duration::from_secs(600)),
            );
        PipelineDriver::new(config)
            .with_checkpoint_loader(FlakyLoader { fail_at, failure })
            .with_resource_probe(NoGpu)
    }

    #[test]
    fn test_inference_failure_discards_staged_intermediates() -> Result<(), Box<dyn std::error::Error>> {
        let (root, config) = fixture(1)?;
        let intermediate = root.path().join("intermediate");
        let output = config.output_dir.clone();
        let mut driver = flaky_driver(
            config.with_intermediate_dir(Some(intermediate.clone())),
            0,
            Failure::Runtime,
        );

        let err = driver.run().unwrap_err();
        assert!(matches!(err, SegError::Inference { .. }), "unexpected error: {}", err);
        assert_eq!(driver.state(), PipelineState::Failed);
        // CTres and SUV were staged before inference started
        assert!(intermediate.is_dir());
        assert!(entries(&intermediate).is_empty(), "{:?}", entries(&intermediate));
        assert!(entries(&output).is_empty(), "{:?}", entries(&output));
        Ok(())
    }

    #[test]
    fn test_resource_exhaustion_fails_the_run() -> Result<(), Box<dyn std::error::Error>> {
        let (_root, config) = fixture(1)?;
        let output = config.output_dir.clone();
        // fails on the first flipped variant, which is not tolerated even when enabled
        let mut driver = flaky_driver(
            config.with_tolerate_variant_failures(true),
            1,
            Failure::OutOfMemory,
        );

        let err = driver.run().unwrap_err();
        assert!(err.is_resource_exhausted(), "unexpected error: {}", err);
        assert_eq!(driver.state(), PipelineState::Failed);
        assert!(entries(&output).is_empty(), "{:?}", entries(&output));
        Ok(())
    }

    #[test]
    fn test_tolerated_shape_mismatch_keeps_completed_maps() -> Result<(), Box<dyn std::error::Error>> {
        let (_root, config) = fixture(1)?;
        let mut driver = flaky_driver(
            config.with_tolerate_variant_failures(true),
            1,
            Failure::WrongShape,
        );

        let outcome = driver.run()?;
        assert_eq!(driver.state(), PipelineState::Done);
        assert_eq!(outcome.ensemble_size, 1);
        assert_eq!(outcome.stats.executed(), 1);
        assert!(outcome.stats.passes[0].variant.is_identity());
        assert_eq!(outcome.stats.failed_variants, 1);
        // the two variants after the failed one are abandoned
        assert_eq!(outcome.stats.skipped_variants, 2);
        assert!(outcome.mask_path.is_file());
        Ok(())
    }

    #[test]
    fn test_shape_mismatch_is_fatal_unless_tolerated() -> Result<(), Box<dyn std::error::Error>> {
        let (_root, config) = fixture(1)?;
        let mut driver = flaky_driver(config, 1, Failure::WrongShape);

        let err = driver.run().unwrap_err();
        assert!(err.is_shape_mismatch(), "unexpected error: {}", err);
        assert_eq!(driver.state(), PipelineState::Failed);
        Ok(())
    }

    #[test]
    fn test_identity_shape_mismatch_is_never_tolerated() -> Result<(), Box<dyn std::error::Error>> {
        let (_root, config) = fixture(1)?;
        let mut driver = flaky_driver(
            config.with_tolerate_variant_failures(true),
            0,
            Failure::WrongShape,
        );
        assert!(driver.run().unwrap_err().is_shape_mismatch());
        Ok(())
    }

    #[test]
    fn test_static_mode_without_estimate_respects_zero_budget() -> Result<(), Box<dyn std::error::Error>> {
        let (_root, config) = fixture(1)?;
        let config = config.with_tta(
            TtaConfig::new()
                .with_dynamic(false)
                .with_max_time(Duration::ZERO),
        );
        assert!(config.tta.cost_estimate().is_none());
        let mut driver = PipelineDriver::new(config)
            .with_checkpoint_loader(CountingLoader::default())
            .with_resource_probe(NoGpu);

        let outcome = driver.run()?;
        assert_eq!(outcome.ensemble_size, 1);
        assert_eq!(outcome.stats.executed(), 1);
        assert_eq!(outcome.stats.skipped_variants, 7);
        Ok(())
    }

    #[test]
    fn test_first_volume_skips_hidden_and_foreign_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join(".partial-a.mha"), b"")?;
        std::fs::write(dir.path().join("notes.txt"), b"")?;
        std::fs::write(dir.path().join("b.nii.gz"), b"")?;
        std::fs::write(dir.path().join("c.mha"), b"")?;
        assert_eq!(first_volume(dir.path())?, dir.path().join("b.nii.gz"));
        Ok(())
    }
}
