//! Stage Scheduler
//!
//! The training control loop: `Init -> Warm -> (FineTune)? -> Done`, with
//! `Failed` reachable from any state on unrecoverable error. The warm
//! stage trains the head against a frozen backbone; the optional
//! fine-tune stage starts from the warm stage's best checkpoint, unfreezes
//! the trailing backbone blocks, and rebinds the optimizer at a reduced
//! rate. A single control thread issues compute steps batch by batch while
//! the loading pipeline prefetches ahead of it.

use std::sync::Arc;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{error, info, warn};

use crate::config::{DecodePolicy, RunConfig, StageConfig};
use crate::dataset::assembler::{DatasetAssembler, DatasetSplit};
use crate::dataset::augment::{Augmentor, TransformMode};
use crate::dataset::batcher::TensorBatcher;
use crate::dataset::pipeline::{epoch_plan, BatchStream, SampleLoader};
use crate::dataset::weights::ClassWeightTable;
use crate::error::{Error, Result};
use crate::eval::evaluate_split;
use crate::model::{LeafClassifier, TrainabilityMask};
use crate::training::checkpoint::{CheckpointMeta, CheckpointStore};
use crate::training::policy::{
    CheckpointOnImprove, EarlyStopOnPlateau, EpochObservation, EpochPolicy, PolicyAction,
    ReduceLrOnPlateau,
};
use crate::training::report::{EpochRecord, StageReport, TrainingReport};
use crate::training::schedule::WarmupCosineSchedule;

/// k used for the top-k metric in stage test evaluations
const TEST_TOP_K: usize = 3;

/// File name of the persisted class mapping
pub const CLASS_MAPPING_FILE: &str = "class_mapping.json";
/// File name of the run report
pub const TRAINING_REPORT_FILE: &str = "training_report.json";
/// Checkpoint name of the warm stage's best model
pub const WARM_CHECKPOINT: &str = "warm_best";
/// Checkpoint name of the fine-tune stage's best model
pub const FINE_TUNE_CHECKPOINT: &str = "fine_tune_best";
/// Checkpoint name of the model state at run completion
pub const FINAL_CHECKPOINT: &str = "final";

/// Drives the full training run
pub struct StageScheduler<B: AutodiffBackend> {
    config: RunConfig,
    device: B::Device,
}

struct StageData<B: AutodiffBackend> {
    train_loader: Arc<SampleLoader>,
    val_loader: Arc<SampleLoader>,
    test_loader: Arc<SampleLoader>,
    train_batcher: TensorBatcher<B>,
    eval_batcher: TensorBatcher<B::InnerBackend>,
    class_weights: Option<Vec<f32>>,
}

struct StageOutcome<B: AutodiffBackend> {
    model: LeafClassifier<B>,
    report: StageReport,
    best_val_accuracy: f64,
}

impl<B: AutodiffBackend> StageScheduler<B> {
    /// Validate the configuration and bind the device
    pub fn new(config: RunConfig, device: B::Device) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, device })
    }

    /// Run the state machine to completion.
    ///
    /// The training report is written only on the successful terminal
    /// state; a failed run leaves no partial report behind.
    pub fn run(&self) -> Result<TrainingReport> {
        match self.run_stages() {
            Ok(report) => Ok(report),
            Err(err) => {
                error!("Training run failed: {err}");
                Err(err)
            }
        }
    }

    fn run_stages(&self) -> Result<TrainingReport> {
        let run_start = Instant::now();
        let cfg = &self.config;

        let assembled = DatasetAssembler::new(
            &cfg.data.root,
            cfg.data.validation_fraction,
            cfg.data.test_fraction,
            cfg.seed,
        )
        .assemble()?;

        std::fs::create_dir_all(&cfg.output_dir)?;
        assembled
            .mapping
            .save(&cfg.output_dir.join(CLASS_MAPPING_FILE))?;

        let num_classes = assembled.mapping.len();
        let data = self.prepare_stage_data(&assembled.split, num_classes)?;
        let store = CheckpointStore::new(cfg.output_dir.join("checkpoints"));

        info!(
            "Starting run: {} classes, {} train / {} val / {} test samples",
            num_classes,
            assembled.split.train.len(),
            assembled.split.validation.len(),
            assembled.split.test.len()
        );

        // Warm stage: frozen backbone, trainable head. The monitor starts
        // below any reachable accuracy so the first epoch always persists
        let model = LeafClassifier::<B>::new(&cfg.model, num_classes, &self.device);
        let warm = self.run_stage(
            "warm",
            model,
            TrainabilityMask::frozen(),
            &cfg.warm,
            WARM_CHECKPOINT,
            f64::NEG_INFINITY,
            &data,
            &store,
        )?;

        let mut stages = vec![warm.report];
        let mut best_val_accuracy = warm.best_val_accuracy;
        let mut final_model = warm.model;

        // Fine-tune stage: partial unfreeze from the warm best checkpoint
        if cfg.fine_tune.enabled {
            let mask = TrainabilityMask::unfreeze_last(cfg.fine_tune.unfreeze_last);
            let model = store.load::<B>(WARM_CHECKPOINT, &self.device)?;
            let stage_cfg = cfg.fine_tune.stage(&cfg.warm);

            let fine_tune = self.run_stage(
                "fine_tune",
                model,
                mask,
                &stage_cfg,
                FINE_TUNE_CHECKPOINT,
                best_val_accuracy,
                &data,
                &store,
            )?;

            best_val_accuracy = best_val_accuracy.max(fine_tune.best_val_accuracy);
            stages.push(fine_tune.report);
            final_model = fine_tune.model;
        }

        // Snapshot the run's final model state alongside the per-stage bests
        let final_stage = stages.last().expect("at least the warm stage ran");
        let final_meta = CheckpointMeta::new(
            &final_stage.stage,
            final_stage.epochs_run.saturating_sub(1),
            final_stage.best_val_accuracy,
            final_stage
                .history
                .last()
                .map(|r| r.val_loss)
                .unwrap_or(f64::INFINITY),
            cfg.model.clone(),
            num_classes,
        );
        store.save(FINAL_CHECKPOINT, &final_model, &final_meta)?;

        let test_accuracy = stages.last().map(|s| s.test_accuracy).unwrap_or(0.0);
        let report = TrainingReport {
            num_classes,
            image_size: cfg.data.image_size,
            batch_size: cfg.data.batch_size,
            seed: cfg.seed,
            stages,
            fine_tuned: cfg.fine_tune.enabled,
            class_weights_used: cfg.loss.class_weights,
            label_smoothing: cfg.loss.label_smoothing,
            cosine_decay: cfg.warm.cosine_decay,
            mixed_precision: cfg.mixed_precision,
            best_val_accuracy,
            test_accuracy,
            total_duration_secs: run_start.elapsed().as_secs_f64(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        report.save(&cfg.output_dir.join(TRAINING_REPORT_FILE))?;

        info!(
            "Run complete in {:.1}s: best val acc {:.2}%, test acc {:.2}%",
            report.total_duration_secs,
            best_val_accuracy * 100.0,
            test_accuracy * 100.0
        );

        Ok(report)
    }

    fn prepare_stage_data(
        &self,
        split: &DatasetSplit,
        num_classes: usize,
    ) -> Result<StageData<B>> {
        let cfg = &self.config;
        let augmentor = Augmentor::new(cfg.data.image_size, cfg.data.augment.clone());

        let class_weights = if cfg.loss.class_weights {
            let labels: Vec<usize> = split.train.iter().map(|r| r.label).collect();
            Some(ClassWeightTable::balanced(&labels, num_classes)?.as_vec())
        } else {
            None
        };

        Ok(StageData {
            train_loader: Arc::new(SampleLoader::new(
                split.train.clone(),
                augmentor.clone(),
                TransformMode::Train,
                cfg.data.decode_policy,
            )),
            // Evaluation splits never substitute: a failed sample is
            // dropped so metrics only cover decodable inputs
            val_loader: Arc::new(SampleLoader::new(
                split.validation.clone(),
                augmentor.clone(),
                TransformMode::Eval,
                DecodePolicy::Skip,
            )),
            test_loader: Arc::new(SampleLoader::new(
                split.test.clone(),
                augmentor,
                TransformMode::Eval,
                DecodePolicy::Skip,
            )),
            train_batcher: TensorBatcher::new(self.device.clone(), cfg.data.image_size),
            // The autodiff backend shares its device type with the inner
            // backend, so evaluation runs on the same device
            eval_batcher: TensorBatcher::new(self.device.clone(), cfg.data.image_size),
            class_weights,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_stage(
        &self,
        name: &str,
        model: LeafClassifier<B>,
        mask: TrainabilityMask,
        stage_cfg: &StageConfig,
        checkpoint_name: &str,
        resume_best: f64,
        data: &StageData<B>,
        store: &CheckpointStore,
    ) -> Result<StageOutcome<B>> {
        let cfg = &self.config;
        let stage_start = Instant::now();
        let stage_salt = stage_salt(name);

        info!(
            "Stage '{}': {} epochs budget, lr {:.2e}, {} trailing blocks trainable",
            name,
            stage_cfg.epochs,
            stage_cfg.learning_rate,
            mask.trainable_blocks()
        );

        let mut model = model.with_trainability(mask);
        let mut optimizer = AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(stage_cfg.weight_decay)))
            .init();

        let smoothing = (cfg.loss.label_smoothing > 0.0).then_some(cfg.loss.label_smoothing);
        let loss_fn = CrossEntropyLossConfig::new()
            .with_weights(data.class_weights.clone())
            .with_smoothing(smoothing)
            .init(&self.device);

        let schedule = stage_cfg.cosine_decay.then(|| {
            WarmupCosineSchedule::new(
                stage_cfg.learning_rate,
                stage_cfg.min_lr,
                stage_cfg.warmup_epochs,
                stage_cfg.epochs,
            )
        });

        // Policies consulted in order at every epoch end; the scheduler
        // executes the actions they return
        let mut policies: Vec<Box<dyn EpochPolicy>> =
            vec![Box::new(CheckpointOnImprove::resume_from(resume_best))];
        if let Some(patience) = stage_cfg.early_stop_patience {
            policies.push(Box::new(EarlyStopOnPlateau::new(patience)));
        }
        if let Some(patience) = stage_cfg.reduce_lr_patience {
            policies.push(Box::new(ReduceLrOnPlateau::new(
                stage_cfg.learning_rate,
                stage_cfg.reduce_lr_factor,
                patience,
                stage_cfg.min_lr,
            )));
        }

        let mut shuffle_rng = ChaCha8Rng::seed_from_u64(cfg.seed ^ stage_salt);
        let mut current_lr = stage_cfg.learning_rate;
        let mut history: Vec<EpochRecord> = Vec::new();
        let mut best_val_accuracy = resume_best;
        let mut early_stopped = false;

        for epoch in 0..stage_cfg.epochs {
            if let Some(schedule) = &schedule {
                current_lr = schedule.lr_at(epoch);
            }

            let (train_loss, train_accuracy) = self.train_epoch(
                &mut model,
                &mut optimizer,
                &loss_fn,
                data,
                current_lr,
                epoch_seed(cfg.seed, stage_salt, epoch),
                &mut shuffle_rng,
            )?;

            let val = evaluate_split(
                &model.valid(),
                Arc::clone(&data.val_loader),
                &data.eval_batcher,
                cfg.data.batch_size,
                1,
            );

            info!(
                "[{}] epoch {}/{}: loss {:.4}, acc {:.2}% | val loss {:.4}, val acc {:.2}% | lr {:.2e}",
                name,
                epoch + 1,
                stage_cfg.epochs,
                train_loss,
                train_accuracy * 100.0,
                val.loss,
                val.accuracy * 100.0,
                current_lr
            );

            let observation = EpochObservation {
                epoch,
                train_loss,
                train_accuracy,
                val_loss: val.loss,
                val_accuracy: val.accuracy,
                learning_rate: current_lr,
            };

            history.push(EpochRecord {
                epoch,
                train_loss,
                train_accuracy,
                val_loss: val.loss,
                val_accuracy: val.accuracy,
                learning_rate: current_lr,
            });

            let mut stop = false;
            for policy in policies.iter_mut() {
                match policy.on_epoch_end(&observation) {
                    PolicyAction::Continue => {}
                    PolicyAction::Checkpoint => {
                        let meta = CheckpointMeta::new(
                            name,
                            epoch,
                            val.accuracy,
                            val.loss,
                            cfg.model.clone(),
                            model.num_classes(),
                        );
                        store.save(checkpoint_name, &model, &meta)?;
                        best_val_accuracy = val.accuracy;
                    }
                    PolicyAction::Stop => stop = true,
                    PolicyAction::AdjustLr(rate) => current_lr = rate,
                }
            }

            if stop {
                // Restore the best parameters seen in this stage
                if store.exists(checkpoint_name) {
                    model = store
                        .load::<B>(checkpoint_name, &self.device)?
                        .with_trainability(mask);
                }
                early_stopped = true;
                break;
            }
        }

        if !early_stopped {
            warn!(
                "Stage '{}' exhausted its {}-epoch budget without early stopping",
                name, stage_cfg.epochs
            );
        }

        let test = evaluate_split(
            &model.valid(),
            Arc::clone(&data.test_loader),
            &data.eval_batcher,
            cfg.data.batch_size,
            TEST_TOP_K,
        );
        info!(
            "[{}] test accuracy {:.2}%, top-{} {:.2}%",
            name,
            test.accuracy * 100.0,
            TEST_TOP_K,
            test.top_k_accuracy * 100.0
        );

        let report = StageReport {
            stage: name.to_string(),
            epochs_run: history.len(),
            duration_secs: stage_start.elapsed().as_secs_f64(),
            history,
            best_val_accuracy,
            early_stopped,
            test_accuracy: test.accuracy,
        };

        Ok(StageOutcome {
            model,
            report,
            best_val_accuracy,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn train_epoch(
        &self,
        model: &mut LeafClassifier<B>,
        optimizer: &mut impl Optimizer<LeafClassifier<B>, B>,
        loss_fn: &burn::nn::loss::CrossEntropyLoss<B>,
        data: &StageData<B>,
        learning_rate: f64,
        epoch_seed: u64,
        shuffle_rng: &mut ChaCha8Rng,
    ) -> Result<(f64, f64)> {
        let cfg = &self.config;

        let plan = epoch_plan(
            data.train_loader.len(),
            cfg.data.batch_size,
            Some(shuffle_rng),
        );
        let stream = BatchStream::spawn(
            Arc::clone(&data.train_loader),
            plan,
            cfg.data.num_workers,
            cfg.data.prefetch_depth,
            epoch_seed,
        );

        let mut total_loss = 0.0f64;
        let mut num_batches = 0usize;
        let mut correct = 0usize;
        let mut total = 0usize;

        for host_batch in stream {
            let batch = data.train_batcher.batch(&host_batch);

            let output = model.forward(batch.images.clone());
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            total_loss += loss_value;
            num_batches += 1;

            let predictions = output.argmax(1).squeeze::<1>();
            let batch_correct: i64 = predictions
                .equal(batch.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem();
            correct += batch_correct as usize;
            total += batch.targets.dims()[0];

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, model);
            *model = optimizer.step(learning_rate, model.clone(), grads);
        }

        if num_batches == 0 {
            return Err(Error::Training(
                "training stream produced no batches".into(),
            ));
        }

        let avg_loss = total_loss / num_batches as f64;
        let accuracy = if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        };
        Ok((avg_loss, accuracy))
    }
}

fn stage_salt(name: &str) -> u64 {
    name.bytes().fold(0u64, |acc, b| {
        acc.wrapping_mul(31).wrapping_add(b as u64)
    })
}

fn epoch_seed(seed: u64, stage_salt: u64, epoch: usize) -> u64 {
    seed ^ stage_salt ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_salts_differ() {
        assert_ne!(stage_salt("warm"), stage_salt("fine_tune"));
    }

    #[test]
    fn test_epoch_seeds_differ_per_epoch() {
        let salt = stage_salt("warm");
        let a = epoch_seed(42, salt, 0);
        let b = epoch_seed(42, salt, 1);
        assert_ne!(a, b);
        // Same inputs reproduce the same seed
        assert_eq!(a, epoch_seed(42, salt, 0));
    }

    #[test]
    fn test_scheduler_rejects_invalid_config() {
        let mut config = RunConfig::default();
        config.warm.cosine_decay = true;
        config.warm.reduce_lr_patience = Some(2);

        let device = Default::default();
        let scheduler =
            StageScheduler::<burn::backend::Autodiff<burn::backend::NdArray>>::new(config, device);
        assert!(scheduler.is_err());
    }
}
