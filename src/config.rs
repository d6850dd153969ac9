//! Configuration Module
//!
//! Defines the immutable configuration value constructed once per run and
//! passed to every component. No component reads ambient global state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration for a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Dataset and loader configuration
    pub data: DataConfig,
    /// Model architecture configuration
    pub model: ModelConfig,
    /// Warm stage (frozen backbone) hyperparameters
    pub warm: StageConfig,
    /// Optional fine-tune stage (partial unfreeze)
    pub fine_tune: FineTuneConfig,
    /// Loss shaping
    pub loss: LossConfig,
    /// Directory for checkpoints, class mapping, and the training report
    pub output_dir: PathBuf,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Record that reduced-precision compute was requested (backend permitting)
    pub mixed_precision: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            model: ModelConfig::default(),
            warm: StageConfig::default(),
            fine_tune: FineTuneConfig::default(),
            loss: LossConfig::default(),
            output_dir: PathBuf::from("output"),
            seed: 42,
            mixed_precision: false,
        }
    }
}

impl RunConfig {
    /// Validate the configuration as a whole
    pub fn validate(&self) -> Result<()> {
        self.data.validate()?;
        self.model.validate()?;
        self.warm.validate()?;
        self.fine_tune.validate(&self.model)?;
        self.loss.validate()?;
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config)
    }
}

/// Policy for samples that fail to decode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Drop the sample from the batch
    Skip,
    /// Replace the sample with another one drawn from the same split
    Substitute,
}

/// Dataset and loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root directory: one subdirectory per class
    pub root: PathBuf,
    /// Square input resolution fed to the model
    pub image_size: usize,
    /// Batch size
    pub batch_size: usize,
    /// Fraction of samples held out for validation
    pub validation_fraction: f64,
    /// Fraction of samples held out for the test split
    pub test_fraction: f64,
    /// Loader worker threads for the training stream
    pub num_workers: usize,
    /// Capacity of the prefetch buffer (batches)
    pub prefetch_depth: usize,
    /// What to do when a sample fails to decode
    pub decode_policy: DecodePolicy,
    /// Augmentation parameter ranges for the stochastic path
    pub augment: AugmentConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/plantvillage"),
            image_size: 224,
            batch_size: 16,
            validation_fraction: 0.2,
            test_fraction: 0.1,
            num_workers: 2,
            prefetch_depth: 4,
            decode_policy: DecodePolicy::Skip,
            augment: AugmentConfig::default(),
        }
    }
}

impl DataConfig {
    /// Validate split fractions and loader sizing
    pub fn validate(&self) -> Result<()> {
        if self.image_size == 0 {
            return Err(Error::Config("image_size must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        for (name, frac) in [
            ("validation_fraction", self.validation_fraction),
            ("test_fraction", self.test_fraction),
        ] {
            if !(0.0..1.0).contains(&frac) {
                return Err(Error::Config(format!("{} must be in [0, 1)", name)));
            }
        }
        if self.validation_fraction + self.test_fraction >= 1.0 {
            return Err(Error::Config(
                "validation_fraction + test_fraction must be less than 1.0".into(),
            ));
        }
        if self.num_workers == 0 {
            return Err(Error::Config("num_workers must be at least 1".into()));
        }
        if self.prefetch_depth == 0 {
            return Err(Error::Config("prefetch_depth must be at least 1".into()));
        }
        Ok(())
    }
}

/// Bounded ranges for the stochastic augmentation chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Brightness multiplier range
    pub brightness_range: (f32, f32),
    /// Contrast multiplier range
    pub contrast_range: (f32, f32),
    /// Saturation multiplier range
    pub saturation_range: (f32, f32),
    /// Maximum hue rotation in degrees (drawn from [-x, x])
    pub hue_degrees: i32,
    /// Zoom factor range for the random crop
    pub zoom_range: (f32, f32),
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            brightness_range: (0.8, 1.2),
            contrast_range: (0.8, 1.2),
            saturation_range: (0.8, 1.2),
            hue_degrees: 10,
            zoom_range: (1.0, 1.25),
        }
    }
}

/// Model architecture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Filters in the first backbone block; doubled at each block
    pub base_filters: usize,
    /// Number of backbone conv blocks (each halves the spatial resolution)
    pub num_blocks: usize,
    /// Hidden widths of the classification head
    pub head_units: Vec<usize>,
    /// Dropout rate in the head blocks
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_filters: 32,
            num_blocks: 4,
            head_units: vec![512, 256],
            dropout: 0.3,
        }
    }
}

impl ModelConfig {
    /// Validate the architecture parameters
    pub fn validate(&self) -> Result<()> {
        if self.base_filters == 0 {
            return Err(Error::Config("base_filters must be positive".into()));
        }
        if self.num_blocks == 0 {
            return Err(Error::Config("num_blocks must be positive".into()));
        }
        if self.head_units.is_empty() {
            return Err(Error::Config("head_units must not be empty".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config("dropout must be in [0, 1)".into()));
        }
        Ok(())
    }

    /// Feature vector width produced by the backbone
    pub fn feature_dim(&self) -> usize {
        self.base_filters << (self.num_blocks - 1)
    }
}

/// Hyperparameters for one training stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Epoch budget
    pub epochs: usize,
    /// Base learning rate
    pub learning_rate: f64,
    /// Learning rate floor (cosine target and reduce-on-plateau floor)
    pub min_lr: f64,
    /// Linear warmup epochs for the cosine schedule
    pub warmup_epochs: usize,
    /// Drive the learning rate with warmup + cosine decay
    pub cosine_decay: bool,
    /// Stop the stage after this many epochs without val-loss improvement
    pub early_stop_patience: Option<usize>,
    /// Shorter plateau window for reduce-LR (must be None when cosine_decay)
    pub reduce_lr_patience: Option<usize>,
    /// Multiplier applied on each reduce-LR trigger
    pub reduce_lr_factor: f64,
    /// Adam weight decay
    pub weight_decay: f32,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            learning_rate: 1e-3,
            min_lr: 1e-7,
            warmup_epochs: 3,
            cosine_decay: true,
            early_stop_patience: Some(7),
            reduce_lr_patience: None,
            reduce_lr_factor: 0.5,
            weight_decay: 1e-4,
        }
    }
}

impl StageConfig {
    /// Validate rates, budgets, and LR-controller exclusivity
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Config("stage epoch budget must be positive".into()));
        }
        if self.learning_rate <= 0.0 {
            return Err(Error::Config("learning_rate must be positive".into()));
        }
        if self.min_lr < 0.0 || self.min_lr > self.learning_rate {
            return Err(Error::Config(
                "min_lr must be in [0, learning_rate]".into(),
            ));
        }
        if self.cosine_decay && self.reduce_lr_patience.is_some() {
            return Err(Error::Config(
                "cosine_decay and reduce_lr_patience are mutually exclusive".into(),
            ));
        }
        if self.cosine_decay && self.warmup_epochs >= self.epochs {
            return Err(Error::Config(
                "warmup_epochs must be smaller than the epoch budget".into(),
            ));
        }
        if self.reduce_lr_factor <= 0.0 || self.reduce_lr_factor >= 1.0 {
            return Err(Error::Config("reduce_lr_factor must be in (0, 1)".into()));
        }
        Ok(())
    }
}

/// Fine-tune stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuneConfig {
    /// Run the fine-tune stage after warm training
    pub enabled: bool,
    /// Epoch budget for the fine-tune stage
    pub epochs: usize,
    /// Trailing backbone blocks made trainable
    pub unfreeze_last: usize,
    /// Divisor applied to the warm base rate for this stage
    pub lr_divisor: f64,
    /// Stop after this many epochs without val-loss improvement
    pub early_stop_patience: Option<usize>,
    /// Plateau window for reduce-LR during fine-tuning
    pub reduce_lr_patience: Option<usize>,
    /// Multiplier applied on each reduce-LR trigger
    pub reduce_lr_factor: f64,
}

impl Default for FineTuneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            epochs: 10,
            unfreeze_last: 2,
            lr_divisor: 10.0,
            early_stop_patience: Some(7),
            reduce_lr_patience: Some(3),
            reduce_lr_factor: 0.5,
        }
    }
}

impl FineTuneConfig {
    /// Validate against the model depth
    pub fn validate(&self, model: &ModelConfig) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.epochs == 0 {
            return Err(Error::Config("fine-tune epoch budget must be positive".into()));
        }
        if self.unfreeze_last == 0 || self.unfreeze_last > model.num_blocks {
            return Err(Error::Config(format!(
                "unfreeze_last must be in [1, {}]",
                model.num_blocks
            )));
        }
        if self.lr_divisor < 1.0 {
            return Err(Error::Config("lr_divisor must be at least 1.0".into()));
        }
        Ok(())
    }

    /// Stage hyperparameters derived from the warm stage
    pub fn stage(&self, warm: &StageConfig) -> StageConfig {
        StageConfig {
            epochs: self.epochs,
            learning_rate: warm.learning_rate / self.lr_divisor,
            min_lr: warm.min_lr,
            warmup_epochs: 0,
            // Cosine decay drives the warm stage only
            cosine_decay: false,
            early_stop_patience: self.early_stop_patience,
            reduce_lr_patience: self.reduce_lr_patience,
            reduce_lr_factor: self.reduce_lr_factor,
            weight_decay: warm.weight_decay,
        }
    }
}

/// Loss shaping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossConfig {
    /// Label smoothing factor (0 disables)
    pub label_smoothing: f32,
    /// Weight the loss by inverse class frequency
    pub class_weights: bool,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            label_smoothing: 0.1,
            class_weights: true,
        }
    }
}

impl LossConfig {
    /// Validate the smoothing factor
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return Err(Error::Config("label_smoothing must be in [0, 1)".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.seed, 42);
        assert_eq!(config.data.batch_size, 16);
    }

    #[test]
    fn test_fraction_validation() {
        let mut config = RunConfig::default();
        config.data.validation_fraction = 0.6;
        config.data.test_fraction = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lr_controller_exclusivity() {
        let mut config = RunConfig::default();
        config.warm.cosine_decay = true;
        config.warm.reduce_lr_patience = Some(3);
        assert!(config.validate().is_err());

        config.warm.cosine_decay = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unfreeze_depth_bounds() {
        let mut config = RunConfig::default();
        config.fine_tune.enabled = true;
        config.fine_tune.unfreeze_last = config.model.num_blocks + 1;
        assert!(config.validate().is_err());

        config.fine_tune.unfreeze_last = config.model.num_blocks;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fine_tune_stage_derivation() {
        let config = RunConfig::default();
        let stage = config.fine_tune.stage(&config.warm);
        assert_eq!(stage.learning_rate, config.warm.learning_rate / 10.0);
        assert!(!stage.cosine_decay);
        assert_eq!(stage.epochs, config.fine_tune.epochs);
    }

    #[test]
    fn test_feature_dim() {
        let model = ModelConfig {
            base_filters: 32,
            num_blocks: 4,
            ..Default::default()
        };
        assert_eq!(model.feature_dim(), 256);
    }

    #[test]
    fn test_config_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        let config = RunConfig::default();
        config.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.seed, config.seed);
        assert_eq!(loaded.data.image_size, config.data.image_size);
        assert_eq!(loaded.warm.epochs, config.warm.epochs);
    }
}
