//! # Leafscan
//!
//! A Rust library for training plant disease classifiers by transfer
//! learning using the Burn framework.
//!
//! ## Features
//!
//! - **Deterministic dataset assembly** from a directory-per-class image
//!   tree, with seeded shuffling and train/validation/test splitting
//! - **Stochastic augmentation pipeline** for training, bit-reproducible
//!   preprocessing for evaluation and inference
//! - **Two-stage fine-tuning**: head-only warm training with a frozen
//!   backbone, then optional partial backbone unfreezing at a reduced
//!   learning rate
//! - **Monitored-metric policies**: checkpoint-on-improve, early stopping,
//!   reduce-LR-on-plateau, and a warmup+cosine schedule
//!
//! ## Modules
//!
//! - `dataset`: enumeration, splitting, augmentation, batching, prefetch
//! - `model`: convolutional backbone and classification head
//! - `training`: the stage scheduler, policies, checkpoints, and reports
//! - `eval`: accuracy, top-k, per-class metrics, confusion matrix
//! - `inference`: prediction from persisted artifacts
//! - `utils`: logging helpers
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use leafscan::backend::{init_device, TrainBackend};
//! use leafscan::config::RunConfig;
//! use leafscan::training::StageScheduler;
//!
//! let config = RunConfig::default();
//! let device = init_device(false);
//! let report = StageScheduler::<TrainBackend>::new(config, device)?.run()?;
//! println!("test accuracy: {:.2}%", report.test_accuracy * 100.0);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use config::RunConfig;
pub use dataset::assembler::{ClassMapping, DatasetSplit, SampleRecord};
pub use dataset::augment::Augmentor;
pub use dataset::weights::ClassWeightTable;
pub use error::{Error, Result};
pub use eval::EvalReport;
pub use inference::Predictor;
pub use model::LeafClassifier;
pub use training::{StageScheduler, TrainingReport};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
