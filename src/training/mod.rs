//! Training orchestration: the stage state machine, per-epoch policies,
//! learning-rate scheduling, checkpointing, and the run report.

pub mod checkpoint;
pub mod orchestrator;
pub mod policy;
pub mod report;
pub mod schedule;

pub use checkpoint::{CheckpointMeta, CheckpointStore};
pub use orchestrator::StageScheduler;
pub use policy::{EpochObservation, EpochPolicy, PolicyAction};
pub use report::{EpochRecord, StageReport, TrainingReport};
pub use schedule::WarmupCosineSchedule;
