//! Dataset pipeline: enumeration, splitting, augmentation, batching,
//! class weighting, and the prefetching batch stream.

pub mod assembler;
pub mod augment;
pub mod batcher;
pub mod pipeline;
pub mod weights;

pub use assembler::{ClassMapping, DatasetAssembler, DatasetSplit, DatasetSummary, SampleRecord};
pub use augment::{Augmentor, TransformMode};
pub use batcher::{LeafBatch, TensorBatcher};
pub use pipeline::{BatchStream, HostBatch, SampleLoader};
pub use weights::ClassWeightTable;
