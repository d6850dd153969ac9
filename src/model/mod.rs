//! Model architecture: convolutional backbone and classification head.

pub mod cnn;

pub use cnn::{Backbone, ClassifierHead, LeafClassifier, TrainabilityMask};
