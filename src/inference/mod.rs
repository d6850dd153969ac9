//! Inference from persisted training artifacts.

pub mod predictor;

pub use predictor::{Prediction, Predictor};
