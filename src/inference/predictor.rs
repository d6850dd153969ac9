//! Predictor
//!
//! Loads a checkpoint and the persisted class mapping, preprocesses images
//! through the same deterministic path used for evaluation, and returns
//! the top-k classes with confidences.

use std::path::Path;

use burn::prelude::*;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::AugmentConfig;
use crate::dataset::assembler::ClassMapping;
use crate::dataset::augment::Augmentor;
use crate::error::{Error, Result};
use crate::model::LeafClassifier;
use crate::training::checkpoint::CheckpointStore;

/// One ranked prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Class index
    pub class_index: usize,
    /// Class name from the persisted mapping
    pub class_name: String,
    /// Softmax probability
    pub confidence: f32,
}

/// Runs inference with a trained model and its class mapping
pub struct Predictor<B: Backend> {
    model: LeafClassifier<B>,
    mapping: ClassMapping,
    augmentor: Augmentor,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load a predictor from a checkpoint store entry and a class mapping
    pub fn from_artifacts(
        checkpoint_dir: &Path,
        checkpoint_name: &str,
        mapping_path: &Path,
        image_size: usize,
        device: B::Device,
    ) -> Result<Self> {
        let store = CheckpointStore::new(checkpoint_dir);
        let model = store.load::<B>(checkpoint_name, &device)?;
        let mapping = ClassMapping::load(mapping_path)?;

        if mapping.len() != model.num_classes() {
            return Err(Error::Config(format!(
                "class mapping has {} classes but the checkpoint was trained on {}",
                mapping.len(),
                model.num_classes()
            )));
        }

        Ok(Self {
            model,
            mapping,
            augmentor: Augmentor::new(image_size, AugmentConfig::default()),
            device,
        })
    }

    /// Build directly from loaded parts (used by tests and embedding)
    pub fn new(
        model: LeafClassifier<B>,
        mapping: ClassMapping,
        image_size: usize,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            mapping,
            augmentor: Augmentor::new(image_size, AugmentConfig::default()),
            device,
        }
    }

    /// The class mapping backing this predictor
    pub fn mapping(&self) -> &ClassMapping {
        &self.mapping
    }

    /// Predict the `top_k` most probable classes for a decoded image
    pub fn predict(&self, image: &DynamicImage, top_k: usize) -> Vec<Prediction> {
        let size = self.augmentor.image_size();
        let data = self.augmentor.deterministic(image);

        let tensor = Tensor::<B, 1>::from_floats(
            TensorData::new(data, [3 * size * size]),
            &self.device,
        )
        .reshape([1, 3, size, size]);

        // ImageNet normalization, matching the training batcher
        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(vec![0.485f32, 0.456, 0.406], [1, 3, 1, 1]),
            &self.device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(vec![0.229f32, 0.224, 0.225], [1, 3, 1, 1]),
            &self.device,
        );
        let tensor = (tensor - mean) / std;

        let probs: Vec<f32> = self
            .model
            .forward_softmax(tensor)
            .into_data()
            .to_vec()
            .unwrap();

        let mut indexed: Vec<(usize, f32)> =
            probs.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

        indexed
            .into_iter()
            .take(top_k)
            .map(|(class_index, confidence)| Prediction {
                class_index,
                class_name: self
                    .mapping
                    .name_of(class_index)
                    .unwrap_or("Unknown")
                    .to_string(),
                confidence,
            })
            .collect()
    }

    /// Predict from an image file
    pub fn predict_file(&self, path: &Path, top_k: usize) -> Result<Vec<Prediction>> {
        let image = image::open(path).map_err(|e| Error::sample_load(path, e))?;
        Ok(self.predict(&image, top_k))
    }
}
