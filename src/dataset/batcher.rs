//! Tensor batch assembly
//!
//! Converts host-side batches produced by the loading pipeline into device
//! tensors with ImageNet normalization applied. Runs on the control thread
//! so device uploads never cross thread boundaries.

use burn::prelude::*;

use crate::dataset::pipeline::HostBatch;

/// ImageNet normalization mean values (RGB)
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A batch of images and targets on the compute device
#[derive(Clone, Debug)]
pub struct LeafBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Builds device batches from host batches
#[derive(Clone, Debug)]
pub struct TensorBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> TensorBatcher<B> {
    /// Create a batcher for the given device and input resolution
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }

    /// Upload a host batch and apply ImageNet normalization
    pub fn batch(&self, host: &HostBatch) -> LeafBatch<B> {
        let batch_size = host.len();
        let (channels, height, width) = (3, self.image_size, self.image_size);

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(host.images.clone(), [batch_size, channels, height, width]),
            &self.device,
        );

        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]),
            &self.device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]),
            &self.device,
        );
        let images = (images - mean) / std;

        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(host.labels.clone(), [batch_size]),
            &self.device,
        );

        LeafBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = TensorBatcher::<TestBackend>::new(device, 8);

        let host = HostBatch {
            images: vec![0.5f32; 2 * 3 * 8 * 8],
            labels: vec![0i64, 1],
        };

        let batch = batcher.batch(&host);
        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [2]);
    }

    #[test]
    fn test_normalization_applied() {
        let device = Default::default();
        let batcher = TensorBatcher::<TestBackend>::new(device, 2);

        // All-0.5 input: red channel becomes (0.5 - 0.485) / 0.229
        let host = HostBatch {
            images: vec![0.5f32; 3 * 2 * 2],
            labels: vec![0i64],
        };

        let batch = batcher.batch(&host);
        let values: Vec<f32> = batch.images.into_data().to_vec().unwrap();
        let expected_red = (0.5 - 0.485) / 0.229;
        assert!((values[0] - expected_red).abs() < 1e-5);
    }
}
