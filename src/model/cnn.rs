//! Classifier Model
//!
//! Composes a convolutional feature extractor with a trainable
//! classification head. The backbone is consumed as a capability: anything
//! that maps a fixed-resolution image to a fixed-length feature vector
//! would satisfy the scheduler, which only sees `forward` and the
//! trainability mask.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::config::ModelConfig;

/// Which backbone blocks are trainable, counted from the output end.
///
/// A stage transition produces a new mask and a rebound optimizer rather
/// than toggling flags on a long-lived object, so the trainable set is
/// always inspectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainabilityMask {
    trainable_blocks: usize,
}

impl TrainabilityMask {
    /// All backbone blocks frozen; only the head trains
    pub fn frozen() -> Self {
        Self {
            trainable_blocks: 0,
        }
    }

    /// The last `n` backbone blocks (by depth order) are trainable
    pub fn unfreeze_last(n: usize) -> Self {
        Self {
            trainable_blocks: n,
        }
    }

    /// Number of trainable trailing blocks
    pub fn trainable_blocks(&self) -> usize {
        self.trainable_blocks
    }
}

/// A conv block: Conv2d, BatchNorm, ReLU, 2x2 max pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Feature extractor: stacked conv blocks with doubling filter counts,
/// ending in global average pooling. Maps [B, 3, H, W] to [B, feature_dim].
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
}

impl<B: Backend> Backbone<B> {
    /// Build the block stack from the model configuration
    pub fn new(config: &ModelConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(config.num_blocks);
        let mut in_channels = 3;
        let mut out_channels = config.base_filters;
        for _ in 0..config.num_blocks {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
            out_channels *= 2;
        }

        Self {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// Number of blocks, i.e. the depth seen by `unfreeze_last`
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Extract the fixed-length feature vector
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    fn with_trainability(mut self, mask: TrainabilityMask) -> Self {
        let frozen = self.blocks.len().saturating_sub(mask.trainable_blocks());
        self.blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| if i < frozen { block.no_grad() } else { block })
            .collect();
        self
    }
}

/// A head block: Linear, BatchNorm, ReLU, Dropout
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    linear: Linear<B>,
    bn: BatchNorm<B>,
    relu: Relu,
    dropout: Dropout,
}

impl<B: Backend> DenseBlock<B> {
    fn new(in_features: usize, out_features: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(in_features, out_features).init(device),
            bn: BatchNormConfig::new(out_features).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.dropout.forward(x)
    }
}

/// Classification head: dense blocks ending in a `num_classes` projection.
/// The architecture never changes after construction.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    blocks: Vec<DenseBlock<B>>,
    output: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// Build the head from the model configuration
    pub fn new(config: &ModelConfig, num_classes: usize, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(config.head_units.len());
        let mut in_features = config.feature_dim();
        for &units in &config.head_units {
            blocks.push(DenseBlock::new(in_features, units, config.dropout, device));
            in_features = units;
        }

        Self {
            blocks,
            output: LinearConfig::new(in_features, num_classes).init(device),
        }
    }

    /// Map features to class logits
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.output.forward(x)
    }
}

/// Backbone + head, the unit the scheduler trains and checkpoints
#[derive(Module, Debug)]
pub struct LeafClassifier<B: Backend> {
    backbone: Backbone<B>,
    head: ClassifierHead<B>,
    num_classes: usize,
}

impl<B: Backend> LeafClassifier<B> {
    /// Build a fresh model with all parameters trainable
    pub fn new(config: &ModelConfig, num_classes: usize, device: &B::Device) -> Self {
        Self {
            backbone: Backbone::new(config, device),
            head: ClassifierHead::new(config, num_classes, device),
            num_classes,
        }
    }

    /// Forward pass producing logits of shape [batch, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(x);
        self.head.forward(features)
    }

    /// Forward pass with softmax, for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Backbone depth available to `unfreeze_last`
    pub fn num_backbone_blocks(&self) -> usize {
        self.backbone.num_blocks()
    }

    /// Produce a model whose backbone trainability matches the mask.
    /// The head is always trainable.
    pub fn with_trainability(mut self, mask: TrainabilityMask) -> Self {
        self.backbone = self.backbone.with_trainability(mask);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            base_filters: 4,
            num_blocks: 2,
            head_units: vec![16],
            dropout: 0.1,
        }
    }

    #[test]
    fn test_forward_output_shape() {
        let device = Default::default();
        let model = LeafClassifier::<TestBackend>::new(&tiny_config(), 5, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 5]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = LeafClassifier::<TestBackend>::new(&tiny_config(), 4, &device);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 16, 16], &device);
        let probs: Vec<f32> = model.forward_softmax(input).into_data().to_vec().unwrap();

        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(probs.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_backbone_feature_dim_matches_config() {
        let device = Default::default();
        let config = tiny_config();
        let backbone = Backbone::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([3, 3, 16, 16], &device);
        let features = backbone.forward(input);

        assert_eq!(features.dims(), [3, config.feature_dim()]);
        assert_eq!(backbone.num_blocks(), 2);
    }

    #[test]
    fn test_trainability_mask_values() {
        assert_eq!(TrainabilityMask::frozen().trainable_blocks(), 0);
        assert_eq!(TrainabilityMask::unfreeze_last(2).trainable_blocks(), 2);
    }

    #[test]
    fn test_masked_model_still_forwards() {
        let device = Default::default();
        let model = LeafClassifier::<TestBackend>::new(&tiny_config(), 3, &device)
            .with_trainability(TrainabilityMask::frozen());

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [1, 3]);
    }

    #[test]
    fn test_unfreeze_beyond_depth_is_full_unfreeze() {
        let device = Default::default();
        let model = LeafClassifier::<TestBackend>::new(&tiny_config(), 3, &device)
            .with_trainability(TrainabilityMask::unfreeze_last(10));

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [1, 3]);
    }
}
