//! VGG16 feature extractor (convolutional part only)

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Channels of the final feature map
pub const OUT_CHANNELS: usize = 512;
/// Smallest input that survives the five poolings
pub const MIN_INPUT: usize = 32;

/// Output channels and convolution count of each VGG16 block
pub const VGG16_BLOCKS: [(usize, usize); 5] = [(64, 2), (128, 2), (256, 3), (512, 3), (512, 3)];

/// 3x3 same-padded convolutions with ReLU, closed by a 2x2 max-pool
#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    pub convs: Vec<Conv2d<B>>,
    pub pool: MaxPool2d,
    pub relu: Relu,
}

impl<B: Backend> VggBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, n_convs: usize, device: &B::Device) -> Self {
        let convs = (0..n_convs)
            .map(|i| {
                let input = if i == 0 { in_channels } else { out_channels };
                Conv2dConfig::new([input, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device)
            })
            .collect();

        Self {
            convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(x, |x, conv| self.relu.forward(conv.forward(x)));
        self.pool.forward(x)
    }
}

/// VGG16 without the dense top; halves the resolution five times
#[derive(Module, Debug)]
pub struct Vgg16<B: Backend> {
    pub blocks: Vec<VggBlock<B>>,
}

impl<B: Backend> Vgg16<B> {
    pub fn new(device: &B::Device) -> Self {
        let mut in_channels = 3;
        let blocks = VGG16_BLOCKS
            .iter()
            .map(|&(out_channels, n_convs)| {
                let block = VggBlock::new(in_channels, out_channels, n_convs, device);
                in_channels = out_channels;
                block
            })
            .collect();

        Self { blocks }
    }

    /// `[N, 3, H, W]` to `[N, 512, H/32, W/32]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Spatial size of the VGG16 feature map for a square input
pub fn feature_size(input: usize) -> usize {
    VGG16_BLOCKS.iter().fold(input, |size, _| size / 2)
}
