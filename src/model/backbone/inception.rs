//! InceptionV3 feature extractor (no classification top)
//!
//! Layer for layer this follows the widely used Keras topology: a
//! convolutional stem, three InceptionA blocks (mixed0-2), a grid reduction
//! (mixed3), four factorised 7x7 blocks (mixed4-7), a second reduction
//! (mixed8) and two expanded-filter-bank blocks (mixed9-10).
//!
//! At 75x75 input the spatial sizes are
//! 37, 35, 35, 17, 17, 15, 7 through the stem, then 7 / 3 / 1.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Channels of the final feature map
pub const OUT_CHANNELS: usize = 2048;
/// Smallest input with a non-empty feature map
pub const MIN_INPUT: usize = 75;

const BN_EPSILON: f64 = 1e-3;
const BN_MOMENTUM: f64 = 0.01;

/// Convolution without bias, batch norm, ReLU
#[derive(Module, Debug)]
pub struct BasicConv2d<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
    pub relu: Relu,
}

impl<B: Backend> BasicConv2d<B> {
    pub fn new(
        channels: [usize; 2],
        kernel: [usize; 2],
        stride: usize,
        padding: PaddingConfig2d,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, kernel)
            .with_stride([stride, stride])
            .with_padding(padding)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(channels[1])
            .with_epsilon(BN_EPSILON)
            .with_momentum(BN_MOMENTUM)
            .init(device);

        Self {
            conv,
            bn,
            relu: Relu::new(),
        }
    }

    /// Square kernel, stride 1, same padding
    fn same(in_c: usize, out_c: usize, k: usize, device: &B::Device) -> Self {
        Self::new([in_c, out_c], [k, k], 1, PaddingConfig2d::Same, device)
    }

    /// Square kernel with valid padding
    fn valid(in_c: usize, out_c: usize, k: usize, stride: usize, device: &B::Device) -> Self {
        Self::new([in_c, out_c], [k, k], stride, PaddingConfig2d::Valid, device)
    }

    /// `1 x n` kernel, width padded to keep the size
    fn row(in_c: usize, out_c: usize, n: usize, device: &B::Device) -> Self {
        Self::new([in_c, out_c], [1, n], 1, PaddingConfig2d::Explicit(0, n / 2), device)
    }

    /// `n x 1` kernel, height padded to keep the size
    fn col(in_c: usize, out_c: usize, n: usize, device: &B::Device) -> Self {
        Self::new([in_c, out_c], [n, 1], 1, PaddingConfig2d::Explicit(n / 2, 0), device)
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

fn same_avg_pool() -> AvgPool2d {
    AvgPool2dConfig::new([3, 3])
        .with_strides([1, 1])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_count_include_pad(false)
        .init()
}

fn reduction_max_pool() -> MaxPool2d {
    MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init()
}

fn chain<B: Backend>(layers: &[BasicConv2d<B>], x: Tensor<B, 4>) -> Tensor<B, 4> {
    layers.iter().fold(x, |x, layer| layer.forward(x))
}

/// mixed0-2: 1x1, 5x5, double 3x3 and pooled branches
#[derive(Module, Debug)]
pub struct InceptionA<B: Backend> {
    branch1x1: BasicConv2d<B>,
    branch5x5: Vec<BasicConv2d<B>>,
    branch3x3dbl: Vec<BasicConv2d<B>>,
    branch_pool: BasicConv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> InceptionA<B> {
    pub fn new(in_c: usize, pool_features: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: BasicConv2d::same(in_c, 64, 1, device),
            branch5x5: vec![
                BasicConv2d::same(in_c, 48, 1, device),
                BasicConv2d::same(48, 64, 5, device),
            ],
            branch3x3dbl: vec![
                BasicConv2d::same(in_c, 64, 1, device),
                BasicConv2d::same(64, 96, 3, device),
                BasicConv2d::same(96, 96, 3, device),
            ],
            branch_pool: BasicConv2d::same(in_c, pool_features, 1, device),
            pool: same_avg_pool(),
        }
    }

    pub fn out_channels(pool_features: usize) -> usize {
        64 + 64 + 96 + pool_features
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());
        let b5 = chain(&self.branch5x5, x.clone());
        let b3 = chain(&self.branch3x3dbl, x.clone());
        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b5, b3, bp], 1)
    }
}

/// mixed3: grid reduction to 768 channels
#[derive(Module, Debug)]
pub struct InceptionB<B: Backend> {
    branch3x3: BasicConv2d<B>,
    branch3x3dbl: Vec<BasicConv2d<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> InceptionB<B> {
    pub fn new(in_c: usize, device: &B::Device) -> Self {
        Self {
            branch3x3: BasicConv2d::valid(in_c, 384, 3, 2, device),
            branch3x3dbl: vec![
                BasicConv2d::same(in_c, 64, 1, device),
                BasicConv2d::same(64, 96, 3, device),
                BasicConv2d::valid(96, 96, 3, 2, device),
            ],
            pool: reduction_max_pool(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b3 = self.branch3x3.forward(x.clone());
        let bd = chain(&self.branch3x3dbl, x.clone());
        let bp = self.pool.forward(x);
        Tensor::cat(vec![b3, bd, bp], 1)
    }
}

/// mixed4-7: factorised 7x7 convolutions
#[derive(Module, Debug)]
pub struct InceptionC<B: Backend> {
    branch1x1: BasicConv2d<B>,
    branch7x7: Vec<BasicConv2d<B>>,
    branch7x7dbl: Vec<BasicConv2d<B>>,
    branch_pool: BasicConv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> InceptionC<B> {
    pub fn new(in_c: usize, c7: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: BasicConv2d::same(in_c, 192, 1, device),
            branch7x7: vec![
                BasicConv2d::same(in_c, c7, 1, device),
                BasicConv2d::row(c7, c7, 7, device),
                BasicConv2d::col(c7, 192, 7, device),
            ],
            branch7x7dbl: vec![
                BasicConv2d::same(in_c, c7, 1, device),
                BasicConv2d::col(c7, c7, 7, device),
                BasicConv2d::row(c7, c7, 7, device),
                BasicConv2d::col(c7, c7, 7, device),
                BasicConv2d::row(c7, 192, 7, device),
            ],
            branch_pool: BasicConv2d::same(in_c, 192, 1, device),
            pool: same_avg_pool(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());
        let b7 = chain(&self.branch7x7, x.clone());
        let bd = chain(&self.branch7x7dbl, x.clone());
        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b7, bd, bp], 1)
    }
}

/// mixed8: grid reduction to 1280 channels
#[derive(Module, Debug)]
pub struct InceptionD<B: Backend> {
    branch3x3: Vec<BasicConv2d<B>>,
    branch7x7x3: Vec<BasicConv2d<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> InceptionD<B> {
    pub fn new(in_c: usize, device: &B::Device) -> Self {
        Self {
            branch3x3: vec![
                BasicConv2d::same(in_c, 192, 1, device),
                BasicConv2d::valid(192, 320, 3, 2, device),
            ],
            branch7x7x3: vec![
                BasicConv2d::same(in_c, 192, 1, device),
                BasicConv2d::row(192, 192, 7, device),
                BasicConv2d::col(192, 192, 7, device),
                BasicConv2d::valid(192, 192, 3, 2, device),
            ],
            pool: reduction_max_pool(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b3 = chain(&self.branch3x3, x.clone());
        let b7 = chain(&self.branch7x7x3, x.clone());
        let bp = self.pool.forward(x);
        Tensor::cat(vec![b3, b7, bp], 1)
    }
}

/// mixed9-10: expanded filter banks
#[derive(Module, Debug)]
pub struct InceptionE<B: Backend> {
    branch1x1: BasicConv2d<B>,
    branch3x3: BasicConv2d<B>,
    branch3x3_a: BasicConv2d<B>,
    branch3x3_b: BasicConv2d<B>,
    branch3x3dbl: Vec<BasicConv2d<B>>,
    branch3x3dbl_a: BasicConv2d<B>,
    branch3x3dbl_b: BasicConv2d<B>,
    branch_pool: BasicConv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> InceptionE<B> {
    pub fn new(in_c: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: BasicConv2d::same(in_c, 320, 1, device),
            branch3x3: BasicConv2d::same(in_c, 384, 1, device),
            branch3x3_a: BasicConv2d::row(384, 384, 3, device),
            branch3x3_b: BasicConv2d::col(384, 384, 3, device),
            branch3x3dbl: vec![
                BasicConv2d::same(in_c, 448, 1, device),
                BasicConv2d::same(448, 384, 3, device),
            ],
            branch3x3dbl_a: BasicConv2d::row(384, 384, 3, device),
            branch3x3dbl_b: BasicConv2d::col(384, 384, 3, device),
            branch_pool: BasicConv2d::same(in_c, 192, 1, device),
            pool: same_avg_pool(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());

        let b3 = self.branch3x3.forward(x.clone());
        let b3 = Tensor::cat(
            vec![self.branch3x3_a.forward(b3.clone()), self.branch3x3_b.forward(b3)],
            1,
        );

        let bd = chain(&self.branch3x3dbl, x.clone());
        let bd = Tensor::cat(
            vec![self.branch3x3dbl_a.forward(bd.clone()), self.branch3x3dbl_b.forward(bd)],
            1,
        );

        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b3, bd, bp], 1)
    }
}

/// InceptionV3 without the top, 2048 output channels
#[derive(Module, Debug)]
pub struct InceptionV3<B: Backend> {
    stem: Vec<BasicConv2d<B>>,
    stem_tail: Vec<BasicConv2d<B>>,
    stem_pool: MaxPool2d,
    mixed_a: Vec<InceptionA<B>>,
    mixed_b: InceptionB<B>,
    mixed_c: Vec<InceptionC<B>>,
    mixed_d: InceptionD<B>,
    mixed_e: Vec<InceptionE<B>>,
}

impl<B: Backend> InceptionV3<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = vec![
            BasicConv2d::valid(3, 32, 3, 2, device),
            BasicConv2d::valid(32, 32, 3, 1, device),
            BasicConv2d::same(32, 64, 3, device),
        ];
        let stem_tail = vec![
            BasicConv2d::valid(64, 80, 1, 1, device),
            BasicConv2d::valid(80, 192, 3, 1, device),
        ];

        let mut channels = 192;
        let mixed_a = [32, 64, 64]
            .iter()
            .map(|&pool_features| {
                let block = InceptionA::new(channels, pool_features, device);
                channels = InceptionA::<B>::out_channels(pool_features);
                block
            })
            .collect();

        let mixed_c = [128, 160, 160, 192]
            .iter()
            .map(|&c7| InceptionC::new(768, c7, device))
            .collect();

        Self {
            stem,
            stem_tail,
            stem_pool: reduction_max_pool(),
            mixed_a,
            mixed_b: InceptionB::new(288, device),
            mixed_c,
            mixed_d: InceptionD::new(768, device),
            mixed_e: vec![InceptionE::new(1280, device), InceptionE::new(2048, device)],
        }
    }

    /// `[N, 3, H, W]` to `[N, 2048, h, w]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem_pool.forward(chain(&self.stem, x));
        let x = self.stem_pool.forward(chain(&self.stem_tail, x));
        let x = self.mixed_a.iter().fold(x, |x, block| block.forward(x));
        let x = self.mixed_b.forward(x);
        let x = self.mixed_c.iter().fold(x, |x, block| block.forward(x));
        let x = self.mixed_d.forward(x);
        self.mixed_e.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Spatial size of the InceptionV3 feature map, or `None` when the input is too small
pub fn feature_size(input: usize) -> Option<usize> {
    // (kernel, stride) of every valid-padded stage that changes the size
    const STAGES: [(usize, usize); 7] = [(3, 2), (3, 1), (3, 2), (3, 1), (3, 2), (3, 2), (3, 2)];
    STAGES.iter().try_fold(input, |size, &(k, stride)| {
        size.checked_sub(k).map(|s| s / stride + 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_size() {
        assert_eq!(feature_size(75), Some(1));
        assert_eq!(feature_size(299), Some(8));
        assert_eq!(feature_size(40), None);
    }

    #[test]
    fn test_factorised_convs_keep_size() {
        let device = Default::default();
        let row = BasicConv2d::<TestBackend>::row(4, 6, 7, &device);
        let col = BasicConv2d::<TestBackend>::col(6, 2, 7, &device);
        let x = Tensor::<TestBackend, 4>::ones([1, 4, 3, 3], &device);
        assert_eq!(col.forward(row.forward(x)).dims(), [1, 2, 3, 3]);
    }

    #[test]
    fn test_inception_a_channels() {
        let device = Default::default();
        let block = InceptionA::<TestBackend>::new(8, 32, &device);
        let x = Tensor::<TestBackend, 4>::ones([2, 8, 5, 5], &device);
        assert_eq!(block.forward(x).dims(), [2, 256, 5, 5]);
    }

    #[test]
    fn test_inception_v3_forward_shape() {
        let device = Default::default();
        let model = InceptionV3::<TestBackend>::new(&device);
        let x = Tensor::<TestBackend, 4>::ones([1, 3, 75, 75], &device);
        assert_eq!(model.forward(x).dims(), [1, 2048, 1, 1]);
    }
}
