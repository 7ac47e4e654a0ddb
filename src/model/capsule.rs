//! Capsule-routing classification head
//!
//! The head turns a backbone feature map into class logits:
//!
//! 1. **Primary capsules**: a strided 1x1 convolution whose channels are
//!    grouped into 8-dimensional capsules, squashed and batch-normalized.
//! 2. **Routing**: a dense prediction `u_hat`, refined by a fixed number of
//!    multiplicative routing iterations. Each iteration computes coupling
//!    coefficients `c = squash(W_i · softmax(r))` and gates the prediction
//!    with `conditional_prelu(u_hat * c, c)`. The gated output becomes the
//!    next iteration's `r`, starting from `r = u_hat`.
//!
//!    The Keras training scripts this head mirrors feed `softmax(u_hat)` to
//!    every iteration and keep only the last one, so earlier iterations
//!    never reach the output. Here the iterations are chained.
//! 3. **Classifier**: a small ReLU layer followed by the class logits.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{relu, softmax},
        backend::Backend,
        Tensor,
    },
};

/// Keras `BatchNormalization` default
const BN_EPSILON: f64 = 1e-3;

/// Capsule squash along the last axis
///
/// `s = Σ (v / 5)²` sets the gain `0.5 s / (1 + 0.5 s) / sqrt(s + 1e-7)`,
/// which multiplies the layer-normalized vector.
pub fn squash<B: Backend, const D: usize>(v: Tensor<B, D>) -> Tensor<B, D> {
    let dim = D - 1;

    let scaled = v.clone().div_scalar(5.0);
    let s = (scaled.clone() * scaled).sum_dim(dim);
    let half = s.clone().mul_scalar(0.5);
    let gain = half.clone() / half.add_scalar(1.0) / s.add_scalar(1e-7).sqrt();

    let centered = v.clone() - v.mean_dim(dim);
    let variance = (centered.clone() * centered.clone()).mean_dim(dim);
    let normalized = centered / variance.add_scalar(1e-6).sqrt();

    normalized * gain
}

/// `relu(features) + gate * relu(-features)`
///
/// The negative part is scaled per element by `gate`.
pub fn conditional_prelu<B: Backend, const D: usize>(
    features: Tensor<B, D>,
    gate: Tensor<B, D>,
) -> Tensor<B, D> {
    relu(features.clone()) + gate * relu(features.neg())
}

/// Hyperparameters of the capsule head
#[derive(Config, Debug)]
pub struct CapsuleHeadConfig {
    /// Channels of the backbone feature map
    pub in_channels: usize,
    /// Side length of the backbone feature map
    pub feature_size: usize,
    pub num_classes: usize,
    #[config(default = "32")]
    pub capsules_per_position: usize,
    #[config(default = "8")]
    pub capsule_dim: usize,
    /// Width of the routed representation
    #[config(default = "160")]
    pub routed_dim: usize,
    #[config(default = "32")]
    pub hidden_units: usize,
    #[config(default = "3")]
    pub routings: usize,
    /// Running-statistics momentum of the capsule batch norm
    #[config(default = "0.2")]
    pub bn_momentum: f64,
}

impl CapsuleHeadConfig {
    /// Side length of the primary-capsule grid (1x1 conv, stride 2, valid)
    pub fn primary_grid_size(&self) -> usize {
        self.feature_size.saturating_sub(1) / 2 + 1
    }

    pub fn num_primary_capsules(&self) -> usize {
        let grid = self.primary_grid_size();
        grid * grid * self.capsules_per_position
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CapsuleHead<B> {
        let primary = PrimaryCapsules::new(
            self.in_channels,
            self.capsules_per_position,
            self.capsule_dim,
            self.bn_momentum,
            device,
        );
        let routing = CapsuleRouting::new(
            self.num_primary_capsules() * self.capsule_dim,
            self.routed_dim,
            self.routings,
            device,
        );

        CapsuleHead {
            primary,
            routing,
            hidden: LinearConfig::new(self.routed_dim, self.hidden_units)
                .with_initializer(glorot_uniform())
                .init(device),
            output: LinearConfig::new(self.hidden_units, self.num_classes)
                .with_initializer(glorot_uniform())
                .init(device),
        }
    }
}

fn glorot_uniform() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

fn he_normal() -> Initializer {
    Initializer::KaimingNormal {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: false,
    }
}

/// Strided 1x1 convolution regrouped into squashed, normalized capsules
#[derive(Module, Debug)]
pub struct PrimaryCapsules<B: Backend> {
    pub conv: Conv2d<B>,
    /// Normalizes each of the `capsule_dim` components
    pub norm: BatchNorm<B>,
    capsule_dim: usize,
}

impl<B: Backend> PrimaryCapsules<B> {
    pub fn new(
        in_channels: usize,
        capsules_per_position: usize,
        capsule_dim: usize,
        bn_momentum: f64,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, capsules_per_position * capsule_dim], [1, 1])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let norm = BatchNormConfig::new(capsule_dim)
            .with_momentum(bn_momentum)
            .with_epsilon(BN_EPSILON)
            .init(device);

        Self {
            conv,
            norm,
            capsule_dim,
        }
    }

    /// Capsules as a 3D tensor `[N, num_capsules, capsule_dim]`
    pub fn capsules(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = squash(group_capsules(self.conv.forward(x), self.capsule_dim));

        // batch norm expects channels on axis 1
        self.norm.forward(x.swap_dims(1, 2)).swap_dims(1, 2)
    }

    /// Flattened capsules `[N, num_capsules * capsule_dim]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let caps = self.capsules(x);
        let [n, num_capsules, dim] = caps.dims();
        caps.reshape([n, num_capsules * dim])
    }
}

/// Regroup `[N, C, H, W]` into `[N, H * W * C / dim, dim]`
///
/// Channels-last order: consecutive channels at one grid position form a
/// capsule, and positions are visited row by row.
pub fn group_capsules<B: Backend>(x: Tensor<B, 4>, capsule_dim: usize) -> Tensor<B, 3> {
    let [n, c, h, w] = x.dims();
    let num_capsules = h * w * c / capsule_dim;

    // [N, C, H, W] -> [N, H, W, C]
    let x = x.swap_dims(1, 2).swap_dims(2, 3);
    x.reshape([n, num_capsules, capsule_dim])
}

/// Dense prediction followed by iterative multiplicative routing
#[derive(Module, Debug)]
pub struct CapsuleRouting<B: Backend> {
    pub prediction: Linear<B>,
    pub iterations: Vec<Linear<B>>,
}

impl<B: Backend> CapsuleRouting<B> {
    pub fn new(in_features: usize, routed_dim: usize, routings: usize, device: &B::Device) -> Self {
        let prediction = LinearConfig::new(in_features, routed_dim)
            .with_initializer(he_normal())
            .init(device);
        let iterations = (0..routings)
            .map(|_| {
                LinearConfig::new(routed_dim, routed_dim)
                    .with_initializer(glorot_uniform())
                    .init(device)
            })
            .collect();

        Self {
            prediction,
            iterations,
        }
    }

    pub fn routings(&self) -> usize {
        self.iterations.len()
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let u_hat = self.prediction.forward(x);

        self.iterations.iter().fold(u_hat.clone(), |routed, layer| {
            let coupling = squash(layer.forward(softmax(routed, 1)));
            conditional_prelu(u_hat.clone() * coupling.clone(), coupling)
        })
    }
}

/// Primary capsules, routing and the dense classifier
#[derive(Module, Debug)]
pub struct CapsuleHead<B: Backend> {
    pub primary: PrimaryCapsules<B>,
    pub routing: CapsuleRouting<B>,
    pub hidden: Linear<B>,
    pub output: Linear<B>,
}

impl<B: Backend> CapsuleHead<B> {
    /// Backbone features `[N, C, H, W]` to logits `[N, num_classes]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.primary.forward(features);
        let x = self.routing.forward(x);
        let x = relu(self.hidden.forward(x));
        self.output.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::Param;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn values<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_squash_known_values() {
        let device = Default::default();
        let v = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(vec![3.0f32, 4.0], [1, 2]),
            &device,
        );
        // s = 1, gain = 1/3, normalized = [-1, 1]
        let out = values(squash(v));
        assert!((out[0] + 1.0 / 3.0).abs() < 1e-4);
        assert!((out[1] - 1.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_squash_rows_are_independent() {
        let device = Default::default();
        let v = Tensor::<TestBackend, 3>::from_floats(
            TensorData::new(vec![3.0f32, 4.0, 30.0, 40.0], [1, 2, 2]),
            &device,
        );
        let out = values(squash(v));
        // gain tends to 1 / sqrt(s) for long vectors
        assert!(out[1] > 0.0 && out[3] > 0.0);
        assert!((out[0] + out[1]).abs() < 1e-5);
        assert!((out[2] + out[3]).abs() < 1e-5);
        assert!(out[3] < out[1]);
    }

    #[test]
    fn test_conditional_prelu() {
        let device = Default::default();
        let f = Tensor::<TestBackend, 1>::from_floats([-2.0, 3.0, -1.0], &device);
        let p = Tensor::<TestBackend, 1>::from_floats([0.5, 0.5, -2.0], &device);
        assert_eq!(values(conditional_prelu(f, p)), vec![1.0, 3.0, -2.0]);
    }

    #[test]
    fn test_primary_capsule_shapes() {
        let device = Default::default();
        let primary = PrimaryCapsules::<TestBackend>::new(16, 4, 8, 0.2, &device);
        let x = Tensor::<TestBackend, 4>::ones([2, 16, 3, 3], &device);

        assert_eq!(primary.capsules(x.clone()).dims(), [2, 16, 8]);
        assert_eq!(primary.forward(x).dims(), [2, 128]);
    }

    #[test]
    fn test_routing_output_shape() {
        let device = Default::default();
        let routing = CapsuleRouting::<TestBackend>::new(64, 160, 3, &device);
        let x = Tensor::<TestBackend, 2>::random(
            [4, 64],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(routing.routings(), 3);
        assert_eq!(routing.forward(x).dims(), [4, 160]);
    }

    #[test]
    fn test_routing_without_iterations_is_prediction() {
        let device = Default::default();
        let routing = CapsuleRouting::<TestBackend>::new(6, 5, 0, &device);
        let x = Tensor::<TestBackend, 2>::ones([1, 6], &device);
        let direct = values(routing.prediction.forward(x.clone()));
        assert_eq!(values(routing.forward(x)), direct);
    }

    #[test]
    fn test_head_logits_shape() {
        let device = Default::default();
        let config = CapsuleHeadConfig::new(16, 3, 5);
        assert_eq!(config.primary_grid_size(), 2);
        assert_eq!(config.num_primary_capsules(), 128);

        let head = config.init::<TestBackend>(&device);
        let features = Tensor::<TestBackend, 4>::ones([2, 16, 3, 3], &device);
        assert_eq!(head.forward(features).dims(), [2, 5]);
    }

    #[test]
    fn test_primary_grid_for_single_pixel() {
        let config = CapsuleHeadConfig::new(512, 1, 10);
        assert_eq!(config.num_primary_capsules(), 32);
    }

    /// `[1, C, H, W]` tensor holding `100 c + 10 h + w` at each position
    fn indexed_map(c: usize, h: usize, w: usize) -> Tensor<TestBackend, 4> {
        let data: Vec<f32> = (0..c)
            .flat_map(|ci| {
                (0..h).flat_map(move |hi| (0..w).map(move |wi| (100 * ci + 10 * hi + wi) as f32))
            })
            .collect();
        Tensor::from_floats(TensorData::new(data, [1, c, h, w]), &Default::default())
    }

    #[test]
    fn test_group_capsules_is_channels_last() {
        let caps = values(group_capsules(indexed_map(16, 2, 2), 8));
        assert_eq!(caps.len(), 8 * 8);

        let capsule = |i: usize| caps[i * 8..(i + 1) * 8].to_vec();
        let at = |h: usize, w: usize, channels: std::ops::Range<usize>| -> Vec<f32> {
            channels.map(|c| (100 * c + 10 * h + w) as f32).collect()
        };

        // two capsules per position, positions row by row
        assert_eq!(capsule(0), at(0, 0, 0..8));
        assert_eq!(capsule(1), at(0, 0, 8..16));
        assert_eq!(capsule(2), at(0, 1, 0..8));
        assert_eq!(capsule(5), at(1, 0, 8..16));
        assert_eq!(capsule(7), at(1, 1, 8..16));
    }

    #[test]
    fn test_primary_capsules_read_strided_positions() {
        let device = Default::default();
        let mut primary = PrimaryCapsules::<TestBackend>::new(16, 2, 8, 0.2, &device);
        let identity: Vec<f32> = (0..16)
            .flat_map(|o| (0..16).map(move |i| if o == i { 1.0 } else { 0.0 }))
            .collect();
        primary.conv.weight = Param::from_tensor(Tensor::from_floats(
            TensorData::new(identity, [16, 16, 1, 1]),
            &device,
        ));
        primary.conv.bias = None;

        // stride 2 over a 3x3 map keeps rows and columns 0 and 2
        let caps = values(primary.capsules(indexed_map(16, 3, 3)));
        assert_eq!(caps.len(), 8 * 8);

        let expected: Vec<f32> = [(0, 0), (0, 2), (2, 0), (2, 2)]
            .iter()
            .flat_map(|&(h, w)| (0..16).map(move |c| (100 * c + 10 * h + w) as f32))
            .collect();
        let expected = Tensor::<TestBackend, 3>::from_floats(
            TensorData::new(expected, [1, 8, 8]),
            &device,
        );
        // inference batch norm with fresh statistics only rescales
        let scale = 1.0 / (1.0 + BN_EPSILON as f32).sqrt();
        let expected = values(squash(expected));

        for (got, want) in caps.iter().zip(&expected) {
            assert!((got - want * scale).abs() < 1e-5, "{} vs {}", got, want * scale);
        }
    }

    #[test]
    fn test_capsule_norm_uses_keras_epsilon() {
        let primary = PrimaryCapsules::<TestBackend>::new(4, 2, 8, 0.2, &Default::default());
        assert_eq!(primary.norm.epsilon, 1e-3);
        assert_eq!(primary.norm.momentum, 0.2);
    }

    fn host_linear(layer: &Linear<TestBackend>, rows: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let [d_in, d_out] = layer.weight.val().dims();
        let weight = values(layer.weight.val());
        let bias = layer
            .bias
            .as_ref()
            .map(|b| values(b.val()))
            .unwrap_or_else(|| vec![0.0; d_out]);

        rows.iter()
            .map(|x| {
                (0..d_out)
                    .map(|o| bias[o] + (0..d_in).map(|i| x[i] * weight[i * d_out + o]).sum::<f32>())
                    .collect()
            })
            .collect()
    }

    fn host_softmax(row: &[f32]) -> Vec<f32> {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = row.iter().map(|v| (v - max).exp()).collect();
        let sum: f32 = exp.iter().sum();
        exp.iter().map(|e| e / sum).collect()
    }

    fn host_squash(row: &[f32]) -> Vec<f32> {
        let n = row.len() as f32;
        let s: f32 = row.iter().map(|v| (v / 5.0) * (v / 5.0)).sum();
        let gain = 0.5 * s / (1.0 + 0.5 * s) / (s + 1e-7).sqrt();
        let mean = row.iter().sum::<f32>() / n;
        let variance = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        row.iter()
            .map(|v| (v - mean) / (variance + 1e-6).sqrt() * gain)
            .collect()
    }

    #[test]
    fn test_routing_matches_hand_computation() {
        let device = Default::default();
        let routing = CapsuleRouting::<TestBackend>::new(6, 5, 2, &device);

        let rows: Vec<Vec<f32>> = (0..3)
            .map(|r| (0..6).map(|i| ((r * 6 + i) as f32 * 0.37).sin() * 2.0).collect())
            .collect();
        let x = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(rows.concat(), [3, 6]),
            &device,
        );

        let u_hat = host_linear(&routing.prediction, &rows);
        let mut routed = u_hat.clone();
        for layer in &routing.iterations {
            let weights: Vec<Vec<f32>> = routed.iter().map(|r| host_softmax(r)).collect();
            let coupling: Vec<Vec<f32>> = host_linear(layer, &weights)
                .iter()
                .map(|r| host_squash(r))
                .collect();
            routed = u_hat
                .iter()
                .zip(&coupling)
                .map(|(u, c)| {
                    u.iter()
                        .zip(c)
                        .map(|(&u, &c)| {
                            let f = u * c;
                            f.max(0.0) + c * (-f).max(0.0)
                        })
                        .collect()
                })
                .collect();
        }

        let got = values(routing.forward(x));
        let want = routed.concat();
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(&want) {
            assert!((g - w).abs() < 1e-4, "{} vs {}", g, w);
        }
    }
}
