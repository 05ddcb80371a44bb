//! Projection and classification heads attached to the pooled representation.

use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation;

/// Configuration for [`ProjectionHead`].
#[derive(Config, Debug)]
pub struct ProjectionHeadConfig {
    /// Pooled representation dimension.
    pub d_input: usize,
    /// Hidden dimension of the MLP.
    #[config(default = 2048)]
    pub d_hidden: usize,
    /// Output (contrastive embedding) dimension.
    #[config(default = 128)]
    pub d_output: usize,
}

/// Two-layer projection MLP used for the distillation branch:
/// Linear → LayerNorm → ReLU → Linear.
#[derive(Module, Debug)]
pub struct ProjectionHead<B: Backend> {
    /// Expansion: d_input → d_hidden.
    pub fc1: Linear<B>,
    /// Norm over the hidden features.
    pub norm: LayerNorm<B>,
    /// Contraction: d_hidden → d_output.
    pub fc2: Linear<B>,
}

impl ProjectionHeadConfig {
    /// Initialize a [`ProjectionHead`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> ProjectionHead<B> {
        ProjectionHead {
            fc1: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            norm: LayerNormConfig::new(self.d_hidden).init(device),
            fc2: LinearConfig::new(self.d_hidden, self.d_output).init(device),
        }
    }
}

impl<B: Backend> ProjectionHead<B> {
    /// Project `(batch, d_input)` to `(batch, d_output)`.
    pub fn forward(&self, pooled: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = activation::relu(self.norm.forward(self.fc1.forward(pooled)));
        self.fc2.forward(x)
    }
}

/// Configuration for [`ClassifierHead`].
#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    /// Pooled representation dimension.
    pub d_input: usize,
    /// Number of multi-label classes.
    pub num_classes: usize,
}

/// Linear multi-label classifier over the pooled representation.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    /// Logit head: d_input → num_classes.
    pub fc: Linear<B>,
}

impl ClassifierHeadConfig {
    /// Initialize a [`ClassifierHead`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            fc: LinearConfig::new(self.d_input, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> ClassifierHead<B> {
    /// Compute logits, shape `(batch, num_classes)`.
    pub fn forward(&self, pooled: Tensor<B, 2>) -> Tensor<B, 2> {
        self.fc.forward(pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_projection_shape() {
        let device = Default::default();
        let head = ProjectionHeadConfig::new(16)
            .with_d_hidden(32)
            .with_d_output(8)
            .init::<TestBackend>(&device);
        let pooled = Tensor::<TestBackend, 2>::random(
            [4, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(head.forward(pooled).dims(), [4, 8]);
    }

    #[test]
    fn test_classifier_shape() {
        let device = Default::default();
        let head = ClassifierHeadConfig::new(16, 5).init::<TestBackend>(&device);
        let pooled = Tensor::<TestBackend, 2>::random(
            [3, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        assert_eq!(head.forward(pooled).dims(), [3, 5]);
    }
}
