//! Attention pooling over encoded tokens.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation;

/// Configuration for [`AttentionPool`].
#[derive(Config, Debug)]
pub struct AttentionPoolConfig {
    /// Token embedding dimension.
    pub d_model: usize,
}

/// Softmax-weighted pooling: a learned score per token, pooled representation
/// is the score-weighted sum of the tokens.
#[derive(Module, Debug)]
pub struct AttentionPool<B: Backend> {
    /// Scoring head: d_model → 1.
    pub score: Linear<B>,
}

impl AttentionPoolConfig {
    /// Initialize an [`AttentionPool`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttentionPool<B> {
        AttentionPool {
            score: LinearConfig::new(self.d_model, 1).init(device),
        }
    }
}

impl<B: Backend> AttentionPool<B> {
    /// Pool `(batch, tokens, d_model)` to `(batch, d_model)`.
    ///
    /// Also returns the per-token attention weights, shape `(batch, tokens)`.
    pub fn forward(&self, hidden: Tensor<B, 3>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch, tokens, d_model] = hidden.dims();
        let scores: Tensor<B, 2> = self.score.forward(hidden.clone()).squeeze::<2>(2);
        let weights = activation::softmax(scores, 1);
        let pooled = (hidden * weights.clone().unsqueeze_dim::<3>(2))
            .sum_dim(1)
            .reshape([batch, d_model]);
        (pooled, weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_pool_shapes() {
        let device = Default::default();
        let pool = AttentionPoolConfig::new(16).init::<TestBackend>(&device);
        let hidden = Tensor::<TestBackend, 3>::random(
            [3, 7, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let (pooled, weights) = pool.forward(hidden);
        assert_eq!(pooled.dims(), [3, 16]);
        assert_eq!(weights.dims(), [3, 7]);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let device = Default::default();
        let pool = AttentionPoolConfig::new(8).init::<TestBackend>(&device);
        let hidden = Tensor::<TestBackend, 3>::random(
            [2, 5, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let (_, weights) = pool.forward(hidden);
        let sums: Vec<f32> = weights.sum_dim(1).into_data().to_vec().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5, "weights should sum to 1, got {s}");
        }
    }

    #[test]
    fn test_constant_tokens_pool_to_themselves() {
        let device = Default::default();
        let pool = AttentionPoolConfig::new(4).init::<TestBackend>(&device);
        let hidden = Tensor::<TestBackend, 3>::ones([1, 6, 4], &device) * 2.5;
        let (pooled, _) = pool.forward(hidden);
        let vals: Vec<f32> = pooled.into_data().to_vec().unwrap();
        for v in vals {
            assert!((v - 2.5).abs() < 1e-5, "constant input should pool unchanged, got {v}");
        }
    }
}
