//! Pre-norm transformer blocks shared by the masked encoder and decoder.

use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation;

/// Configuration for a [`TransformerBlock`].
#[derive(Config, Debug)]
pub struct TransformerBlockConfig {
    /// Token embedding dimension. Must be divisible by `n_heads`.
    pub d_model: usize,
    /// Feed-forward hidden dimension.
    pub d_ff: usize,
    /// Number of attention heads.
    #[config(default = 4)]
    pub n_heads: usize,
    /// Dropout applied to attention weights and the feed-forward hidden layer.
    #[config(default = 0.0)]
    pub dropout: f64,
}

/// Multi-head scaled dot-product self-attention.
#[derive(Module, Debug)]
pub struct SelfAttention<B: Backend> {
    /// Query projection: d_model → d_model.
    pub query: Linear<B>,
    /// Key projection: d_model → d_model.
    pub key: Linear<B>,
    /// Value projection: d_model → d_model.
    pub value: Linear<B>,
    /// Output projection: d_model → d_model.
    pub output: Linear<B>,
    n_heads: usize,
    dropout: Dropout,
}

impl<B: Backend> SelfAttention<B> {
    /// Input shape: `(batch, tokens, d_model)`; output shape is identical.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, tokens, d_model] = x.dims();
        let d_head = d_model / self.n_heads;

        let split = |t: Tensor<B, 3>| {
            t.reshape([batch, tokens, self.n_heads, d_head])
                .swap_dims(1, 2)
        };
        let q = split(self.query.forward(x.clone()));
        let k = split(self.key.forward(x.clone()));
        let v = split(self.value.forward(x));

        // (batch, heads, tokens, tokens)
        let scores = q.matmul(k.transpose()) / (d_head as f64).sqrt();
        let weights = self.dropout.forward(activation::softmax(scores, 3));

        let context = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, tokens, d_model]);
        self.output.forward(context)
    }
}

/// Pre-norm transformer block: attention and feed-forward, each behind a
/// residual connection.
#[derive(Module, Debug)]
pub struct TransformerBlock<B: Backend> {
    /// Norm before attention.
    pub norm1: LayerNorm<B>,
    /// Self-attention sublayer.
    pub attn: SelfAttention<B>,
    /// Norm before the feed-forward sublayer.
    pub norm2: LayerNorm<B>,
    /// Feed-forward expansion: d_model → d_ff.
    pub ff1: Linear<B>,
    /// Feed-forward contraction: d_ff → d_model.
    pub ff2: Linear<B>,
    dropout: Dropout,
}

impl TransformerBlockConfig {
    /// Initialize a [`TransformerBlock`].
    ///
    /// # Panics
    /// Panics if `d_model` is not divisible by `n_heads`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransformerBlock<B> {
        assert!(
            self.d_model % self.n_heads == 0,
            "d_model {} must be divisible by n_heads {}",
            self.d_model,
            self.n_heads
        );
        let linear = |d_in, d_out| LinearConfig::new(d_in, d_out).init(device);
        TransformerBlock {
            norm1: LayerNormConfig::new(self.d_model).init(device),
            attn: SelfAttention {
                query: linear(self.d_model, self.d_model),
                key: linear(self.d_model, self.d_model),
                value: linear(self.d_model, self.d_model),
                output: linear(self.d_model, self.d_model),
                n_heads: self.n_heads,
                dropout: DropoutConfig::new(self.dropout).init(),
            },
            norm2: LayerNormConfig::new(self.d_model).init(device),
            ff1: linear(self.d_model, self.d_ff),
            ff2: linear(self.d_ff, self.d_model),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

impl<B: Backend> TransformerBlock<B> {
    /// Input shape: `(batch, tokens, d_model)`; output shape is identical.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.norm1.forward(x));
        let ff = self
            .ff2
            .forward(self.dropout.forward(activation::gelu(self.ff1.forward(self.norm2.forward(x.clone())))));
        x + ff
    }
}
