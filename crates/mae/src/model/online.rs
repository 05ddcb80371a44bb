//! Online model bundle: the trainable encoder/decoder, pooling head,
//! classifier, and projection head, with the composite forward pass that
//! produces an [`EncoderOutput`].

use burn::prelude::*;

use crate::model::decoder::{MaskedDecoder, MaskedDecoderConfig};
use crate::model::encoder::{MaskedEncoder, MaskedEncoderConfig};
use crate::model::heads::{
    ClassifierHead, ClassifierHeadConfig, ProjectionHead, ProjectionHeadConfig,
};
use crate::model::pool::{AttentionPool, AttentionPoolConfig};

/// Result of one online forward pass, owned by the caller until consumed by
/// the downstream losses.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// Pooled representation, shape `(batch, d_model)`.
    pub pooled: Tensor<B, 2>,
    /// Visible-token hidden states, shape `(batch, len_keep, d_model)`.
    pub last_hidden_state: Tensor<B, 3>,
    /// Multi-label classification logits, shape `(batch, num_classes)`.
    pub logits: Tensor<B, 2>,
    /// Restore indices for the decoder, shape `(batch, seq_len)`.
    pub ids_restore: Tensor<B, 2, Int>,
    /// Reconstruction mask, shape `(batch, seq_len)`.
    pub mask: Tensor<B, 2>,
}

/// Configuration for the [`OnlineModel`].
#[derive(Config, Debug)]
pub struct OnlineModelConfig {
    /// Input feature dimension per token.
    pub d_input: usize,
    /// Maximum sequence length.
    pub max_len: usize,
    /// Number of multi-label classes.
    pub num_classes: usize,
    /// Encoder model dimension.
    #[config(default = 64)]
    pub d_model: usize,
    /// Encoder depth.
    #[config(default = 2)]
    pub n_layers: usize,
    /// Attention heads.
    #[config(default = 4)]
    pub n_heads: usize,
    /// Encoder feed-forward dimension.
    #[config(default = 256)]
    pub d_ff: usize,
    /// Decoder embedding dimension.
    #[config(default = 32)]
    pub d_decoder: usize,
    /// Decoder depth.
    #[config(default = 1)]
    pub dec_layers: usize,
    /// Projection head hidden dimension.
    #[config(default = 2048)]
    pub proj_hidden: usize,
    /// Projection head output dimension.
    #[config(default = 128)]
    pub proj_dim: usize,
    /// Default fraction of tokens hidden per forward pass.
    #[config(default = 0.75)]
    pub mask_ratio: f64,
    /// Dropout inside the transformer blocks.
    #[config(default = 0.0)]
    pub dropout: f64,
}

/// The trainable module bundle. Everything in here receives gradients; the
/// frozen momentum clones live in
/// [`MomentumTargets`](crate::model::momentum::MomentumTargets).
#[derive(Module, Debug)]
pub struct OnlineModel<B: Backend> {
    /// Masked encoder.
    pub encoder: MaskedEncoder<B>,
    /// Masked decoder (reconstruction branch).
    pub decoder: MaskedDecoder<B>,
    /// Pooling head.
    pub pool: AttentionPool<B>,
    /// Multi-label classifier.
    pub classifier: ClassifierHead<B>,
    /// Contrastive projection head.
    pub projector: ProjectionHead<B>,
}

impl OnlineModelConfig {
    /// Initialize an [`OnlineModel`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> OnlineModel<B> {
        OnlineModel {
            encoder: MaskedEncoderConfig::new(self.d_input, self.d_model, self.max_len)
                .with_n_layers(self.n_layers)
                .with_n_heads(self.n_heads)
                .with_d_ff(self.d_ff)
                .with_mask_ratio(self.mask_ratio)
                .with_dropout(self.dropout)
                .init(device),
            decoder: MaskedDecoderConfig::new(
                self.d_model,
                self.d_decoder,
                self.d_input,
                self.max_len,
            )
            .with_n_layers(self.dec_layers)
            .with_n_heads(self.n_heads)
            .with_dropout(self.dropout)
            .init(device),
            pool: AttentionPoolConfig::new(self.d_model).init(device),
            classifier: ClassifierHeadConfig::new(self.d_model, self.num_classes).init(device),
            projector: ProjectionHeadConfig::new(self.d_model)
                .with_d_hidden(self.proj_hidden)
                .with_d_output(self.proj_dim)
                .init(device),
        }
    }
}

impl<B: Backend> OnlineModel<B> {
    /// Full online forward: masked encode, pool, classify.
    ///
    /// Input shape: `(batch, seq_len, d_input)`.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        object_mask: Option<Tensor<B, 2>>,
        mask_ratio: Option<f64>,
    ) -> EncoderOutput<B> {
        let encoded = self.encoder.forward(x, object_mask, mask_ratio);
        let (pooled, _) = self.pool.forward(encoded.hidden.clone());
        let logits = self.classifier.forward(pooled.clone());
        EncoderOutput {
            pooled,
            last_hidden_state: encoded.hidden,
            logits,
            ids_restore: encoded.ids_restore,
            mask: encoded.mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_composite_forward_shapes() {
        let device = Default::default();
        let model = OnlineModelConfig::new(6, 8, 3)
            .with_d_model(16)
            .with_n_layers(1)
            .with_n_heads(2)
            .with_d_ff(32)
            .with_d_decoder(8)
            .with_proj_hidden(32)
            .with_proj_dim(8)
            .init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 3>::random(
            [4, 8, 6],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let out = model.forward(input, None, Some(0.5));
        assert_eq!(out.pooled.dims(), [4, 16]);
        assert_eq!(out.last_hidden_state.dims(), [4, 4, 16]);
        assert_eq!(out.logits.dims(), [4, 3]);
        assert_eq!(out.ids_restore.dims(), [4, 8]);
        assert_eq!(out.mask.dims(), [4, 8]);
    }
}
