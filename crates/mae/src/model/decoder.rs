//! Masked sequence decoder.
//!
//! Re-inserts a learnable mask token at the hidden positions, unshuffles the
//! sequence back to its original order with the encoder's restore indices,
//! and maps the tokens back to input space.

use burn::module::Param;
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::Distribution;

use crate::model::block::{TransformerBlock, TransformerBlockConfig};

/// Configuration for the masked decoder.
#[derive(Config, Debug)]
pub struct MaskedDecoderConfig {
    /// Encoder model dimension (decoder input).
    pub d_model: usize,
    /// Decoder embedding dimension.
    pub d_decoder: usize,
    /// Output feature dimension per token (input space).
    pub d_output: usize,
    /// Maximum sequence length supported by the positional embedding.
    pub max_len: usize,
    /// Number of transformer blocks.
    #[config(default = 1)]
    pub n_layers: usize,
    /// Attention heads per block.
    #[config(default = 4)]
    pub n_heads: usize,
    /// Feed-forward hidden dimension.
    #[config(default = 128)]
    pub d_ff: usize,
    /// Dropout inside the transformer blocks.
    #[config(default = 0.0)]
    pub dropout: f64,
}

/// Decoded reconstruction over the full sequence.
#[derive(Debug, Clone)]
pub struct DecodedSequence<B: Backend> {
    /// Reconstruction logits, shape `(batch, seq_len, d_output)`.
    pub logits: Tensor<B, 3>,
}

/// Masked sequence decoder.
#[derive(Module, Debug)]
pub struct MaskedDecoder<B: Backend> {
    /// Projection from encoder space: d_model → d_decoder.
    pub embed: Linear<B>,
    /// Learnable token substituted at hidden positions, shape `(d_decoder,)`.
    pub mask_token: Param<Tensor<B, 1>>,
    /// Learned positional embedding, shape `(max_len, d_decoder)`.
    pub pos_embed: Param<Tensor<B, 2>>,
    /// Transformer blocks over the full restored sequence.
    pub blocks: Vec<TransformerBlock<B>>,
    /// Final norm.
    pub norm: LayerNorm<B>,
    /// Output head: d_decoder → d_output.
    pub head: Linear<B>,
}

impl MaskedDecoderConfig {
    /// Initialize a [`MaskedDecoder`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> MaskedDecoder<B> {
        MaskedDecoder {
            embed: LinearConfig::new(self.d_model, self.d_decoder).init(device),
            mask_token: Param::from_tensor(Tensor::random(
                [self.d_decoder],
                Distribution::Normal(0.0, 0.02),
                device,
            )),
            pos_embed: Param::from_tensor(Tensor::random(
                [self.max_len, self.d_decoder],
                Distribution::Normal(0.0, 0.02),
                device,
            )),
            blocks: (0..self.n_layers)
                .map(|_| {
                    TransformerBlockConfig::new(self.d_decoder, self.d_ff)
                        .with_n_heads(self.n_heads)
                        .with_dropout(self.dropout)
                        .init(device)
                })
                .collect(),
            norm: LayerNormConfig::new(self.d_decoder).init(device),
            head: LinearConfig::new(self.d_decoder, self.d_output).init(device),
        }
    }
}

impl<B: Backend> MaskedDecoder<B> {
    /// Decode visible-token hidden states back to input space.
    ///
    /// `hidden` shape: `(batch, len_keep, d_model)`; `ids_restore` shape:
    /// `(batch, seq_len)`. Output covers every original position.
    pub fn decode(
        &self,
        hidden: Tensor<B, 3>,
        ids_restore: Tensor<B, 2, Int>,
    ) -> DecodedSequence<B> {
        let [batch, len_keep, _] = hidden.dims();
        let [_, seq_len] = ids_restore.dims();
        let d_decoder = self.mask_token.val().dims()[0];

        let x = self.embed.forward(hidden);

        let n_hidden = seq_len - len_keep;
        let full = if n_hidden == 0 {
            x
        } else {
            let mask_tokens = self
                .mask_token
                .val()
                .reshape([1, 1, d_decoder])
                .expand([batch, n_hidden, d_decoder]);
            Tensor::cat(vec![x, mask_tokens], 1)
        };

        // Unshuffle back to the original token order.
        let restored = full.gather(
            1,
            ids_restore
                .unsqueeze_dim::<3>(2)
                .expand([batch, seq_len, d_decoder]),
        );

        let pos = self
            .pos_embed
            .val()
            .slice([0..seq_len])
            .unsqueeze_dim::<3>(0);
        let mut x = restored + pos;
        for block in &self.blocks {
            x = block.forward(x);
        }
        let logits = self.head.forward(self.norm.forward(x));

        DecodedSequence { logits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::encoder::MaskedEncoderConfig;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_decode_restores_full_sequence() {
        let device = Default::default();
        let encoder = MaskedEncoderConfig::new(6, 16, 8)
            .with_n_layers(1)
            .with_n_heads(2)
            .init::<TestBackend>(&device);
        let decoder = MaskedDecoderConfig::new(16, 12, 6, 8)
            .with_n_heads(2)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 3>::random(
            [2, 8, 6],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let encoded = encoder.forward(input, None, Some(0.5));
        let decoded = decoder.decode(encoded.hidden, encoded.ids_restore);
        assert_eq!(decoded.logits.dims(), [2, 8, 6]);
    }

    #[test]
    fn test_decode_without_hidden_tokens() {
        let device = Default::default();
        let encoder = MaskedEncoderConfig::new(6, 16, 8)
            .with_n_layers(1)
            .with_n_heads(2)
            .init::<TestBackend>(&device);
        let decoder = MaskedDecoderConfig::new(16, 12, 6, 8)
            .with_n_heads(2)
            .init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 3>::random(
            [1, 8, 6],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let encoded = encoder.forward(input, None, Some(0.0));
        let decoded = decoder.decode(encoded.hidden, encoded.ids_restore);
        assert_eq!(decoded.logits.dims(), [1, 8, 6]);
    }
}
