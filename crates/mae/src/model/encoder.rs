//! Masked sequence encoder.
//!
//! Projects input tokens into the model dimension, adds a learned positional
//! embedding, hides a random subset of tokens (noise-shuffle masking), and
//! encodes the visible tokens with pre-norm transformer blocks. The hidden
//! subset is described by a reconstruction mask and a restore-index
//! permutation that the decoder uses to unshuffle.

use burn::module::Param;
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::Distribution;

use crate::model::block::{TransformerBlock, TransformerBlockConfig};

/// Configuration for the masked encoder.
#[derive(Config, Debug)]
pub struct MaskedEncoderConfig {
    /// Input feature dimension per token.
    pub d_input: usize,
    /// Model (embedding) dimension.
    pub d_model: usize,
    /// Maximum sequence length supported by the positional embedding.
    pub max_len: usize,
    /// Number of transformer blocks.
    #[config(default = 2)]
    pub n_layers: usize,
    /// Attention heads per block.
    #[config(default = 4)]
    pub n_heads: usize,
    /// Feed-forward hidden dimension.
    #[config(default = 256)]
    pub d_ff: usize,
    /// Default fraction of tokens hidden per forward pass.
    #[config(default = 0.75)]
    pub mask_ratio: f64,
    /// Dropout inside the transformer blocks.
    #[config(default = 0.0)]
    pub dropout: f64,
}

/// Result of one masked forward pass.
///
/// `hidden` covers only the visible tokens; `ids_restore` is the inverse of
/// the shuffle permutation; `mask` marks, per original position, whether the
/// token was hidden and should participate in reconstruction (1 = hidden).
#[derive(Debug, Clone)]
pub struct MaskedSequence<B: Backend> {
    /// Encoded visible tokens, shape `(batch, len_keep, d_model)`.
    pub hidden: Tensor<B, 3>,
    /// Restore indices, shape `(batch, seq_len)`.
    pub ids_restore: Tensor<B, 2, Int>,
    /// Reconstruction mask, shape `(batch, seq_len)`.
    pub mask: Tensor<B, 2>,
}

/// Masked sequence encoder.
#[derive(Module, Debug)]
pub struct MaskedEncoder<B: Backend> {
    /// Token projection: d_input → d_model.
    pub input_proj: Linear<B>,
    /// Learned positional embedding, shape `(max_len, d_model)`.
    pub pos_embed: Param<Tensor<B, 2>>,
    /// Transformer blocks over the visible tokens.
    pub blocks: Vec<TransformerBlock<B>>,
    /// Final norm.
    pub norm: LayerNorm<B>,
    mask_ratio: f64,
}

impl MaskedEncoderConfig {
    /// Initialize a [`MaskedEncoder`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> MaskedEncoder<B> {
        let pos_embed = Tensor::random(
            [self.max_len, self.d_model],
            Distribution::Normal(0.0, 0.02),
            device,
        );
        MaskedEncoder {
            input_proj: LinearConfig::new(self.d_input, self.d_model).init(device),
            pos_embed: Param::from_tensor(pos_embed),
            blocks: (0..self.n_layers)
                .map(|_| {
                    TransformerBlockConfig::new(self.d_model, self.d_ff)
                        .with_n_heads(self.n_heads)
                        .with_dropout(self.dropout)
                        .init(device)
                })
                .collect(),
            norm: LayerNormConfig::new(self.d_model).init(device),
            mask_ratio: self.mask_ratio,
        }
    }
}

impl<B: Backend> MaskedEncoder<B> {
    /// Encode two-view inputs with random masking.
    ///
    /// `object_mask` (shape `(batch, seq_len)`, 1 = in-object) biases the
    /// shuffle so out-of-object tokens are hidden first and removes them from
    /// the reconstruction mask. `mask_ratio` overrides the configured default
    /// for this call.
    ///
    /// Input shape: `(batch, seq_len, d_input)` with `seq_len <= max_len`.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        object_mask: Option<Tensor<B, 2>>,
        mask_ratio: Option<f64>,
    ) -> MaskedSequence<B> {
        let ratio = mask_ratio.unwrap_or(self.mask_ratio);
        let [_, seq_len, _] = x.dims();
        let [max_len, _] = self.pos_embed.val().dims();
        assert!(
            seq_len <= max_len,
            "sequence length {seq_len} exceeds positional embedding capacity {max_len}"
        );

        let h = self.input_proj.forward(x);
        let pos = self
            .pos_embed
            .val()
            .slice([0..seq_len])
            .unsqueeze_dim::<3>(0);
        let h = h + pos;

        let masked = random_masking(h, ratio, object_mask);

        let mut hidden = masked.kept;
        for block in &self.blocks {
            hidden = block.forward(hidden);
        }
        let hidden = self.norm.forward(hidden);

        MaskedSequence {
            hidden,
            ids_restore: masked.ids_restore,
            mask: masked.mask,
        }
    }
}

struct MaskingOutcome<B: Backend> {
    kept: Tensor<B, 3>,
    ids_restore: Tensor<B, 2, Int>,
    mask: Tensor<B, 2>,
}

/// Noise-shuffle masking: per example, sample uniform noise per token, sort,
/// keep the `len_keep` lowest-noise tokens. Out-of-object tokens (object mask
/// 0) receive a +1 noise offset so they sort last and are hidden first; they
/// are also excluded from the reconstruction mask.
fn random_masking<B: Backend>(
    x: Tensor<B, 3>,
    mask_ratio: f64,
    object_mask: Option<Tensor<B, 2>>,
) -> MaskingOutcome<B> {
    let [batch, seq_len, d_model] = x.dims();
    let device = x.device();
    let len_keep = ((seq_len as f64) * (1.0 - mask_ratio)) as usize;
    let len_keep = len_keep.clamp(1, seq_len);

    let mut noise =
        Tensor::<B, 2>::random([batch, seq_len], Distribution::Uniform(0.0, 1.0), &device);
    if let Some(object) = &object_mask {
        noise = noise + (object.clone().neg() + 1.0);
    }

    // Ascending sort: lowest noise is kept, highest is hidden.
    let ids_shuffle = noise.argsort(1);
    let ids_restore = ids_shuffle.clone().argsort(1);

    let ids_keep = ids_shuffle.slice([0..batch, 0..len_keep]);
    let kept = x.gather(
        1,
        ids_keep
            .unsqueeze_dim::<3>(2)
            .expand([batch, len_keep, d_model]),
    );

    // Shuffled-order mask (0 = kept, 1 = hidden), unshuffled back to the
    // original token order via the restore permutation.
    let ranks = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
        .float()
        .reshape([1, seq_len])
        .expand([batch, seq_len]);
    let mask_shuffled = ranks.greater_equal_elem(len_keep as f32).float();
    let mut mask = mask_shuffled.gather(1, ids_restore.clone());
    if let Some(object) = object_mask {
        mask = mask * object;
    }

    MaskingOutcome {
        kept,
        ids_restore,
        mask,
    }
}
