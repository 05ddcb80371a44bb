//! Contrastive objectives and the masked reconstruction loss.
//!
//! The two contrastive objectives are pluggable: anything producing a scalar
//! from two (or, with group labels, three) tensor arguments satisfies the
//! trait. The defaults are NT-Xent for the self-supervised branch and a
//! supervised-contrastive loss for the distillation branch.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation;

/// Scalar objective over two paired representation batches.
pub trait PairwiseObjective<B: Backend> {
    /// `z1` and `z2` have shape `(n, d)` and are index-aligned views of the
    /// same examples. Returns a scalar loss tensor of shape `(1,)`.
    fn forward(&self, z1: Tensor<B, 2>, z2: Tensor<B, 2>) -> Tensor<B, 1>;
}

/// Scalar objective over two representation batches plus group labels.
pub trait GroupedObjective<B: Backend> {
    /// `anchors` and `contrast` have shape `(n, d)`; `groups` has shape
    /// `(n,)` and assigns each example an identity used to decide positives.
    /// Returns a scalar loss tensor of shape `(1,)`.
    fn forward(
        &self,
        anchors: Tensor<B, 2>,
        contrast: Tensor<B, 2>,
        groups: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1>;
}

fn l2_normalize<B: Backend>(z: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = z.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
    z / norm
}

/// Symmetric NT-Xent contrastive loss over two views.
///
/// Each example's other view is the positive; the remaining `2n − 2`
/// representations in the doubled batch are negatives.
#[derive(Debug, Clone)]
pub struct NtXent {
    /// Softmax temperature.
    pub temperature: f64,
}

impl Default for NtXent {
    fn default() -> Self {
        Self { temperature: 0.1 }
    }
}

impl<B: Backend> PairwiseObjective<B> for NtXent {
    fn forward(&self, z1: Tensor<B, 2>, z2: Tensor<B, 2>) -> Tensor<B, 1> {
        let [n, _] = z1.dims();
        let device = z1.device();
        let doubled = 2 * n;

        let z = Tensor::cat(vec![l2_normalize(z1), l2_normalize(z2)], 0);
        let sim = z.clone().matmul(z.transpose()) / self.temperature;

        // Exclude self-similarity from the denominator.
        let mut diag = vec![0.0_f32; doubled * doubled];
        for i in 0..doubled {
            diag[i * doubled + i] = -1e9;
        }
        let logits = sim
            + Tensor::<B, 2>::from_data(TensorData::new(diag, [doubled, doubled]), &device);

        let labels: Vec<i64> = (0..doubled)
            .map(|i| if i < n { (i + n) as i64 } else { (i - n) as i64 })
            .collect();
        let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [doubled]), &device);

        CrossEntropyLossConfig::new()
            .init(&device)
            .forward(logits, labels)
    }
}

/// Supervised-contrastive loss with cross-view anchors.
///
/// For each anchor, positives are the contrast-side examples sharing its
/// group label (the anchor's own example always qualifies); the loss is the
/// negative mean log-probability of the positives under a softmax over the
/// full contrast batch.
#[derive(Debug, Clone)]
pub struct SupCon {
    /// Softmax temperature.
    pub temperature: f64,
}

impl Default for SupCon {
    fn default() -> Self {
        Self { temperature: 0.1 }
    }
}

impl<B: Backend> GroupedObjective<B> for SupCon {
    fn forward(
        &self,
        anchors: Tensor<B, 2>,
        contrast: Tensor<B, 2>,
        groups: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let [n, _] = anchors.dims();
        let device = anchors.device();

        let logits = l2_normalize(anchors)
            .matmul(l2_normalize(contrast).transpose())
            / self.temperature;
        let log_prob = activation::log_softmax(logits, 1);

        let labels: Vec<i64> = groups
            .into_data()
            .convert::<i64>()
            .to_vec()
            .expect("group labels should be contiguous integers");
        let mut positives = vec![0.0_f32; n * n];
        for i in 0..n {
            for j in 0..n {
                if labels[i] == labels[j] {
                    positives[i * n + j] = 1.0;
                }
            }
        }
        let positives =
            Tensor::<B, 2>::from_data(TensorData::new(positives, [n, n]), &device);

        let pos_count = positives.clone().sum_dim(1).clamp_min(1.0);
        let mean_pos_log_prob = (log_prob * positives).sum_dim(1) / pos_count;
        mean_pos_log_prob.neg().mean()
    }
}

/// Mean squared reconstruction error over the masked positions only.
///
/// `input` and `pred` have shape `(batch, seq_len, d)`; `mask` has shape
/// `(batch, seq_len)` with 1 marking positions to reconstruct. Returns 0
/// when the mask is empty.
pub fn masked_recon_loss<B: Backend>(
    input: Tensor<B, 3>,
    pred: Tensor<B, 3>,
    mask: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let per_token: Tensor<B, 2> = (pred - input).powf_scalar(2.0).mean_dim(2).squeeze::<2>(2);
    let total = (per_token * mask.clone()).sum();
    let count = mask.sum().clamp_min(1.0);
    total / count
}
