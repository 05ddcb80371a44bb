//! Batch types and the two-view augmentation sampler.
//!
//! The sampler owns a set of labeled sequences and produces batches with two
//! independently augmented views per example (uniform jitter + feature
//! dropout), host-side. Conversion to device tensors happens per batch.

use burn::prelude::*;
use rand::Rng;

/// One labeled sequence in the training pool.
#[derive(Debug, Clone)]
pub struct SequenceExample {
    /// Token features, row-major `(seq_len, d_input)`.
    pub features: Vec<f32>,
    /// Group/identity label used by the supervised-contrastive objective.
    pub group: i64,
    /// Multi-label target vector, length `num_classes`, values in {0, 1}.
    pub targets: Vec<f32>,
    /// Number of leading in-object tokens; the rest are padding/background.
    pub object_len: usize,
}

/// A host-side batch before tensor conversion.
#[derive(Debug, Clone)]
pub struct HostBatch {
    /// View-1 features, `(batch, seq_len, d_input)` row-major.
    pub view1: Vec<f32>,
    /// View-2 features, same layout.
    pub view2: Vec<f32>,
    /// Group labels, length `batch`.
    pub groups: Vec<i64>,
    /// Multi-label targets, `(batch, num_classes)` row-major.
    pub targets: Vec<f32>,
    /// Object masks, `(batch, seq_len)` row-major.
    pub object_mask: Vec<f32>,
    /// Batch size.
    pub batch: usize,
    /// Sequence length.
    pub seq_len: usize,
    /// Feature dimension.
    pub d_input: usize,
    /// Number of classes.
    pub num_classes: usize,
}

/// A device-resident training batch.
#[derive(Debug, Clone)]
pub struct MaeBatch<B: Backend> {
    /// First augmented view, `(batch, seq_len, d_input)`.
    pub view1: Tensor<B, 3>,
    /// Second augmented view, `(batch, seq_len, d_input)`.
    pub view2: Tensor<B, 3>,
    /// Group labels, `(batch,)`.
    pub groups: Tensor<B, 1, Int>,
    /// Multi-label targets, `(batch, num_classes)`.
    pub targets: Tensor<B, 2>,
    /// Object mask, `(batch, seq_len)`, 1 = in-object.
    pub object_mask: Tensor<B, 2>,
}

impl HostBatch {
    /// Move the batch onto a device.
    pub fn to_device<B: Backend>(&self, device: &B::Device) -> MaeBatch<B> {
        let shape3 = [self.batch, self.seq_len, self.d_input];
        MaeBatch {
            view1: Tensor::from_data(TensorData::new(self.view1.clone(), shape3), device),
            view2: Tensor::from_data(TensorData::new(self.view2.clone(), shape3), device),
            groups: Tensor::from_data(
                TensorData::new(self.groups.clone(), [self.batch]),
                device,
            ),
            targets: Tensor::from_data(
                TensorData::new(self.targets.clone(), [self.batch, self.num_classes]),
                device,
            ),
            object_mask: Tensor::from_data(
                TensorData::new(self.object_mask.clone(), [self.batch, self.seq_len]),
                device,
            ),
        }
    }
}

/// Samples two-view batches from a pool of labeled sequences.
#[derive(Debug, Clone)]
pub struct TwoViewSampler {
    examples: Vec<SequenceExample>,
    seq_len: usize,
    d_input: usize,
    num_classes: usize,
    jitter: f32,
    feature_dropout: f64,
}

impl TwoViewSampler {
    /// Build a sampler, validating that every example matches the declared
    /// shapes.
    pub fn new(
        examples: Vec<SequenceExample>,
        seq_len: usize,
        d_input: usize,
        num_classes: usize,
        jitter: f32,
        feature_dropout: f64,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!examples.is_empty(), "sampler needs at least one example");
        anyhow::ensure!(
            (0.0..1.0).contains(&feature_dropout),
            "feature_dropout must be in [0, 1), got {feature_dropout}"
        );
        for (i, example) in examples.iter().enumerate() {
            anyhow::ensure!(
                example.features.len() == seq_len * d_input,
                "example {i} has {} feature values, expected {}",
                example.features.len(),
                seq_len * d_input
            );
            anyhow::ensure!(
                example.targets.len() == num_classes,
                "example {i} has {} targets, expected {num_classes}",
                example.targets.len()
            );
            anyhow::ensure!(
                example.object_len <= seq_len,
                "example {i} object_len {} exceeds seq_len {seq_len}",
                example.object_len
            );
        }
        Ok(Self {
            examples,
            seq_len,
            d_input,
            num_classes,
            jitter,
            feature_dropout,
        })
    }

    /// Number of examples in the pool.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Whether the pool is empty. Always false for a constructed sampler.
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    fn augment<R: Rng>(&self, features: &[f32], rng: &mut R) -> Vec<f32> {
        features
            .iter()
            .map(|&v| {
                if rng.gen::<f64>() < self.feature_dropout {
                    0.0
                } else {
                    v + (rng.gen::<f32>() * 2.0 - 1.0) * self.jitter
                }
            })
            .collect()
    }

    /// Draw a batch of examples with replacement and augment each twice.
    pub fn sample_batch<R: Rng>(&self, batch_size: usize, rng: &mut R) -> HostBatch {
        let mut view1 = Vec::with_capacity(batch_size * self.seq_len * self.d_input);
        let mut view2 = Vec::with_capacity(batch_size * self.seq_len * self.d_input);
        let mut groups = Vec::with_capacity(batch_size);
        let mut targets = Vec::with_capacity(batch_size * self.num_classes);
        let mut object_mask = Vec::with_capacity(batch_size * self.seq_len);

        for _ in 0..batch_size {
            let example = &self.examples[rng.gen_range(0..self.examples.len())];
            view1.extend(self.augment(&example.features, rng));
            view2.extend(self.augment(&example.features, rng));
            groups.push(example.group);
            targets.extend_from_slice(&example.targets);
            object_mask.extend(
                (0..self.seq_len).map(|t| if t < example.object_len { 1.0 } else { 0.0 }),
            );
        }

        HostBatch {
            view1,
            view2,
            groups,
            targets,
            object_mask,
            batch: batch_size,
            seq_len: self.seq_len,
            d_input: self.d_input,
            num_classes: self.num_classes,
        }
    }
}
