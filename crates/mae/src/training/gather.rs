//! Cross-replica tensor gathering.
//!
//! Under data-parallel training every worker holds a shard of the batch;
//! the contrastive objectives need the full batch, so shards are
//! concatenated in worker-rank order before the loss. The collective itself
//! is an external collaborator behind [`ReplicaGather`]; the bundled
//! [`SingleProcess`] implementation is the degenerate single-worker case.

use burn::prelude::*;

/// Concatenates per-replica tensors across all parallel workers.
///
/// `sync_grads` selects whether gradients are synchronized back through the
/// gather boundary — on for online branches, off for momentum-target
/// branches, which never receive gradients. The gather is a blocking
/// collective: every worker must call it with the same shapes.
pub trait ReplicaGather<B: Backend> {
    /// Number of participating workers.
    fn world_size(&self) -> usize;

    /// Gather a `(batch, d)` feature shard into `(world_size · batch, d)`,
    /// worker 0's shard first.
    fn gather(&self, local: Tensor<B, 2>, sync_grads: bool) -> Tensor<B, 2>;

    /// Gather a `(batch,)` label shard into `(world_size · batch,)`.
    fn gather_labels(&self, local: Tensor<B, 1, Int>) -> Tensor<B, 1, Int>;
}

/// Single-worker execution: gathering is the identity reshape.
#[derive(Debug, Clone, Default)]
pub struct SingleProcess;

impl<B: Backend> ReplicaGather<B> for SingleProcess {
    fn world_size(&self) -> usize {
        1
    }

    fn gather(&self, local: Tensor<B, 2>, _sync_grads: bool) -> Tensor<B, 2> {
        let [batch, d] = local.dims();
        local.reshape([batch, d])
    }

    fn gather_labels(&self, local: Tensor<B, 1, Int>) -> Tensor<B, 1, Int> {
        let [batch] = local.dims();
        local.reshape([batch])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_single_process_gather_is_identity() {
        let device = Default::default();
        let gather = SingleProcess;
        let local = Tensor::<TestBackend, 2>::random(
            [4, 8],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let gathered = ReplicaGather::<TestBackend>::gather(&gather, local.clone(), true);
        assert_eq!(gathered.dims(), [4, 8]);
        let max_diff: f32 = (gathered - local).abs().max().into_scalar().elem();
        assert_eq!(max_diff, 0.0);
    }

    #[test]
    fn test_single_process_label_gather_is_identity() {
        let device = Default::default();
        let gather = SingleProcess;
        let local = Tensor::<TestBackend, 1, Int>::from_data(
            TensorData::new(vec![3_i64, 1, 4, 1], [4]),
            &device,
        );

        let gathered = ReplicaGather::<TestBackend>::gather_labels(&gather, local);
        let vals: Vec<i64> = gathered.into_data().to_vec().unwrap();
        assert_eq!(vals, vec![3, 1, 4, 1]);
    }
}
