//! Exponential-moving-average target modules.
//!
//! The distillation branch keeps frozen structural clones of the online
//! encoder, pooling head, and projection head, refreshed after every
//! optimizer step with `target ← m·target + (1−m)·online`. Targets live on
//! the non-autodiff inner backend, so no computation graph is ever built
//! over them and they can never receive gradients.

use burn::module::Param;
use burn::nn::{LayerNorm, Linear};
use burn::prelude::*;

use crate::model::block::{SelfAttention, TransformerBlock};
use crate::model::encoder::MaskedEncoder;
use crate::model::heads::ProjectionHead;
use crate::model::pool::AttentionPool;

/// Errors raised while pairing online and target modules.
#[derive(Debug, thiserror::Error)]
pub enum MomentumError {
    /// Online and target module parameter counts differ; an EMA update over
    /// such a pair would silently misalign.
    #[error("parameter count mismatch for {component}: online has {online}, target has {target}")]
    ParamCountMismatch {
        component: &'static str,
        online: usize,
        target: usize,
    },
}

/// A module whose parameters can be blended toward an online counterpart.
///
/// Implementations blend field by field, so parameter pairing is structural
/// rather than dependent on any traversal order.
pub trait EmaModule<B: Backend>: Module<B> + Sized {
    /// Returns `self` with every parameter replaced by
    /// `momentum·self + (1−momentum)·online`.
    fn ema_update(self, online: &Self, momentum: f64) -> Self;
}

fn blend<B: Backend, const D: usize>(
    target: &Param<Tensor<B, D>>,
    online: &Param<Tensor<B, D>>,
    momentum: f64,
) -> Param<Tensor<B, D>> {
    Param::from_tensor(target.val() * momentum + online.val() * (1.0 - momentum))
}

impl<B: Backend> EmaModule<B> for Linear<B> {
    fn ema_update(mut self, online: &Self, momentum: f64) -> Self {
        self.weight = blend(&self.weight, &online.weight, momentum);
        self.bias = match (self.bias, &online.bias) {
            (Some(target), Some(online)) => Some(blend(&target, online, momentum)),
            (target, _) => target,
        };
        self
    }
}

impl<B: Backend> EmaModule<B> for LayerNorm<B> {
    fn ema_update(mut self, online: &Self, momentum: f64) -> Self {
        self.gamma = blend(&self.gamma, &online.gamma, momentum);
        self.beta = blend(&self.beta, &online.beta, momentum);
        self
    }
}

impl<B: Backend> EmaModule<B> for SelfAttention<B> {
    fn ema_update(mut self, online: &Self, momentum: f64) -> Self {
        self.query = self.query.ema_update(&online.query, momentum);
        self.key = self.key.ema_update(&online.key, momentum);
        self.value = self.value.ema_update(&online.value, momentum);
        self.output = self.output.ema_update(&online.output, momentum);
        self
    }
}

impl<B: Backend> EmaModule<B> for TransformerBlock<B> {
    fn ema_update(mut self, online: &Self, momentum: f64) -> Self {
        self.norm1 = self.norm1.ema_update(&online.norm1, momentum);
        self.attn = self.attn.ema_update(&online.attn, momentum);
        self.norm2 = self.norm2.ema_update(&online.norm2, momentum);
        self.ff1 = self.ff1.ema_update(&online.ff1, momentum);
        self.ff2 = self.ff2.ema_update(&online.ff2, momentum);
        self
    }
}

impl<B: Backend> EmaModule<B> for MaskedEncoder<B> {
    fn ema_update(mut self, online: &Self, momentum: f64) -> Self {
        assert_eq!(
            self.blocks.len(),
            online.blocks.len(),
            "online/target encoder depth diverged"
        );
        self.input_proj = self.input_proj.ema_update(&online.input_proj, momentum);
        self.pos_embed = blend(&self.pos_embed, &online.pos_embed, momentum);
        self.blocks = self
            .blocks
            .into_iter()
            .zip(online.blocks.iter())
            .map(|(target, online)| target.ema_update(online, momentum))
            .collect();
        self.norm = self.norm.ema_update(&online.norm, momentum);
        self
    }
}

impl<B: Backend> EmaModule<B> for AttentionPool<B> {
    fn ema_update(mut self, online: &Self, momentum: f64) -> Self {
        self.score = self.score.ema_update(&online.score, momentum);
        self
    }
}

impl<B: Backend> EmaModule<B> for ProjectionHead<B> {
    fn ema_update(mut self, online: &Self, momentum: f64) -> Self {
        self.fc1 = self.fc1.ema_update(&online.fc1, momentum);
        self.norm = self.norm.ema_update(&online.norm, momentum);
        self.fc2 = self.fc2.ema_update(&online.fc2, momentum);
        self
    }
}

/// Frozen EMA clones of the online encoder, pooling head, and projection
/// head.
#[derive(Module, Debug)]
pub struct MomentumTargets<B: Backend> {
    /// Target encoder.
    pub encoder: MaskedEncoder<B>,
    /// Target pooling head.
    pub pool: AttentionPool<B>,
    /// Target projection head.
    pub projector: ProjectionHead<B>,
}

fn check_aligned<B: Backend, M: Module<B>>(
    component: &'static str,
    online: &M,
    target: &M,
) -> Result<(), MomentumError> {
    let (online, target) = (online.num_params(), target.num_params());
    if online != target {
        return Err(MomentumError::ParamCountMismatch {
            component,
            online,
            target,
        });
    }
    Ok(())
}

impl<B: Backend> MomentumTargets<B> {
    /// Pair target modules with their online counterparts, validating that
    /// each pair has an identical parameter count.
    pub fn pair(
        online_encoder: &MaskedEncoder<B>,
        target_encoder: MaskedEncoder<B>,
        online_pool: &AttentionPool<B>,
        target_pool: AttentionPool<B>,
        online_projector: &ProjectionHead<B>,
        target_projector: ProjectionHead<B>,
    ) -> Result<Self, MomentumError> {
        check_aligned("encoder", online_encoder, &target_encoder)?;
        check_aligned("pool", online_pool, &target_pool)?;
        check_aligned("projector", online_projector, &target_projector)?;
        Ok(Self {
            encoder: target_encoder,
            pool: target_pool,
            projector: target_projector,
        })
    }

    /// Blend every target parameter toward its online counterpart.
    pub fn update(
        mut self,
        online_encoder: &MaskedEncoder<B>,
        online_pool: &AttentionPool<B>,
        online_projector: &ProjectionHead<B>,
        momentum: f64,
    ) -> Self {
        self.encoder = self.encoder.ema_update(online_encoder, momentum);
        self.pool = self.pool.ema_update(online_pool, momentum);
        self.projector = self.projector.ema_update(online_projector, momentum);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::encoder::MaskedEncoderConfig;
    use crate::model::heads::ProjectionHeadConfig;
    use crate::model::pool::AttentionPoolConfig;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn parts(
        device: &<TestBackend as Backend>::Device,
    ) -> (
        MaskedEncoder<TestBackend>,
        AttentionPool<TestBackend>,
        ProjectionHead<TestBackend>,
    ) {
        (
            MaskedEncoderConfig::new(4, 8, 6)
                .with_n_layers(1)
                .with_n_heads(2)
                .with_d_ff(16)
                .init(device),
            AttentionPoolConfig::new(8).init(device),
            ProjectionHeadConfig::new(8)
                .with_d_hidden(16)
                .with_d_output(4)
                .init(device),
        )
    }

    #[test]
    fn test_pair_accepts_structural_clones() {
        let device = Default::default();
        let (encoder, pool, projector) = parts(&device);
        let targets = MomentumTargets::pair(
            &encoder,
            encoder.clone(),
            &pool,
            pool.clone(),
            &projector,
            projector.clone(),
        )
        .unwrap();
        assert_eq!(targets.encoder.num_params(), encoder.num_params());
    }

    #[test]
    fn test_pair_rejects_mismatched_shapes() {
        let device = Default::default();
        let (encoder, pool, projector) = parts(&device);
        let wider_projector = ProjectionHeadConfig::new(8)
            .with_d_hidden(32)
            .with_d_output(4)
            .init(&device);

        let err = MomentumTargets::pair(
            &encoder,
            encoder.clone(),
            &pool,
            pool.clone(),
            &projector,
            wider_projector,
        )
        .unwrap_err();
        match err {
            MomentumError::ParamCountMismatch { component, .. } => {
                assert_eq!(component, "projector");
            }
        }
    }

    #[test]
    fn test_ema_is_elementwise_blend() {
        let device = Default::default();
        let momentum = 0.9;

        let online = ProjectionHeadConfig::new(4)
            .with_d_hidden(8)
            .with_d_output(4)
            .init::<TestBackend>(&device);
        let target = ProjectionHeadConfig::new(4)
            .with_d_hidden(8)
            .with_d_output(4)
            .init::<TestBackend>(&device);

        let old: Vec<f32> = target.fc1.weight.val().into_data().to_vec().unwrap();
        let new: Vec<f32> = online.fc1.weight.val().into_data().to_vec().unwrap();

        let updated = target.ema_update(&online, momentum);
        let blended: Vec<f32> = updated.fc1.weight.val().into_data().to_vec().unwrap();

        for ((b, o), n) in blended.iter().zip(&old).zip(&new) {
            let expected = o * momentum as f32 + n * (1.0 - momentum as f32);
            assert!(
                (b - expected).abs() < 1e-6,
                "expected {expected}, got {b}"
            );
        }
    }

    #[test]
    fn test_momentum_one_freezes_target() {
        let device = Default::default();
        let (encoder, pool, projector) = parts(&device);
        let targets = MomentumTargets::pair(
            &encoder,
            encoder.clone(),
            &pool,
            pool.clone(),
            &projector,
            projector.clone(),
        )
        .unwrap();

        let before: Vec<f32> = targets
            .encoder
            .input_proj
            .weight
            .val()
            .into_data()
            .to_vec()
            .unwrap();
        let (other_encoder, other_pool, other_projector) = parts(&device);
        let targets = targets.update(&other_encoder, &other_pool, &other_projector, 1.0);
        let after: Vec<f32> = targets
            .encoder
            .input_proj
            .weight
            .val()
            .into_data()
            .to_vec()
            .unwrap();

        for (b, a) in before.iter().zip(&after) {
            assert!((b - a).abs() < 1e-6);
        }
    }
}
