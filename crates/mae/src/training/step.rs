//! The contrastive BYOL masked-autoencoder training step.
//!
//! One step runs both augmented views through the online model, gathers
//! representations across replicas, composes the self-supervised losses
//! (NT-Xent between views, BYOL-style supervised-contrastive against the
//! momentum targets, masked reconstruction) with the multi-label
//! classification loss, and returns the scalar objective together with a
//! structured metric breakdown. The momentum update runs as a separate hook
//! after each optimizer step.

use burn::module::AutodiffModule;
use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation;
use burn::tensor::backend::AutodiffBackend;

use crate::model::momentum::{MomentumError, MomentumTargets};
use crate::model::online::OnlineModel;
use crate::training::data::MaeBatch;
use crate::training::gather::ReplicaGather;
use crate::training::loss::{masked_recon_loss, GroupedObjective, PairwiseObjective};
use crate::training::metrics::{ranking_metrics, StepMetrics};

/// Errors raised while assembling a [`ContrastByolMae`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Neither contrastive objective was supplied; the model would have no
    /// representation-learning signal.
    #[error("at least one of the self-supervised or supervised-contrastive objectives must be provided")]
    MissingObjective,
    /// The momentum coefficient is outside `[0, 1)`.
    #[error("momentum must be in [0, 1), got {0}")]
    InvalidMomentum(f64),
    /// Online/target pairing failed.
    #[error(transparent)]
    Momentum(#[from] MomentumError),
}

/// Coefficients for the three self-supervised loss terms. The
/// classification loss always enters with weight 1.
#[derive(Debug, Clone, Copy)]
pub struct LossWeights {
    /// Masked reconstruction weight.
    pub recon: f64,
    /// Self-supervised contrastive weight.
    pub ssl: f64,
    /// Supervised-contrastive (BYOL branch) weight.
    pub supcon: f64,
}

/// Hyperparameters of the training step.
#[derive(Config, Debug)]
pub struct ContrastByolMaeConfig {
    /// EMA coefficient for the momentum targets.
    #[config(default = 0.999)]
    pub momentum: f64,
    /// Masked reconstruction weight.
    #[config(default = 1.0)]
    pub weight_recon: f64,
    /// Self-supervised contrastive weight.
    #[config(default = 0.05)]
    pub weight_ssl: f64,
    /// Supervised-contrastive weight.
    #[config(default = 0.0)]
    pub weight_supcon: f64,
    /// Mask ratio for the second view. Independent of the encoder's primary
    /// ratio: the two views may be masked asymmetrically.
    #[config(default = 0.0)]
    pub mask_ratio2: f64,
    /// k for the top-k multi-label accuracy metric.
    #[config(default = 5)]
    pub eval_topk: usize,
}

/// Result of one training step: the scalar optimization objective plus the
/// metric breakdown. Recording the breakdown is the caller's decision.
#[derive(Debug)]
pub struct StepOutput<B: AutodiffBackend> {
    /// Composite loss to backpropagate.
    pub loss: Tensor<B, 1>,
    /// Per-term breakdown and ranking metrics.
    pub metrics: StepMetrics,
}

/// Contrastive BYOL masked autoencoder: the online module bundle, its frozen
/// momentum targets, the loss weights, and the pluggable objectives.
pub struct ContrastByolMae<B: AutodiffBackend> {
    /// Trainable modules. Only this receives optimizer updates.
    pub online: OnlineModel<B>,
    /// Frozen EMA targets on the inner backend.
    pub targets: MomentumTargets<B::InnerBackend>,
    momentum: f64,
    weights: LossWeights,
    mask_ratio2: f64,
    eval_topk: usize,
    ssl: Option<Box<dyn PairwiseObjective<B>>>,
    supcon: Option<Box<dyn GroupedObjective<B>>>,
}

impl ContrastByolMaeConfig {
    /// Assemble the training module, deep-copying the online encoder, pool,
    /// and projector into frozen momentum targets.
    ///
    /// Fails if neither objective is supplied or the momentum coefficient is
    /// out of range — before any forward pass.
    pub fn init<B: AutodiffBackend>(
        &self,
        online: OnlineModel<B>,
        ssl: Option<Box<dyn PairwiseObjective<B>>>,
        supcon: Option<Box<dyn GroupedObjective<B>>>,
    ) -> Result<ContrastByolMae<B>, BuildError> {
        if ssl.is_none() && supcon.is_none() {
            return Err(BuildError::MissingObjective);
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(BuildError::InvalidMomentum(self.momentum));
        }

        let frozen = online.valid();
        let targets = MomentumTargets::pair(
            &frozen.encoder,
            frozen.encoder.clone(),
            &frozen.pool,
            frozen.pool.clone(),
            &frozen.projector,
            frozen.projector.clone(),
        )?;

        Ok(ContrastByolMae {
            online,
            targets,
            momentum: self.momentum,
            weights: LossWeights {
                recon: self.weight_recon,
                ssl: self.weight_ssl,
                supcon: self.weight_supcon,
            },
            mask_ratio2: self.mask_ratio2,
            eval_topk: self.eval_topk,
            ssl,
            supcon,
        })
    }
}

impl<B: AutodiffBackend> ContrastByolMae<B> {
    /// The configured loss weights.
    pub fn weights(&self) -> LossWeights {
        self.weights
    }

    /// The EMA coefficient.
    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    /// Run one training step over a batch.
    ///
    /// Returns the composite scalar loss (for backpropagation) and the
    /// per-term breakdown. Weight-zero or absent objectives short-circuit to
    /// a zero scalar but still appear in the breakdown.
    pub fn training_step<G: ReplicaGather<B>>(
        &self,
        batch: &MaeBatch<B>,
        gather: &G,
    ) -> StepOutput<B> {
        let device = batch.view1.device();
        let zero = || Tensor::<B, 1>::zeros([1], &device);

        let out1 = self
            .online
            .forward(batch.view1.clone(), Some(batch.object_mask.clone()), None);
        let out2 = self
            .online
            .forward(batch.view2.clone(), None, Some(self.mask_ratio2));

        // Self-supervised contrastive loss between the gathered online views.
        let ssl_loss = match &self.ssl {
            Some(ssl) if self.weights.ssl != 0.0 => {
                let feat1 = gather.gather(out1.pooled.clone(), true);
                let feat2 = gather.gather(out2.pooled.clone(), true);
                ssl.forward(feat1, feat2)
            }
            _ => zero(),
        };

        // BYOL branch: online projections against frozen target projections,
        // both directions averaged.
        let byol_loss = match &self.supcon {
            Some(supcon) if self.weights.supcon != 0.0 => {
                let online1 =
                    gather.gather(self.online.projector.forward(out1.pooled.clone()), true);
                let online2 =
                    gather.gather(self.online.projector.forward(out2.pooled.clone()), true);

                // Target passes run on the inner backend: no graph is built.
                // View 1 keeps the primary mask ratio, view 2 uses the
                // second-view ratio, mirroring the online pipeline.
                let target1 = self
                    .targets
                    .encoder
                    .forward(batch.view1.clone().inner(), None, None);
                let target2 = self.targets.encoder.forward(
                    batch.view2.clone().inner(),
                    None,
                    Some(self.mask_ratio2),
                );
                let (target_pool1, _) = self.targets.pool.forward(target1.hidden);
                let (target_pool2, _) = self.targets.pool.forward(target2.hidden);
                let target_proj1 = gather.gather(
                    Tensor::from_inner(self.targets.projector.forward(target_pool1)),
                    false,
                );
                let target_proj2 = gather.gather(
                    Tensor::from_inner(self.targets.projector.forward(target_pool2)),
                    false,
                );

                let labels = gather.gather_labels(batch.groups.clone());
                (supcon.forward(online1, target_proj2, labels.clone())
                    + supcon.forward(online2, target_proj1, labels))
                    / 2.0
            }
            _ => zero(),
        };

        // Masked reconstruction of view 1.
        let recon_loss = if self.weights.recon != 0.0 {
            let decoded = self
                .online
                .decoder
                .decode(out1.last_hidden_state.clone(), out1.ids_restore.clone());
            masked_recon_loss(batch.view1.clone(), decoded.logits, out1.mask.clone())
        } else {
            zero()
        };

        let mae_loss = ssl_loss.clone() * self.weights.ssl
            + byol_loss.clone() * self.weights.supcon
            + recon_loss.clone() * self.weights.recon;

        // Multi-label classification, two-view average.
        let target_labels = batch.targets.clone().int();
        let bce = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&device);
        let cls_loss = (bce.forward(out1.logits.clone(), target_labels.clone())
            + bce.forward(out2.logits.clone(), target_labels.clone()))
            / 2.0;

        let (auprc, topk_accuracy) = ranking_metrics(
            activation::sigmoid(out1.logits.clone()),
            target_labels,
            self.eval_topk,
        );

        let total = mae_loss.clone() + cls_loss.clone();

        let metrics = StepMetrics {
            ssl_loss: scalar(&ssl_loss),
            byol_loss: scalar(&byol_loss),
            recon_loss: scalar(&recon_loss),
            mae_loss: scalar(&mae_loss),
            cls_loss: scalar(&cls_loss),
            total_loss: scalar(&total),
            auprc,
            topk_accuracy,
        };

        StepOutput {
            loss: total,
            metrics,
        }
    }

    /// Momentum-update hook: blend every target parameter toward its online
    /// counterpart. Invoke immediately after the optimizer's gradient reset.
    pub fn momentum_update(&mut self) {
        let frozen = self.online.valid();
        self.targets = self.targets.clone().update(
            &frozen.encoder,
            &frozen.pool,
            &frozen.projector,
            self.momentum,
        );
    }
}

fn scalar<B: Backend>(loss: &Tensor<B, 1>) -> f64 {
    loss.clone().into_scalar().elem()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::online::OnlineModelConfig;
    use crate::training::gather::SingleProcess;
    use crate::training::loss::{NtXent, SupCon};
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;

    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn online_model(
        device: &<TestAutodiffBackend as Backend>::Device,
    ) -> OnlineModel<TestAutodiffBackend> {
        OnlineModelConfig::new(6, 8, 2)
            .with_d_model(16)
            .with_n_layers(1)
            .with_n_heads(2)
            .with_d_ff(32)
            .with_d_decoder(8)
            .with_proj_hidden(32)
            .with_proj_dim(8)
            .with_mask_ratio(0.5)
            .init(device)
    }

    fn batch(device: &<TestAutodiffBackend as Backend>::Device) -> MaeBatch<TestAutodiffBackend> {
        MaeBatch {
            view1: Tensor::random([4, 8, 6], Distribution::Normal(0.0, 1.0), device),
            view2: Tensor::random([4, 8, 6], Distribution::Normal(0.0, 1.0), device),
            groups: Tensor::from_data(TensorData::new(vec![0_i64, 0, 1, 1], [4]), device),
            targets: Tensor::from_data(
                TensorData::new(vec![1.0_f32, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0], [4, 2]),
                device,
            ),
            object_mask: Tensor::ones([4, 8], device),
        }
    }

    #[test]
    fn test_missing_objectives_fail_construction() {
        let device = Default::default();
        let err = ContrastByolMaeConfig::new()
            .init::<TestAutodiffBackend>(online_model(&device), None, None)
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::MissingObjective));
    }

    #[test]
    fn test_invalid_momentum_fails_construction() {
        let device = Default::default();
        let err = ContrastByolMaeConfig::new()
            .with_momentum(1.0)
            .init::<TestAutodiffBackend>(
                online_model(&device),
                Some(Box::new(NtXent::default())),
                None,
            )
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::InvalidMomentum(_)));
    }

    #[test]
    fn test_zero_weights_reduce_to_classification_loss() {
        let device = Default::default();
        let model = ContrastByolMaeConfig::new()
            .with_weight_recon(0.0)
            .with_weight_ssl(0.0)
            .with_weight_supcon(0.0)
            .init::<TestAutodiffBackend>(
                online_model(&device),
                Some(Box::new(NtXent::default())),
                Some(Box::new(SupCon::default())),
            )
            .unwrap();

        let out = model.training_step(&batch(&device), &SingleProcess);
        assert_eq!(out.metrics.ssl_loss, 0.0);
        assert_eq!(out.metrics.byol_loss, 0.0);
        assert_eq!(out.metrics.recon_loss, 0.0);
        assert!(
            (out.metrics.total_loss - out.metrics.cls_loss).abs() < 1e-9,
            "composite {} should equal classification loss {}",
            out.metrics.total_loss,
            out.metrics.cls_loss
        );
    }

    #[test]
    fn test_absent_ssl_objective_degrades_to_zero_term() {
        let device = Default::default();
        let model = ContrastByolMaeConfig::new()
            .with_weight_ssl(1.0)
            .with_weight_supcon(1.0)
            .init::<TestAutodiffBackend>(
                online_model(&device),
                None,
                Some(Box::new(SupCon::default())),
            )
            .unwrap();

        let out = model.training_step(&batch(&device), &SingleProcess);
        assert_eq!(out.metrics.ssl_loss, 0.0);
        assert!(out.metrics.byol_loss > 0.0);
    }

    #[test]
    fn test_momentum_update_moves_targets_toward_online() {
        let device = Default::default();
        let mut model = ContrastByolMaeConfig::new()
            .with_momentum(0.5)
            .init::<TestAutodiffBackend>(
                online_model(&device),
                Some(Box::new(NtXent::default())),
                None,
            )
            .unwrap();

        // Perturb the online encoder so online and target diverge.
        let mut online = model.online.clone();
        online.encoder.input_proj.weight = burn::module::Param::from_tensor(
            (online.encoder.input_proj.weight.val() + 1.0).detach(),
        );
        model.online = online;

        let target_before: Vec<f32> = model
            .targets
            .encoder
            .input_proj
            .weight
            .val()
            .into_data()
            .to_vec()
            .unwrap();
        let online_now: Vec<f32> = model
            .online
            .valid()
            .encoder
            .input_proj
            .weight
            .val()
            .into_data()
            .to_vec()
            .unwrap();

        model.momentum_update();

        let target_after: Vec<f32> = model
            .targets
            .encoder
            .input_proj
            .weight
            .val()
            .into_data()
            .to_vec()
            .unwrap();
        for ((after, before), online) in
            target_after.iter().zip(&target_before).zip(&online_now)
        {
            let expected = before * 0.5 + online * 0.5;
            assert!(
                (after - expected).abs() < 1e-6,
                "expected {expected}, got {after}"
            );
        }
    }
}
