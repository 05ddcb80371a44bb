//! Training loop: AdamW on the online model, warmup + cosine LR schedule,
//! the post-step momentum update, interval logging, and checkpointing.

use std::path::Path;
use std::time::Instant;

use burn::grad_clipping::GradientClippingConfig;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;

use crate::model::online::OnlineModel;
use crate::training::data::TwoViewSampler;
use crate::training::gather::SingleProcess;
use crate::training::metrics::{MetricsHistory, StepMetrics};
use crate::training::step::ContrastByolMae;

/// Metadata saved alongside each checkpoint for resuming training.
#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct CheckpointMeta {
    pub step: usize,
}

/// Configuration for the training loop.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Base learning rate for AdamW.
    #[config(default = 3e-4)]
    pub lr: f64,
    /// Weight decay for AdamW, applied uniformly to all parameters.
    #[config(default = 0.01)]
    pub weight_decay: f64,
    /// AdamW beta 1.
    #[config(default = 0.9)]
    pub beta_1: f64,
    /// AdamW beta 2.
    #[config(default = 0.999)]
    pub beta_2: f64,
    /// Maximum gradient norm for clipping.
    #[config(default = 1.0)]
    pub max_grad_norm: f64,
    /// Total number of training steps.
    #[config(default = 10_000)]
    pub total_steps: usize,
    /// Number of linear warmup steps.
    #[config(default = 500)]
    pub warmup_steps: usize,
    /// Examples per batch.
    #[config(default = 32)]
    pub batch_size: usize,
    /// Steps between metric logging.
    #[config(default = 100)]
    pub log_interval: usize,
    /// Steps between checkpoint saves.
    #[config(default = 1_000)]
    pub checkpoint_interval: usize,
    /// Directory for saving checkpoints.
    #[config(default = "String::from(\"checkpoints/mae\")")]
    pub checkpoint_dir: String,
}

/// Compute the learning rate at a given step using warmup + cosine decay.
///
/// - Warmup phase (`step < warmup_steps`): linearly ramps from 0 to `base_lr`.
/// - Cosine phase: decays from `base_lr` to 0 following a cosine schedule.
pub fn lr_schedule(base_lr: f64, warmup_steps: usize, total_steps: usize, step: usize) -> f64 {
    if warmup_steps > 0 && step < warmup_steps {
        base_lr * (step + 1) as f64 / warmup_steps as f64
    } else {
        let decay_steps = total_steps.saturating_sub(warmup_steps).max(1);
        let progress = (step.saturating_sub(warmup_steps)) as f64 / decay_steps as f64;
        let progress = progress.min(1.0);
        base_lr * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos())
    }
}

/// Build the AdamW optimizer for the online model from the loop config.
pub fn configure_optimizer<B: AutodiffBackend>(
    config: &TrainingConfig,
) -> impl Optimizer<OnlineModel<B>, B> {
    AdamWConfig::new()
        .with_beta_1(config.beta_1 as f32)
        .with_beta_2(config.beta_2 as f32)
        .with_weight_decay(config.weight_decay as f32)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(
            config.max_grad_norm as f32,
        )))
        .init()
}

/// Running average accumulator for training metrics over a logging interval.
struct RunningAvg {
    total: f64,
    mae: f64,
    cls: f64,
    recon: f64,
    ssl: f64,
    byol: f64,
    auprc: f64,
    topk: f64,
    count: usize,
}

impl RunningAvg {
    fn new() -> Self {
        Self {
            total: 0.0,
            mae: 0.0,
            cls: 0.0,
            recon: 0.0,
            ssl: 0.0,
            byol: 0.0,
            auprc: 0.0,
            topk: 0.0,
            count: 0,
        }
    }

    fn update(&mut self, m: &StepMetrics) {
        self.total += m.total_loss;
        self.mae += m.mae_loss;
        self.cls += m.cls_loss;
        self.recon += m.recon_loss;
        self.ssl += m.ssl_loss;
        self.byol += m.byol_loss;
        self.auprc += m.auprc;
        self.topk += m.topk_accuracy;
        self.count += 1;
    }

    fn display(&self) -> String {
        if self.count == 0 {
            return "no data".to_string();
        }
        let n = self.count as f64;
        format!(
            "loss={:.4} mae={:.4} cls={:.4} recon={:.4} ssl={:.4} byol={:.4} auprc={:.3} top_k={:.3}",
            self.total / n,
            self.mae / n,
            self.cls / n,
            self.recon / n,
            self.ssl / n,
            self.byol / n,
            self.auprc / n,
            self.topk / n,
        )
    }

    fn avg_metrics(&self) -> Option<StepMetrics> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(StepMetrics {
            ssl_loss: self.ssl / n,
            byol_loss: self.byol / n,
            recon_loss: self.recon / n,
            mae_loss: self.mae / n,
            cls_loss: self.cls / n,
            total_loss: self.total / n,
            auprc: self.auprc / n,
            topk_accuracy: self.topk / n,
        })
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Run the training loop.
///
/// Each step: sample a two-view batch, run the training step, backpropagate,
/// step AdamW on the online model only, then refresh the momentum targets.
/// This loop is single-process; a data-parallel harness drives
/// [`ContrastByolMae::training_step`] directly with its own
/// [`ReplicaGather`](crate::training::gather::ReplicaGather) implementation.
///
/// # Arguments
/// - `config`: loop hyperparameters
/// - `model`: assembled training module (consumed and returned updated)
/// - `sampler`: provides two-view batches
/// - `device`: burn device for tensor operations
/// - `resume_step`: if `Some(step)`, load optimizer state and metadata from
///   `{checkpoint_dir}/step_{step}/` and continue training from that step
///
/// # Returns
/// The trained module.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    mut model: ContrastByolMae<B>,
    sampler: &TwoViewSampler,
    device: &B::Device,
    resume_step: Option<usize>,
) -> anyhow::Result<ContrastByolMae<B>> {
    std::fs::create_dir_all(&config.checkpoint_dir)?;

    let mut optimizer = configure_optimizer::<B>(config);
    let mut rng = rand::rngs::StdRng::from_entropy();
    let mut history = MetricsHistory::new();
    let mut running_avg = RunningAvg::new();
    let train_start = Instant::now();
    let gather = SingleProcess;
    let start_step: usize;

    if let Some(step) = resume_step {
        let step_dir = format!("{}/step_{step}", config.checkpoint_dir);
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        let optim_path = format!("{step_dir}/optimizer");
        let optim_record = recorder
            .load(optim_path.into(), device)
            .map_err(|e| anyhow::anyhow!("Failed to load optimizer from {step_dir}: {e}"))?;
        optimizer = optimizer.load_record(optim_record);

        let meta_path = format!("{step_dir}/meta.json");
        let meta: CheckpointMeta = serde_json::from_reader(
            std::fs::File::open(&meta_path)
                .map_err(|e| anyhow::anyhow!("Failed to open {meta_path}: {e}"))?,
        )
        .map_err(|e| anyhow::anyhow!("Failed to parse {meta_path}: {e}"))?;
        start_step = meta.step;

        tracing::info!(start_step, "Resumed training from checkpoint");
    } else {
        start_step = 0;
    }

    for step in start_step..config.total_steps {
        let lr = lr_schedule(config.lr, config.warmup_steps, config.total_steps, step);

        let batch = sampler
            .sample_batch(config.batch_size, &mut rng)
            .to_device::<B>(device);
        let output = model.training_step(&batch, &gather);

        let grads = GradientsParams::from_grads(output.loss.backward(), &model.online);
        model.online = optimizer.step(lr.into(), model.online, grads);
        model.momentum_update();

        running_avg.update(&output.metrics);

        if config.log_interval > 0 && step % config.log_interval == 0 {
            let avg_metrics = running_avg.avg_metrics();
            let warnings = avg_metrics
                .as_ref()
                .map(|m| m.health_check())
                .unwrap_or_default();
            if !warnings.is_empty() {
                tracing::warn!(step, "Health check warnings: {:?}", warnings);
            }

            let elapsed = train_start.elapsed().as_secs_f64();
            let remaining = if step > start_step {
                elapsed * (config.total_steps - step) as f64 / (step - start_step) as f64
            } else {
                0.0
            };
            let eta = if remaining < 60.0 {
                format!("{remaining:.0}s")
            } else if remaining < 3600.0 {
                format!("{:.0}m", remaining / 60.0)
            } else {
                format!("{:.1}h", remaining / 3600.0)
            };

            let lr_str = format!("{lr:.2e}");
            tracing::info!(step, lr = %lr_str, eta, "avg({}) {}", running_avg.count, running_avg.display());
            if let Some(m) = avg_metrics {
                history.push(step, m);
            }
            running_avg.reset();
        }

        if config.checkpoint_interval > 0 && step > 0 && step % config.checkpoint_interval == 0 {
            save_checkpoint(
                &format!("{}/step_{step}", config.checkpoint_dir),
                &model,
                &optimizer,
                step,
            )?;
            tracing::info!(step, "Checkpoint saved (model + targets + optimizer + meta)");
        }
    }

    let total_time = train_start.elapsed();
    tracing::info!(
        total_steps = config.total_steps,
        elapsed_secs = format!("{:.1}", total_time.as_secs_f64()),
        "Training loop finished"
    );

    save_checkpoint(
        &format!("{}/final", config.checkpoint_dir),
        &model,
        &optimizer,
        config.total_steps,
    )?;
    tracing::info!("Training complete. Final checkpoint saved.");

    Ok(model)
}

fn save_checkpoint<B: AutodiffBackend>(
    dir: &str,
    model: &ContrastByolMae<B>,
    optimizer: &impl Optimizer<OnlineModel<B>, B>,
    step: usize,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

    model
        .online
        .clone()
        .save_file(format!("{dir}/model"), &recorder)
        .map_err(|e| anyhow::anyhow!("Failed to save model at step {step}: {e}"))?;

    model
        .targets
        .clone()
        .save_file(format!("{dir}/targets"), &recorder)
        .map_err(|e| anyhow::anyhow!("Failed to save momentum targets at step {step}: {e}"))?;

    recorder
        .record(optimizer.to_record(), format!("{dir}/optimizer").into())
        .map_err(|e| anyhow::anyhow!("Failed to save optimizer at step {step}: {e}"))?;

    serde_json::to_writer(
        std::fs::File::create(format!("{dir}/meta.json"))?,
        &CheckpointMeta { step },
    )?;
    Ok(())
}

/// Load the online model and momentum targets saved by [`train`] into an
/// assembled module.
pub fn resume_from_checkpoint<B: AutodiffBackend>(
    dir: &Path,
    mut model: ContrastByolMae<B>,
    device: &B::Device,
) -> anyhow::Result<ContrastByolMae<B>> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model.online = model
        .online
        .load_file(dir.join("model"), &recorder, device)
        .map_err(|e| anyhow::anyhow!("Failed to load model from {}: {e}", dir.display()))?;
    model.targets = model
        .targets
        .load_file(dir.join("targets"), &recorder, device)
        .map_err(|e| {
            anyhow::anyhow!("Failed to load momentum targets from {}: {e}", dir.display())
        })?;
    Ok(model)
}
