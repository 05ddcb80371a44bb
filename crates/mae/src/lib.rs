//! Contrastive BYOL masked autoencoder.
//!
//! Trains a masked sequence encoder with a composite objective: NT-Xent
//! contrastive loss between two augmented views, BYOL-style
//! supervised-contrastive distillation against frozen EMA momentum targets,
//! masked reconstruction, and multi-label classification. Built on burn;
//! single training step exposed for the loop in
//! [`training::trainer::train`].

pub mod model;
pub mod training;

pub use model::encoder::{MaskedEncoder, MaskedEncoderConfig};
pub use model::momentum::{EmaModule, MomentumError, MomentumTargets};
pub use model::online::{EncoderOutput, OnlineModel, OnlineModelConfig};
pub use training::data::{HostBatch, MaeBatch, SequenceExample, TwoViewSampler};
pub use training::gather::{ReplicaGather, SingleProcess};
pub use training::loss::{GroupedObjective, NtXent, PairwiseObjective, SupCon};
pub use training::metrics::StepMetrics;
pub use training::step::{BuildError, ContrastByolMae, ContrastByolMaeConfig, StepOutput};
pub use training::trainer::{
    configure_optimizer, lr_schedule, resume_from_checkpoint, train, CheckpointMeta,
    TrainingConfig,
};
