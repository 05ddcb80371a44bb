//! Model components: masked encoder/decoder, pooling and prediction heads,
//! the online module bundle, and the EMA momentum targets.

pub mod block;
pub mod decoder;
pub mod encoder;
pub mod heads;
pub mod momentum;
pub mod online;
pub mod pool;
