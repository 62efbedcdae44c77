//! # flatnet - Fully-Connected Network Training on Flat Buffers
//!
//! Minibatch gradient descent for multilayer perceptrons, with every
//! parameter and activation of the network packed into a handful of flat
//! `f32` buffers and every numeric step expressed as a kernel launch.
//!
//! ## Architecture
//! - Flat layout: one buffer per quantity, layers located by an
//!   [`OffsetTable`]; weights of a boundary are `n_in × n_out` row-major
//! - Kernels run through a [`ComputeBackend`]: [`CpuBackend`] (rayon + SIMD)
//!   or `gpu::WgpuCompute` (WGSL, feature `gpu`)
//! - Momentum and Nesterov updates, L2 decay, hidden-neuron dropout over
//!   compacted buffers
//! - Minibatch rows gathered on a worker thread one epoch ahead
//!
//! ## Usage
//! ```rust,no_run
//! use flatnet::{load_training_set, TrainConfig, Trainer};
//!
//! # fn main() -> flatnet::FlatnetResult<()> {
//! let mut trainer = Trainer::new(TrainConfig::default())?;
//! trainer.set_training_set(load_training_set("xor.csv")?)?;
//! let outcome = trainer.train()?;
//! println!("{:?}, CE {}", outcome, trainer.state().cross_entropy);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod buffer;
pub mod config;
pub mod data;
pub mod dropout;
pub mod error;
pub mod kernels;
pub mod minibatch;
pub mod network;
pub mod topology;
pub mod trainer;
pub mod view;

#[cfg(feature = "gpu")]
pub mod gpu;

// Re-exports
pub use backend::{default_backend, BufferId, ComputeBackend, CpuBackend};
pub use buffer::Buffer;
pub use config::{
    ConfigError, DropoutConfig, MomentumSchedule, OutputActivation, TrainConfig, TrainConfigBuilder,
    WeightInit, DEFAULT_DROPOUT_ALIGNMENT,
};
pub use data::{load_mnist, load_training_set, load_weights, save_weights, DataSet};
pub use dropout::DropoutState;
pub use error::{FlatnetError, FlatnetResult};
pub use kernels::{Activation, Dispatcher, KernelOp, MatMulMode, ReduceKind};
pub use minibatch::{MinibatchLoader, MinibatchSampler};
pub use network::{Evaluation, Network, Parameters, PassLayout, UpdateStep, Workspace};
pub use topology::{NetworkTopology, OffsetTable};
pub use trainer::{EpochRecord, RunOutcome, Trainer, TrainingControl, TrainingState, TrainingStatus};
pub use view::MatrixView;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
