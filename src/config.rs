//! Training configuration and hyperparameters.
//!
//! [`TrainConfig`] holds every knob the orchestrator reads at the start of a
//! training run: learning rate, momentum and its schedule, epoch limits,
//! minibatch size, Nesterov look-ahead, dropout, L2 decay and the output
//! activation.
//!
//! # Example
//!
//! ```rust
//! use flatnet::{OutputActivation, TrainConfig};
//!
//! let config = TrainConfig {
//!     learning_rate: 0.1,
//!     minibatch_size: 32,
//!     output: OutputActivation::Sigmoid,
//!     ..Default::default()
//! };
//! config.validate().expect("valid configuration");
//! ```
//!
//! # Typical values
//!
//! | Parameter | Typical | Effect |
//! |-----------|---------|--------|
//! | `learning_rate` | 0.1-0.5 | step size of every update |
//! | `momentum` | 0.9 | weight of the previous increment |
//! | `minibatch_size` | 32-512 | rows per gradient step |

use std::borrow::Cow;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default tiling granularity for compacted dropout layers.
///
/// Hidden layers that survive a dropout draw are padded up to a multiple of
/// this so the compacted matrices keep tile-aligned widths.
pub const DEFAULT_DROPOUT_ALIGNMENT: usize = 16;

/// Epoch span of one step of the ramped momentum schedule.
pub const MOMENTUM_RAMP_EPOCHS: usize = 250;

/// How the momentum coefficient evolves over epochs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MomentumSchedule {
    /// Always use [`TrainConfig::momentum`].
    #[default]
    Constant,
    /// `min(1 - 2^(-1 - log2(floor(epoch / 250) + 1)), max)`.
    ///
    /// Starts at 0.5 and approaches 1 in steps of [`MOMENTUM_RAMP_EPOCHS`].
    Ramp {
        /// Upper bound of the coefficient.
        max: f32,
    },
}

impl MomentumSchedule {
    /// Momentum coefficient for `epoch`, given the configured base value.
    pub fn momentum_at(&self, epoch: usize, base: f32) -> f32 {
        match *self {
            MomentumSchedule::Constant => base,
            MomentumSchedule::Ramp { max } => {
                let step = (epoch / MOMENTUM_RAMP_EPOCHS + 1) as f32;
                let mu = 1.0 - 2f32.powf(-1.0 - step.log2());
                mu.min(max)
            }
        }
    }
}

/// Activation of the final layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OutputActivation {
    /// Softmax over each output row, categorical cross-entropy.
    #[default]
    Softmax,
    /// Element-wise logistic sigmoid, binary cross-entropy.
    Sigmoid,
}

/// Dropout of hidden neurons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DropoutConfig {
    /// Compacted hidden widths are rounded up to a multiple of this.
    pub alignment: usize,
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_DROPOUT_ALIGNMENT,
        }
    }
}

/// Initial weight values of a freshly created network.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WeightInit {
    /// Uniform random values in `[min, max)`.
    Uniform {
        /// Lower bound.
        min: f32,
        /// Upper bound (exclusive).
        max: f32,
    },
    /// Every weight set to the same value.
    Fixed(f32),
}

impl Default for WeightInit {
    fn default() -> Self {
        WeightInit::Uniform { min: -0.1, max: 0.1 }
    }
}

/// Training hyperparameters.
///
/// Read once by the orchestrator when a run starts. Mutations go through the
/// owner while training is idle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrainConfig {
    /// Step size of each weight update.
    pub learning_rate: f32,

    /// Momentum coefficient (base value for the schedule).
    pub momentum: f32,

    /// Momentum schedule.
    pub momentum_schedule: MomentumSchedule,

    /// Hard limit on the epoch counter.
    pub max_epochs: usize,

    /// Training stops early once the training cross-entropy falls below this.
    pub min_error: f32,

    /// Evaluate and report every this many epochs.
    pub print_epochs: usize,

    /// Rows per minibatch (clamped to the training set size).
    pub minibatch_size: usize,

    /// Nesterov look-ahead around each gradient evaluation.
    pub nag: bool,

    /// Hidden-neuron dropout (None = disabled).
    pub dropout: Option<DropoutConfig>,

    /// L2 regularization strength.
    pub lambda: f32,

    /// Final layer activation.
    pub output: OutputActivation,

    /// Initial weights for new networks.
    pub weight_init: WeightInit,

    /// Seed for weight init, minibatch sampling and dropout (None => entropy).
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.3,
            momentum: 0.9,
            momentum_schedule: MomentumSchedule::Constant,
            max_epochs: 10_000,
            min_error: 0.01,
            print_epochs: 100,
            minibatch_size: 128,
            nag: true,
            dropout: None,
            lambda: 0.0,
            output: OutputActivation::Softmax,
            weight_init: WeightInit::default(),
            seed: None,
        }
    }
}

impl TrainConfig {
    /// Momentum coefficient to use for `epoch`.
    #[inline]
    pub fn momentum_at(&self, epoch: usize) -> f32 {
        self.momentum_schedule.momentum_at(epoch, self.momentum)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `learning_rate` or `momentum` is outside `[0, 1]`
    /// - `minibatch_size`, `print_epochs` or `max_epochs` is zero
    /// - `lambda` is negative
    /// - the dropout alignment is not a power of two
    /// - the weight init range is empty
    ///
    /// ```rust
    /// use flatnet::TrainConfig;
    ///
    /// assert!(TrainConfig::default().validate().is_ok());
    /// let bad = TrainConfig { momentum: 1.5, ..Default::default() };
    /// assert!(bad.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.learning_rate) {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(ConfigError::InvalidMomentum(self.momentum));
        }
        if let MomentumSchedule::Ramp { max } = self.momentum_schedule {
            if !(0.0..=1.0).contains(&max) {
                return Err(ConfigError::InvalidMomentum(max));
            }
        }
        if self.minibatch_size == 0 {
            return Err(ConfigError::InvalidValue(Cow::Borrowed(
                "minibatch_size must be > 0",
            )));
        }
        if self.print_epochs == 0 {
            return Err(ConfigError::InvalidValue(Cow::Borrowed(
                "print_epochs must be > 0",
            )));
        }
        if self.max_epochs == 0 {
            return Err(ConfigError::InvalidValue(Cow::Borrowed(
                "max_epochs must be > 0",
            )));
        }
        if self.lambda < 0.0 || !self.lambda.is_finite() {
            return Err(ConfigError::InvalidValue(Cow::Owned(format!(
                "lambda must be >= 0, got {}",
                self.lambda
            ))));
        }
        if let Some(dropout) = self.dropout {
            if !dropout.alignment.is_power_of_two() {
                return Err(ConfigError::InvalidAlignment(dropout.alignment));
            }
        }
        if let WeightInit::Uniform { min, max } = self.weight_init {
            if min >= max {
                return Err(ConfigError::InvalidInitRange(min, max));
            }
        }
        Ok(())
    }

    /// Encodes the configuration with bincode.
    #[cfg(feature = "serde")]
    pub fn to_bytes(&self) -> crate::error::FlatnetResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a configuration written by [`to_bytes`](Self::to_bytes).
    #[cfg(feature = "serde")]
    pub fn from_bytes(bytes: &[u8]) -> crate::error::FlatnetResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Fluent builder for [`TrainConfig`]; `build()` validates.
#[derive(Debug, Clone, Default)]
pub struct TrainConfigBuilder {
    config: TrainConfig,
}

impl TrainConfigBuilder {
    /// Starts from [`TrainConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn learning_rate(mut self, lr: f32) -> Self {
        self.config.learning_rate = lr;
        self
    }

    pub fn momentum(mut self, momentum: f32) -> Self {
        self.config.momentum = momentum;
        self
    }

    pub fn momentum_schedule(mut self, schedule: MomentumSchedule) -> Self {
        self.config.momentum_schedule = schedule;
        self
    }

    pub fn max_epochs(mut self, epochs: usize) -> Self {
        self.config.max_epochs = epochs;
        self
    }

    pub fn min_error(mut self, min_error: f32) -> Self {
        self.config.min_error = min_error;
        self
    }

    pub fn print_epochs(mut self, epochs: usize) -> Self {
        self.config.print_epochs = epochs;
        self
    }

    pub fn minibatch_size(mut self, size: usize) -> Self {
        self.config.minibatch_size = size;
        self
    }

    pub fn nag(mut self, enabled: bool) -> Self {
        self.config.nag = enabled;
        self
    }

    pub fn dropout(mut self, dropout: Option<DropoutConfig>) -> Self {
        self.config.dropout = dropout;
        self
    }

    pub fn lambda(mut self, lambda: f32) -> Self {
        self.config.lambda = lambda;
        self
    }

    pub fn output(mut self, output: OutputActivation) -> Self {
        self.config.output = output;
        self
    }

    pub fn weight_init(mut self, init: WeightInit) -> Self {
        self.config.weight_init = init;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<TrainConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Errors returned by [`TrainConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Learning rate outside `[0, 1]`.
    #[error("Learning rate must be between 0.0 and 1.0, got {0}")]
    InvalidLearningRate(f32),

    /// Momentum outside `[0, 1]`.
    #[error("Momentum must be between 0.0 and 1.0, got {0}")]
    InvalidMomentum(f32),

    /// Dropout alignment is not a power of two.
    #[error("Dropout alignment must be a power of two, got {0}")]
    InvalidAlignment(usize),

    /// Weight init range is empty.
    #[error("Invalid weight init range [{0}, {1})")]
    InvalidInitRange(f32, f32),

    /// Any other out-of-range value.
    #[error("Invalid value: {0}")]
    InvalidValue(Cow<'static, str>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.output, OutputActivation::Softmax);
        assert!(config.dropout.is_none());
    }

    #[test]
    fn test_invalid_learning_rate() {
        let config = TrainConfig {
            learning_rate: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLearningRate(_))
        ));
    }

    #[test]
    fn test_invalid_alignment() {
        let config = TrainConfig {
            dropout: Some(DropoutConfig { alignment: 12 }),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAlignment(12))
        ));
    }

    #[test]
    fn test_constant_momentum() {
        let config = TrainConfig::default();
        assert_eq!(config.momentum_at(0), 0.9);
        assert_eq!(config.momentum_at(100_000), 0.9);
    }

    #[test]
    fn test_ramp_momentum() {
        let schedule = MomentumSchedule::Ramp { max: 0.99 };
        // floor(0/250)+1 = 1 -> 1 - 2^-1
        assert!((schedule.momentum_at(0, 0.0) - 0.5).abs() < 1e-6);
        // floor(250/250)+1 = 2 -> 1 - 2^-2
        assert!((schedule.momentum_at(250, 0.0) - 0.75).abs() < 1e-6);
        // floor(750/250)+1 = 4 -> 1 - 2^-3
        assert!((schedule.momentum_at(750, 0.0) - 0.875).abs() < 1e-6);
        // clamped
        assert!((schedule.momentum_at(10_000_000, 0.0) - 0.99).abs() < 1e-6);
    }

    #[test]
    fn test_builder() {
        let config = TrainConfigBuilder::new()
            .learning_rate(0.5)
            .momentum(0.5)
            .minibatch_size(4)
            .seed(7)
            .build()
            .expect("valid");
        assert_eq!(config.learning_rate, 0.5);
        assert_eq!(config.minibatch_size, 4);
        assert_eq!(config.seed, Some(7));

        assert!(TrainConfigBuilder::new().minibatch_size(0).build().is_err());
    }
}
