//! Error type shared by every fallible flatnet operation.
//!
//! Shape preconditions inside the kernel dispatcher are not reported here:
//! a mis-sized view is a bug in the caller and panics via `assert!`.
//! Variants tied to the wgpu backend exist only with the `gpu` feature.
//!
//! # Example
//!
//! ```rust
//! use flatnet::FlatnetError;
//!
//! fn check_row(expected: usize, got: usize) -> Result<(), FlatnetError> {
//!     if expected != got {
//!         return Err(FlatnetError::shape_mismatch(&[expected], &[got]));
//!     }
//!     Ok(())
//! }
//! assert!(check_row(3, 4).is_err());
//! ```

use std::borrow::Cow;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum FlatnetError {
    /// No adapter, or none whose name matched the filter.
    #[cfg(feature = "gpu")]
    #[error("No usable GPU adapter: {0}")]
    AdapterNotFound(String),

    #[cfg(feature = "gpu")]
    #[error("GPU device request refused: {0}")]
    DeviceRequestFailed(#[from] wgpu::RequestDeviceError),

    /// Mapping a staging buffer for readback failed.
    #[cfg(feature = "gpu")]
    #[error("GPU readback failed: {0}")]
    BufferAsync(#[from] wgpu::BufferAsyncError),

    #[cfg(feature = "gpu")]
    #[error("GPU limits too small: {0}")]
    UnsupportedLimits(String),

    /// Device buffer larger than a binding allows, or a write out of range.
    #[cfg(feature = "gpu")]
    #[error("GPU buffer: {0}")]
    BufferError(String),

    /// WGSL rejected by pipeline validation.
    #[cfg(feature = "gpu")]
    #[error("WGSL validation: {0}")]
    ShaderError(String),

    /// Host data does not match the size of its destination.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Invalid topology: {0}")]
    InvalidTopology(Cow<'static, str>),

    /// Handle released already, or issued by another backend.
    #[error("Unknown buffer handle {0}")]
    UnknownBuffer(usize),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed training set or weight file.
    #[error("Parse error in {source_name} at line {line}: {message}")]
    Parse {
        source_name: String,
        /// 1-based.
        line: usize,
        message: String,
    },

    /// Row counts or widths that disagree with a declaration or a network.
    #[error("Data mismatch: {0}")]
    DataMismatch(String),

    #[error("Training is active; pause or stop it first")]
    TrainingActive,

    #[error("No training set loaded")]
    MissingTrainingSet,

    /// The minibatch gather thread panicked or could not be joined.
    #[error("Background worker failed: {0}")]
    Worker(String),

    /// A size does not fit the saved format's `i32` fields.
    #[error("Integer overflow: {0}")]
    Overflow(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serde")]
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type FlatnetResult<T> = Result<T, FlatnetError>;

impl FlatnetError {
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        FlatnetError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    pub fn invalid_topology<S: Into<Cow<'static, str>>>(msg: S) -> Self {
        FlatnetError::InvalidTopology(msg.into())
    }

    /// Parse error at a 1-based `line` of `source_name`.
    pub fn parse<N: Into<String>, M: Into<String>>(source_name: N, line: usize, message: M) -> Self {
        FlatnetError::Parse {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }

    pub fn data_mismatch<S: Into<String>>(msg: S) -> Self {
        FlatnetError::DataMismatch(msg.into())
    }

    pub fn worker<S: Into<String>>(msg: S) -> Self {
        FlatnetError::Worker(msg.into())
    }

    pub fn overflow<S: Into<String>>(msg: S) -> Self {
        FlatnetError::Overflow(msg.into())
    }

    #[cfg(feature = "gpu")]
    pub fn adapter_not_found<S: Into<String>>(msg: S) -> Self {
        FlatnetError::AdapterNotFound(msg.into())
    }

    #[cfg(feature = "gpu")]
    pub fn unsupported_limits<S: Into<String>>(msg: S) -> Self {
        FlatnetError::UnsupportedLimits(msg.into())
    }

    #[cfg(feature = "gpu")]
    pub fn buffer<S: Into<String>>(msg: S) -> Self {
        FlatnetError::BufferError(msg.into())
    }

    #[cfg(feature = "gpu")]
    pub fn shader<S: Into<String>>(msg: S) -> Self {
        FlatnetError::ShaderError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch() {
        let msg = FlatnetError::shape_mismatch(&[5, 4], &[5, 3]).to_string();
        assert!(msg.contains("[5, 4]"));
        assert!(msg.contains("[5, 3]"));
    }

    #[test]
    fn test_parse_error_names_line() {
        let msg = FlatnetError::parse("train.csv", 7, "expected 6 columns, got 5").to_string();
        assert!(msg.contains("train.csv"));
        assert!(msg.contains("line 7"));
        assert!(msg.contains("6 columns"));
    }

    #[test]
    fn test_conversions() {
        let err: FlatnetError = ConfigError::InvalidLearningRate(1.5).into();
        assert!(matches!(err, FlatnetError::Config(_)));
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.bin");
        let err: FlatnetError = io.into();
        assert!(err.to_string().contains("missing.bin"));
    }
}
