//! Error types
//!
//! Every failure in this crate is a configuration or programming error:
//! nothing is transient and nothing is retried. Checks run before any
//! output buffer is allocated, so an error never leaves partial results.

use thiserror::Error;

/// Errors raised while building kernel maps, operators, or running kernels.
#[derive(Debug, Error)]
pub enum FsaError {
    #[error("kernel_size must be odd and >= 3, got {0}")]
    InvalidKernelSize(usize),

    #[error("stride schedule is empty")]
    EmptySchedule,

    #[error("stride schedule length mismatch: {locations} locations vs {strides} strides")]
    ScheduleLengthMismatch { locations: usize, strides: usize },

    #[error("stride schedule locations must be strictly increasing and start above 1: location[{index}] = {location} after {previous}")]
    NonIncreasingLocation {
        index: usize,
        previous: usize,
        location: usize,
    },

    #[error("stride schedule stride[{index}] must be >= 1")]
    ZeroStride { index: usize },

    #[error("last stride location {last} must equal kernel_size / 2 + 1 = {expected}")]
    LocationSpan { last: usize, expected: usize },

    #[error("kernel map offset overflows i32 at one-sided tap {tap}: strides too large")]
    OffsetOverflow { tap: usize },

    #[error("kernel map has {actual} taps but kernel_size is {expected}")]
    KernelMapLength { expected: usize, actual: usize },

    #[error("groups and group_channels must be non-zero (groups={groups}, group_channels={group_channels})")]
    EmptyGroups {
        groups: usize,
        group_channels: usize,
    },

    #[error("invalid mixer config: {0}")]
    InvalidMixer(String),

    #[error("unknown direction '{0}' (expected 'horizontal' or 'vertical')")]
    UnknownDirection(String),

    #[error("shape mismatch for {tensor}: expected {expected}, got {actual}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FsaError {
    /// True for errors caused by tensor shapes rather than configuration.
    pub fn is_shape_error(&self) -> bool {
        matches!(self, FsaError::ShapeMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, FsaError>;

#[cfg(feature = "python")]
impl From<FsaError> for pyo3::PyErr {
    fn from(err: FsaError) -> Self {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
