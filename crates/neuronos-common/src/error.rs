//! Error types for the ternary HAL.

use crate::capability::CapabilityMask;
use thiserror::Error;

/// Convenience result alias used across the workspace.
pub type Result<T> = std::result::Result<T, NeuronError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum NeuronError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the codec and the kernel operations.
///
/// Every variant is fatal to the call that produced it; no kernel writes a
/// partial result and then reports success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("element count {n} is not a positive multiple of the 128-weight block")]
    InvalidBlockAlignment { n: usize },

    #[error("could not allocate {bytes} bytes for the packed buffer")]
    AllocationFailure { bytes: usize },

    #[error("{buffer} buffer too small: need {required} elements, got {actual}")]
    BufferTooSmall { buffer: &'static str, required: usize, actual: usize },

    #[error("{buffer} stride {stride} is smaller than the minimum {minimum}")]
    InvalidStride { buffer: &'static str, stride: usize, minimum: usize },

    #[error("row count mismatch: expected {expected}, got {actual}")]
    RowCountMismatch { expected: usize, actual: usize },

    #[error("weights cover {weights} elements per row but activations cover {activations}")]
    DimensionMismatch { weights: usize, activations: usize },
}

/// Errors raised while registering or selecting a backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// No registered descriptor is eligible for the capability mask. The portable
    /// backend requires nothing, so this indicates a registry-construction defect.
    #[error("no compatible backend for capabilities {capabilities} ({registered} registered)")]
    NoCompatibleBackend { capabilities: CapabilityMask, registered: usize },

    #[error("backend '{backend}' requires feature bits the registry cannot express: {unknown:#010x}")]
    UnsupportedFeatureCombination { backend: String, unknown: u32 },

    #[error("registry has no backend without feature requirements")]
    MissingFallback,

    #[error("requested backend '{requested}' is not eligible for capabilities {capabilities}")]
    RequestedUnavailable { requested: String, capabilities: CapabilityMask },

    #[error(
        "backend '{backend}' diverges from the reference at output {index}: expected {expected}, got {actual}"
    )]
    ParityMismatch { backend: String, index: usize, expected: f32, actual: f32 },

    #[error("backend '{backend}' failed to initialize: {reason}")]
    Initialization { backend: String, reason: String },
}

/// Errors raised while loading or validating [`crate::HalConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
