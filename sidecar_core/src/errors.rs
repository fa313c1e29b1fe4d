//! Closed error taxonomy shared by every engine and service layer.
//!
//! Engines never return `anyhow::Error` across their public boundary: every
//! failure mode a caller needs to branch on is a variant here. `anyhow` stays
//! for bootstrap-time plumbing (`sidecar_core::bootstrap`) where nothing
//! downstream pattern-matches the failure.

use thiserror::Error;
use tonic::Status;

/// Engine-level failure. Mirrors the exception hierarchy the original
/// Python engines raise (`ModelNotLoadedError`, `UnsupportedLanguageError`,
/// `TextTooLongError`, `BatchSizeExceededError`, `ModelInferenceError`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("text too long: {tokens} tokens (max {max})")]
    TextTooLong { tokens: usize, max: usize },

    #[error("batch size {size} exceeds maximum {max}")]
    BatchSizeExceeded { size: usize, max: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// The wire-facing classification carried in RPC status details. Kept
/// distinct from `EngineError` so that adding an internal failure mode
/// never silently changes what a client observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorKind {
    ModelNotLoaded,
    UnsupportedLanguage,
    TextTooLong,
    BatchSizeExceeded,
    InvalidInput,
    InferenceFailed,
    ResourceExhausted,
}

impl WireErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WireErrorKind::ModelNotLoaded => "MODEL_NOT_LOADED",
            WireErrorKind::UnsupportedLanguage => "UNSUPPORTED_LANGUAGE",
            WireErrorKind::TextTooLong => "TEXT_TOO_LONG",
            WireErrorKind::BatchSizeExceeded => "BATCH_SIZE_EXCEEDED",
            WireErrorKind::InvalidInput => "INVALID_INPUT",
            WireErrorKind::InferenceFailed => "INFERENCE_FAILED",
            WireErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }

    /// Whether a client may usefully retry the same request unchanged, per
    /// the taxonomy table in spec §7. `UnsupportedLanguage`/`TextTooLong`/
    /// `InvalidInput` are properties of the request itself and never
    /// retryable; `ModelNotLoaded` is retryable once the engine reports
    /// ready, `BatchSizeExceeded` with a smaller batch, `InferenceFailed`/
    /// `ResourceExhausted` transiently.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            WireErrorKind::ModelNotLoaded
                | WireErrorKind::BatchSizeExceeded
                | WireErrorKind::InferenceFailed
                | WireErrorKind::ResourceExhausted
        )
    }
}

impl From<&EngineError> for WireErrorKind {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::ModelNotLoaded => WireErrorKind::ModelNotLoaded,
            EngineError::UnsupportedLanguage(_) => WireErrorKind::UnsupportedLanguage,
            EngineError::TextTooLong { .. } => WireErrorKind::TextTooLong,
            EngineError::BatchSizeExceeded { .. } => WireErrorKind::BatchSizeExceeded,
            EngineError::InvalidInput(_) => WireErrorKind::InvalidInput,
            EngineError::InferenceFailed(_) => WireErrorKind::InferenceFailed,
            EngineError::ResourceExhausted(_) => WireErrorKind::ResourceExhausted,
        }
    }
}

/// Maps an engine failure onto a gRPC status, embedding the wire kind and
/// retryable flag as ASCII metadata so clients can branch without parsing
/// the message string.
impl From<EngineError> for Status {
    fn from(err: EngineError) -> Self {
        let kind = WireErrorKind::from(&err);
        let code = match err {
            EngineError::ModelNotLoaded => tonic::Code::Unavailable,
            EngineError::UnsupportedLanguage(_) => tonic::Code::InvalidArgument,
            EngineError::TextTooLong { .. } => tonic::Code::InvalidArgument,
            EngineError::BatchSizeExceeded { .. } => tonic::Code::InvalidArgument,
            EngineError::InvalidInput(_) => tonic::Code::InvalidArgument,
            EngineError::InferenceFailed(_) => tonic::Code::Internal,
            EngineError::ResourceExhausted(_) => tonic::Code::ResourceExhausted,
        };
        let mut status = Status::new(code, err.to_string());
        let metadata = status.metadata_mut();
        if let Ok(value) = kind.as_str().parse() {
            metadata.insert("error-kind", value);
        }
        if let Ok(value) = kind.retryable().to_string().parse() {
            metadata.insert("retryable", value);
        }
        status
    }
}
