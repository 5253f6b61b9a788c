//! Failure taxonomy.
//!
//! Operations return `anyhow::Result`. A `ClassifyError` is either the error
//! itself, for failures detected here, or the context attached over an
//! underlying cause (image decoding, tract, io...). Use `ClassifyError::of`
//! to recover the outermost kind.

use std::fmt;

pub use anyhow::{Context, Error, Result, bail, ensure, format_err};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// Missing or unreadable file, or bytes that are not a supported image.
    Resource(String),
    /// Bad dimensions or configuration.
    InvalidArgument(String),
    /// Missing, corrupt or incompatible model artifact.
    ModelLoad(String),
    /// Image or tensor shape contract violated.
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    /// A prediction failed. The payload names the failing stage.
    Inference(&'static str),
    /// Operation not allowed in the engine's current state.
    InvalidState(String),
}

impl ClassifyError {
    /// Outermost `ClassifyError` attached to `err`, if any.
    pub fn of(err: &Error) -> Option<&ClassifyError> {
        err.downcast_ref::<ClassifyError>()
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, ClassifyError::Resource(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ClassifyError::InvalidArgument(_))
    }

    pub fn is_model_load(&self) -> bool {
        matches!(self, ClassifyError::ModelLoad(_))
    }

    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, ClassifyError::ShapeMismatch { .. })
    }

    pub fn is_inference(&self) -> bool {
        matches!(self, ClassifyError::Inference(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, ClassifyError::InvalidState(_))
    }
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::Resource(s) => write!(f, "resource error: {s}"),
            ClassifyError::InvalidArgument(s) => write!(f, "invalid argument: {s}"),
            ClassifyError::ModelLoad(s) => write!(f, "model load error: {s}"),
            ClassifyError::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {expected:?}, got {got:?}")
            }
            ClassifyError::Inference(stage) => write!(f, "inference error during {stage}"),
            ClassifyError::InvalidState(s) => write!(f, "invalid state: {s}"),
        }
    }
}

impl std::error::Error for ClassifyError {}
