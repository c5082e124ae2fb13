//! Error types shared across the synthesis core.

use std::fmt;

/// Broad category of failure, mirroring the exception taxonomy of the
/// original analysis/synthesis backend so callers can branch on the kind
/// without parsing the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A configuration struct failed `validate()` before use.
    InvalidConfiguration,
    /// Runtime parameters (frame data, pulse positions, mixture weights...)
    /// violate an invariant the algorithm depends on.
    InvalidParameters,
    /// A computation produced NaN/Inf or a non-positive-definite matrix
    /// where one was required.
    NumericInstability,
    /// A pool, cache, or buffer could not satisfy a request within its
    /// configured limits (FFT plan cache full, ring buffer exhausted).
    ResourceExhaustion,
    /// An external analysis backend (or an optional FFT backend) was
    /// requested but is unavailable; the caller fell back or must retry.
    BackendUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidConfiguration => "invalid configuration",
            ErrorKind::InvalidParameters => "invalid parameters",
            ErrorKind::NumericInstability => "numeric instability",
            ErrorKind::ResourceExhaustion => "resource exhausted",
            ErrorKind::BackendUnavailable => "backend unavailable",
        };
        write!(f, "{s}")
    }
}

/// An error raised anywhere in the synthesis core: a kind for programmatic
/// branching plus a human-readable message for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NexusSynthError {
    pub kind: ErrorKind,
    pub message: String,
}

impl NexusSynthError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, message)
    }

    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameters, message)
    }

    pub fn numeric_instability(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NumericInstability, message)
    }

    pub fn resource_exhaustion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhaustion, message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }
}

impl fmt::Display for NexusSynthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for NexusSynthError {}

pub type Result<T> = std::result::Result<T, NexusSynthError>;
