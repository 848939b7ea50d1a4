//! Failure kinds the pipeline distinguishes.
//!
//! Functions return `anyhow::Result` and attach context as they go; the
//! variants here sit at the root of those chains so callers (and tests) can
//! classify a failure with `err.downcast_ref::<PipelineError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to start sandbox from image '{image}': {reason}")]
    SandboxStart { image: String, reason: String },

    #[error("command failed with exit code {}: {command}", exit_code.map_or_else(|| "none (killed by signal)".to_string(), |c| c.to_string()))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
    },

    #[error("signing '{}' failed after retry", changes.display())]
    SigningFailed { changes: PathBuf },

    #[error("expected at most one .changes file in '{}', found {count}", dir.display())]
    ArtifactCount { dir: PathBuf, count: usize },

    #[error("{0}")]
    DistributionRouting(String),

    #[error("invalid version '{version}': {reason}")]
    VersionParse { version: String, reason: String },

    #[error("malformed {kind} '{}': {reason}", path.display())]
    Metadata {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("refusing to upload '{}': {reason}", changes.display())]
    UploadAssertion { changes: PathBuf, reason: String },

    #[error("checksum mismatch for '{}': expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Find the [`PipelineError`] at the root of an `anyhow` chain, if any.
pub fn classify(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
}
