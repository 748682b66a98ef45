//! Error types shared across the pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures surfaced by the build engine.
///
/// Per-file failures (a compiler rejecting its input, a worker crash) are
/// reported through build events and never take this form; these variants
/// cover the structural failures that abort a package or the whole project.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json in {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to spawn compiler `{executable}` for resource type `{resource_type}`: {source}")]
    Spawn {
        resource_type: String,
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("compiler worker for `{0}` exited before completing its version handshake")]
    WorkerHandshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("compiler worker channel closed unexpectedly")]
    ChannelClosed,
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn format(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        PipelineError::Format {
            path: path.into(),
            source,
        }
    }
}
