use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from the edges of the pipeline. Optimizing lines that are already in memory can't fail.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl OptimizeError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> OptimizeError {
        let path = path.into();
        move |source| OptimizeError::Io { path, source }
    }
}

pub type Result<T, E = OptimizeError> = std::result::Result<T, E>;
