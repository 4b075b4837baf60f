// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A GPU call failed. There is no recovery path from these.
    #[error("backend failure: {0:#}")]
    Backend(#[from] anyhow::Error),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("failed to load shader module {}", path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("renderer is not initialized")]
    NotInitialized,
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
