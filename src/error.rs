use thiserror::Error;

/// Failure kinds of a mirror run.
///
/// Input validation errors are returned to the caller. Everything else ends up in the
/// [MirrorReport](crate::mirror::MirrorReport), either as the fatal error of the run or as an
/// entry in its download failure list.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid repository URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid destination {path:?}: {reason}")]
    InvalidDestination { path: String, reason: String },

    #[error("no Release or Packages file found below '{root}'")]
    NotFound { root: String },

    #[error("failed to decompress '{file}': {reason}")]
    Decompression { file: String, reason: String },

    #[error("failed to parse '{file}': {reason}")]
    Parse { file: String, reason: String },

    #[error("GET '{url}' failed: {reason}")]
    Transport { url: String, reason: String },
}

impl MirrorError {
    /// Whether this error ends the run before any work happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MirrorError::InvalidUrl { .. } | MirrorError::InvalidDestination { .. }
        )
    }
}
