use std::path::PathBuf;

/// Structural failures that abort a dataset run.
///
/// Per-pixel problems (points behind the camera, seeds that never converge,
/// out-of-range trajectory queries) are not errors; they end up as unknown
/// cells or clamped poses.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// A required input or artifact does not exist.
    #[error("missing artifact: {0}")]
    MissingArtifact(PathBuf),

    /// An input or artifact exists but cannot be interpreted.
    #[error("malformed artifact {path}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    /// The ground-truth trajectory has no samples.
    #[error("trajectory is empty")]
    EmptyTrajectory,

    /// Trajectory timestamps must be strictly increasing.
    #[error("trajectory timestamps not increasing at sample {0}")]
    NonIncreasingTrajectory(usize),

    /// Two grids that must share a size do not.
    #[error("grid size ({0}x{1}) does not match ({2}x{3})")]
    ShapeMismatch(usize, usize, usize, usize),
}

impl PipelineError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::MalformedArtifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
