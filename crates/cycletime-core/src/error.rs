use std::path::PathBuf;
use thiserror::Error;

/// Hard failures raised while loading a run artifact.
///
/// Anything that only reduces report completeness (a missing metric file, a
/// non-success envelope, an empty test report) is not an error and never
/// surfaces through this type.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to read {artifact} at '{path}': {source}")]
    Unreadable {
        artifact: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {artifact}: {source}")]
    Malformed {
        artifact: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {artifact}: {detail}")]
    InvalidField {
        artifact: &'static str,
        detail: String,
    },
}

impl ArtifactError {
    /// Name of the artifact that failed to load.
    pub fn artifact(&self) -> &'static str {
        match self {
            ArtifactError::Unreadable { artifact, .. }
            | ArtifactError::Malformed { artifact, .. }
            | ArtifactError::InvalidField { artifact, .. } => artifact,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Read an artifact into memory, tagging I/O failures with the artifact name.
pub(crate) fn read_artifact(artifact: &'static str, path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ArtifactError::Unreadable {
        artifact,
        path: path.to_path_buf(),
        source,
    })
}
