use std::path::PathBuf;

/// Library errors. Expected runtime conditions (empty history, missing
/// snapshot, too few samples) are not errors and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum MyceliaError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse policy file: {0}")]
    Config(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MyceliaError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MyceliaError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MyceliaError>;
