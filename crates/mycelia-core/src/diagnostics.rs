use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured "not enough data" outcome.
///
/// Serializes as `{"error": "...", "n": 3}` so report consumers can check
/// for the `error` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsufficientData {
    pub error: String,
    pub n: usize,
}

impl InsufficientData {
    pub fn new(error: impl Into<String>, n: usize) -> Self {
        Self {
            error: error.into(),
            n,
        }
    }
}

impl fmt::Display for InsufficientData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (n={})", self.error, self.n)
    }
}

impl std::error::Error for InsufficientData {}
