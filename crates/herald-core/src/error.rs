//! Error types for `herald-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownDiscriminant {
    kind:  &'static str,
    value: String,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
    Self::UnknownDiscriminant { kind, value: value.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
